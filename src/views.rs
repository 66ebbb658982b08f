use crate::auth;
use crate::database;
use crate::database::models::{
    Category, CategoryId, Cook, CookId, Dish, DishId, Ingredient, NewDish, ReviewId,
};
use crate::forms::{
    Choice, CookForm, DishForm, FieldErrors, FormContext, FormData, LoginForm, ReviewForm,
    SearchForm,
};
use crate::pagination;
use crate::query;
use crate::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const INDEX_URL: &str = "/";
pub const LOGIN_URL: &str = "/accounts/login/";
pub const PROFILE_URL: &str = "/profile/";

pub fn dish_list_url(category: CategoryId) -> String {
    format!("/categories/{category}/")
}

pub fn dish_create_url(category: CategoryId) -> String {
    format!("/categories/{category}/dishes/create/")
}

pub fn dish_detail_url(dish: DishId) -> String {
    format!("/dishes/{dish}/")
}

pub fn dish_update_url(dish: DishId) -> String {
    format!("/dishes/{dish}/update/")
}

pub fn dish_delete_url(dish: DishId) -> String {
    format!("/dishes/{dish}/delete/")
}

pub fn review_delete_url(review: ReviewId) -> String {
    format!("/review/{review}/delete/")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Error,
}

/// A one-shot notice shown on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub level: Level,
    pub text: String,
}

impl Message {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            text: text.into(),
        }
    }
}

/// Values handed to a template, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: &impl Serialize) -> Result<()> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    LogIn(CookId),
    LogOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Render {
        template: &'static str,
        context: Context,
    },
    Redirect {
        location: String,
        message: Option<Message>,
        session: Option<SessionChange>,
    },
}

impl Response {
    fn render(template: &'static str, context: Context) -> Self {
        Self::Render { template, context }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self::Redirect {
            location: location.into(),
            message: None,
            session: None,
        }
    }

    fn with_message(mut self, new_message: Message) -> Self {
        if let Self::Redirect { message, .. } = &mut self {
            *message = Some(new_message);
        }
        self
    }

    fn with_session(mut self, change: SessionChange) -> Self {
        if let Self::Redirect { session, .. } = &mut self {
            *session = Some(change);
        }
        self
    }

    /// Sends an anonymous visitor to log in, coming back to `next` afterwards.
    pub fn redirect_to_login(next: &str) -> Self {
        Self::redirect(format!("{LOGIN_URL}?next={next}"))
    }

    #[cfg(test)]
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Redirect { location, .. } => Some(location),
            Self::Render { .. } => None,
        }
    }

    #[cfg(test)]
    pub fn context(&self) -> Option<&Context> {
        match self {
            Self::Render { context, .. } => Some(context),
            Self::Redirect { .. } => None,
        }
    }
}

/// Runs `then` with the logged-in cook, or sends the visitor to log in first.
fn login_required(
    cook: Option<&Cook>,
    next: &str,
    then: impl FnOnce(&Cook) -> Result<Response>,
) -> Result<Response> {
    match cook {
        Some(cook) => then(cook),
        None => {
            debug!("anonymous request for {next}, asking to log in");
            Ok(Response::redirect_to_login(next))
        }
    }
}

#[derive(Serialize)]
struct CategoryEntry<'a> {
    #[serde(flatten)]
    category: &'a Category,
    label: String,
    dish_count: i64,
}

#[derive(Serialize)]
struct DishEntry<'a> {
    #[serde(flatten)]
    dish: &'a Dish,
    spicy_display: String,
    difficulty_display: String,
    review_count: i64,
    ingredients: Vec<String>,
}

impl<'a> DishEntry<'a> {
    fn new(dish: &'a Dish, review_count: i64, ingredients: Vec<String>) -> Self {
        Self {
            dish,
            spicy_display: dish.spicy.to_string(),
            difficulty_display: dish.difficulty.to_string(),
            review_count,
            ingredients,
        }
    }
}

#[derive(Serialize)]
struct Author<'a> {
    id: CookId,
    username: &'a str,
    first_name: &'a str,
    last_name: &'a str,
}

impl<'a> From<&'a Cook> for Author<'a> {
    fn from(cook: &'a Cook) -> Self {
        Self {
            id: cook.id,
            username: &cook.username,
            first_name: &cook.first_name,
            last_name: &cook.last_name,
        }
    }
}

#[derive(Serialize)]
struct ReviewEntry<'a> {
    id: ReviewId,
    content: &'a str,
    created_at: chrono::NaiveDateTime,
    left_by: Author<'a>,
    delete_url: String,
}

/// `GET /`: categories with their dish counts, optionally narrowed by `name`.
pub fn index(conn: &mut database::Connection, params: &FormData) -> Result<Response> {
    let search = SearchForm::clean(params, SearchForm::CATEGORY_FIELD);
    let needle = search.value.as_deref().map(str::to_lowercase);

    let categories = query::list_categories(conn)?;
    let entries: Vec<_> = categories
        .iter()
        .map(|(category, dish_count)| CategoryEntry {
            category,
            label: category.dish_type.to_string(),
            dish_count: *dish_count,
        })
        .filter(|entry| match &needle {
            Some(needle) => {
                entry.category.dish_type.as_ref().contains(needle.as_str())
                    || entry.label.to_lowercase().contains(needle.as_str())
            }
            None => true,
        })
        .collect();

    let mut context = Context::new();
    context.insert("categories", &entries)?;
    context.insert("search_form", &search.context)?;
    Ok(Response::render("tasty_ideas/index.html", context))
}

/// `GET /categories/{id}/`: one page of the category's dishes, filtered by `query`.
pub fn dish_list(
    conn: &mut database::Connection,
    category: CategoryId,
    params: &FormData,
) -> Result<Response> {
    let search = SearchForm::clean(params, SearchForm::DISH_FIELD);
    let found = query::search_dishes(conn, category, search.value.as_deref())?;
    let page = pagination::paginate(found, pagination::DISHES_PER_PAGE, params.get("page"))?;

    let ids: Vec<_> = page.items.iter().map(|d| d.id).collect();
    let review_counts = query::review_counts(conn, &ids)?;
    let mut ingredient_names = query::ingredient_names_by_dish(conn, &ids)?;
    let dishes: Vec<_> = page
        .items
        .iter()
        .map(|dish| {
            DishEntry::new(
                dish,
                review_counts.get(&dish.id).copied().unwrap_or(0),
                ingredient_names.remove(&dish.id).unwrap_or_default(),
            )
        })
        .collect();

    let mut context = Context::new();
    context.insert("dishes", &dishes)?;
    context.insert("page_obj", &page.info)?;
    context.insert("is_paginated", &page.info.is_paginated())?;
    context.insert("search_form", &search.context)?;
    context.insert("category_pk", &category)?;
    Ok(Response::render("tasty_ideas/dish_list.html", context))
}

fn detail_context(
    conn: &mut database::Connection,
    dish: &Dish,
    cook: Option<&Cook>,
) -> Result<Context> {
    let ingredients = query::dish_ingredients(conn, dish.id)?;
    let reviews = query::dish_reviews(conn, dish.id)?;
    let review_entries: Vec<_> = reviews
        .iter()
        .map(|(review, author)| ReviewEntry {
            id: review.id,
            content: &review.content,
            created_at: review.created_at,
            left_by: author.into(),
            delete_url: review_delete_url(review.id),
        })
        .collect();

    let mut context = Context::new();
    context.insert(
        "dish",
        &DishEntry::new(
            dish,
            reviews.len() as i64,
            ingredients.iter().map(|i| i.name.clone()).collect(),
        ),
    )?;
    context.insert("ingredients", &ingredients)?;
    context.insert("reviews", &review_entries)?;
    context.insert("form", &FormContext::empty())?;
    context.insert("category_id", &dish.category_id)?;
    context.insert("next", &dish_detail_url(dish.id))?;
    context.insert("user", &cook.map(Author::from))?;
    Ok(context)
}

/// `GET /dishes/{id}/`
pub fn dish_detail(
    conn: &mut database::Connection,
    cook: Option<&Cook>,
    dish_id: DishId,
) -> Result<Response> {
    let dish = query::get_dish(conn, dish_id)?;
    let context = detail_context(conn, &dish, cook)?;
    Ok(Response::render("tasty_ideas/dish_detail.html", context))
}

/// `POST /dishes/{id}/`: leaves a review. Problems are reported as a message on the detail page.
pub fn add_review(
    conn: &mut database::Connection,
    cook: Option<&Cook>,
    dish_id: DishId,
    data: &FormData,
) -> Result<Response> {
    let dish = query::get_dish(conn, dish_id)?;
    let back = Response::redirect(dish_detail_url(dish.id));

    let Some(cook) = cook else {
        debug!("anonymous review attempt on dish {}", dish.id);
        return Ok(back.with_message(Message::error("Please log in before adding reviews.")));
    };
    match ReviewForm::clean(data) {
        Ok(form) => {
            let review = query::add_review(conn, dish.id, cook.id, &form.content)?;
            info!(
                "{} reviewed dish {} (review {})",
                cook.username, dish.id, review.id
            );
            Ok(back)
        }
        Err(_) => Ok(back.with_message(Message::error("Please provide a valid review."))),
    }
}

fn dish_form_context(
    conn: &mut database::Connection,
    form: &FormContext,
    category: CategoryId,
    is_update_view: bool,
) -> Result<Context> {
    let ingredients: Vec<Ingredient> = query::list_ingredients(conn)?;

    let mut context = Context::new();
    context.insert("form", form)?;
    context.insert("ingredient_choices", &Choice::ingredients(&ingredients))?;
    context.insert("spicy_choices", &Choice::spiciness())?;
    context.insert("difficulty_choices", &Choice::difficulty())?;
    context.insert("is_update_view", &is_update_view)?;
    context.insert("category_pk", &category)?;
    Ok(context)
}

fn new_dish<'a>(form: &'a DishForm, category: CategoryId) -> NewDish<'a> {
    NewDish {
        name: &form.name,
        price: form.price,
        cooking_time: form.cooking_time,
        spicy: form.spicy,
        difficulty: form.difficulty,
        category_id: category,
        recipe: &form.recipe,
        image: form.image.as_deref(),
    }
}

fn invalid_dish_form(
    conn: &mut database::Connection,
    data: &FormData,
    errors: FieldErrors,
    category: CategoryId,
    editing: Option<&Dish>,
) -> Result<Response> {
    let form = FormContext::bound(data, DishForm::MULTI, errors);
    let mut context = dish_form_context(conn, &form, category, editing.is_some())?;
    if let Some(dish) = editing {
        context.insert("dish", dish)?;
    }
    Ok(Response::render("tasty_ideas/dish_list_form.html", context))
}

/// `GET /categories/{id}/dishes/create/`
pub fn dish_create_form(
    conn: &mut database::Connection,
    cook: Option<&Cook>,
    category: CategoryId,
) -> Result<Response> {
    login_required(cook, &dish_create_url(category), |_| {
        let category = query::get_category(conn, category)?;
        let form = FormContext::initial(serde_json::json!({ "category": category.id }));
        let context = dish_form_context(conn, &form, category.id, false)?;
        Ok(Response::render("tasty_ideas/dish_list_form.html", context))
    })
}

/// `POST /categories/{id}/dishes/create/`: the dish always lands in the category of the URL.
pub fn dish_create(
    conn: &mut database::Connection,
    cook: Option<&Cook>,
    category: CategoryId,
    data: &FormData,
) -> Result<Response> {
    login_required(cook, &dish_create_url(category), |cook| {
        let category = query::get_category(conn, category)?;
        let form = match DishForm::clean(conn, data)? {
            Ok(form) => form,
            Err(errors) => return invalid_dish_form(conn, data, errors, category.id, None),
        };
        let dish = query::add_dish(conn, &new_dish(&form, category.id), &form.ingredients)?;
        info!("{} created dish {} ({})", cook.username, dish.id, dish.name);
        Ok(Response::redirect(dish_list_url(category.id)))
    })
}

/// `GET /dishes/{id}/update/`
pub fn dish_update_form(
    conn: &mut database::Connection,
    cook: Option<&Cook>,
    dish_id: DishId,
) -> Result<Response> {
    login_required(cook, &dish_update_url(dish_id), |_| {
        let dish = query::get_dish(conn, dish_id)?;
        let ingredients = query::dish_ingredients(conn, dish.id)?;
        let form = FormContext::initial(DishForm::initial(&dish, &ingredients));
        let mut context = dish_form_context(conn, &form, dish.category_id, true)?;
        context.insert("dish", &dish)?;
        Ok(Response::render("tasty_ideas/dish_list_form.html", context))
    })
}

/// `POST /dishes/{id}/update/`: rewrites every field and replaces the ingredient set.
pub fn dish_update(
    conn: &mut database::Connection,
    cook: Option<&Cook>,
    dish_id: DishId,
    data: &FormData,
) -> Result<Response> {
    login_required(cook, &dish_update_url(dish_id), |cook| {
        let dish = query::get_dish(conn, dish_id)?;
        let form = match DishForm::clean(conn, data)? {
            Ok(form) => form,
            Err(errors) => {
                return invalid_dish_form(conn, data, errors, dish.category_id, Some(&dish))
            }
        };
        let category = form.category.unwrap_or(dish.category_id);
        let dish = query::update_dish(conn, dish.id, &new_dish(&form, category), &form.ingredients)?;
        info!("{} updated dish {}", cook.username, dish.id);
        Ok(Response::redirect(dish_detail_url(dish.id)))
    })
}

/// `GET /dishes/{id}/delete/`
pub fn dish_delete_confirm(
    conn: &mut database::Connection,
    cook: Option<&Cook>,
    dish_id: DishId,
) -> Result<Response> {
    login_required(cook, &dish_delete_url(dish_id), |_| {
        let dish = query::get_dish(conn, dish_id)?;
        let mut context = Context::new();
        context.insert("dish", &dish)?;
        context.insert("category_pk", &dish.category_id)?;
        Ok(Response::render("tasty_ideas/dish_confirm_delete.html", context))
    })
}

/// `POST /dishes/{id}/delete/`: removes the dish and its reviews.
pub fn dish_delete(
    conn: &mut database::Connection,
    cook: Option<&Cook>,
    dish_id: DishId,
) -> Result<Response> {
    login_required(cook, &dish_delete_url(dish_id), |cook| {
        let dish = query::delete_dish(conn, dish_id)?;
        info!("{} deleted dish {} ({})", cook.username, dish.id, dish.name);
        Ok(Response::redirect(dish_list_url(dish.category_id)))
    })
}

/// `POST /review/{id}/delete/`: authors remove their own reviews; anyone else is just sent back.
pub fn delete_review(
    conn: &mut database::Connection,
    cook: Option<&Cook>,
    review_id: ReviewId,
) -> Result<Response> {
    login_required(cook, &review_delete_url(review_id), |cook| {
        let review = query::get_review(conn, review_id)?;
        if review.left_by == cook.id {
            query::delete_review_by(conn, review.id, cook.id)?;
            info!("{} deleted review {}", cook.username, review.id);
        } else {
            warn!(
                "{} tried to delete review {} written by someone else",
                cook.username, review.id
            );
        }
        Ok(Response::redirect(dish_detail_url(review.dish_id)))
    })
}

fn profile_page(cook: &Cook, form: &FormContext) -> Result<Response> {
    let mut context = Context::new();
    context.insert("user", cook)?;
    context.insert("form", form)?;
    Ok(Response::render("tasty_ideas/user_profile.html", context))
}

/// `GET /profile/`
pub fn profile(cook: Option<&Cook>) -> Result<Response> {
    login_required(cook, PROFILE_URL, |cook| {
        profile_page(cook, &FormContext::initial(CookForm::initial(cook)))
    })
}

/// `POST /profile/`
pub fn profile_update(
    conn: &mut database::Connection,
    cook: Option<&Cook>,
    data: &FormData,
) -> Result<Response> {
    login_required(cook, PROFILE_URL, |cook| {
        let form = match CookForm::clean_profile(conn, data, cook)? {
            Ok(form) => form,
            Err(errors) => return profile_page(cook, &FormContext::bound(data, &[], errors)),
        };
        let hashed = form.password.as_deref().map(auth::hash_password).transpose()?;
        let updated = query::update_cook(
            conn,
            cook.id,
            &query::ProfileChanges {
                username: &form.username,
                first_name: &form.first_name,
                last_name: &form.last_name,
                email: &form.email,
                password: hashed.as_deref(),
            },
        )?;
        info!("{} updated their profile", updated.username);
        let response =
            Response::redirect(PROFILE_URL).with_message(Message::success("Profile updated."));
        if hashed.is_some() {
            // A new password logs out every other browser; this one gets a fresh session.
            auth::close_all_sessions(conn, cook.id)?;
            return Ok(response.with_session(SessionChange::LogIn(cook.id)));
        }
        Ok(response)
    })
}

fn signup_page(form: &FormContext) -> Result<Response> {
    let mut context = Context::new();
    context.insert("form", form)?;
    Ok(Response::render("registration/signup.html", context))
}

/// `GET /accounts/signup/`
pub fn signup_form() -> Result<Response> {
    signup_page(&FormContext::empty())
}

/// `POST /accounts/signup/`
pub fn signup(conn: &mut database::Connection, data: &FormData) -> Result<Response> {
    let form = match CookForm::clean_signup(conn, data)? {
        Ok(form) => form,
        Err(errors) => return signup_page(&FormContext::bound(data, &[], errors)),
    };
    auth::register(
        conn,
        &auth::Registration {
            username: &form.username,
            first_name: &form.first_name,
            last_name: &form.last_name,
            email: &form.email,
            password: form.password.as_deref(),
            experience: 0,
        },
    )?;
    Ok(Response::redirect(LOGIN_URL))
}

/// Only same-site paths are followed after logging in. Browsers read `/\host` as `//host`.
fn safe_next(next: Option<&str>) -> &str {
    let Some(next) = next else {
        return INDEX_URL;
    };
    let mut chars = next.chars();
    let local = chars.next() == Some('/')
        && !matches!(chars.next(), Some('/' | '\\'))
        && !next.chars().any(char::is_control);
    if local {
        next
    } else {
        warn!("ignoring off-site redirect target {next:?}");
        INDEX_URL
    }
}

fn login_page(form: &FormContext, next: Option<&str>) -> Result<Response> {
    let mut context = Context::new();
    context.insert("form", form)?;
    context.insert("next", &safe_next(next))?;
    Ok(Response::render("registration/login.html", context))
}

/// `GET /accounts/login/`
pub fn login_form(params: &FormData) -> Result<Response> {
    login_page(&FormContext::empty(), params.get("next"))
}

/// `POST /accounts/login/`
pub fn login(
    conn: &mut database::Connection,
    params: &FormData,
    data: &FormData,
) -> Result<Response> {
    let next = data.get("next").or_else(|| params.get("next"));
    let form = match LoginForm::clean(data) {
        Ok(form) => form,
        Err(errors) => return login_page(&FormContext::bound(data, &[], errors), next),
    };
    match auth::authenticate(conn, &form.username, &form.password)? {
        Some(cook) => {
            info!("{} logged in", cook.username);
            Ok(Response::redirect(safe_next(next)).with_session(SessionChange::LogIn(cook.id)))
        }
        None => {
            let mut errors = FieldErrors::new();
            errors.insert(
                "__all__".into(),
                vec!["Please enter a correct username and password.".into()],
            );
            login_page(&FormContext::bound(data, &[], errors), next)
        }
    }
}

/// `POST /accounts/logout/`
pub fn logout(cook: Option<&Cook>) -> Result<Response> {
    if let Some(cook) = cook {
        info!("{} logged out", cook.username);
    }
    Ok(Response::redirect(INDEX_URL).with_session(SessionChange::LogOut))
}

#[cfg(test)]
use crate::database::models::{Difficulty, DishType};
#[cfg(test)]
use crate::database::test_connection;
#[cfg(test)]
use crate::query::test_support::{cook, count_dishes, count_reviews, dish};
#[cfg(test)]
use crate::Error;

#[cfg(test)]
fn form(pairs: &[(&str, &str)]) -> FormData {
    pairs.iter().copied().collect()
}

#[cfg(test)]
fn context(response: &Response) -> &Context {
    response.context().expect("expected a rendered page")
}

#[cfg(test)]
struct Fixture {
    conn: database::Connection,
    category: Category,
    dish: Dish,
    cook: Cook,
}

#[cfg(test)]
fn fixture() -> Fixture {
    let mut conn = test_connection();
    let category = query::add_category(&mut conn, DishType::Sushi, None).unwrap();
    let dish = dish(
        &mut conn,
        category.id,
        "Test Dish 1",
        "10.99",
        Difficulty::Easy,
        &[],
    );
    let cook = cook(&mut conn, "test_user", "Test");
    Fixture {
        conn,
        category,
        dish,
        cook,
    }
}

#[cfg(test)]
fn dish_form(category: CategoryId, ingredients: &[String]) -> FormData {
    let mut data = form(&[
        ("name", "Created Dish"),
        ("price", "15.99"),
        ("cooking_time", "60"),
        ("spicy", "hot"),
        ("difficulty", "hard"),
        ("recipe", "Updated recipe"),
        ("category", &category.to_string()),
    ]);
    for i in ingredients {
        data.push("ingredients", i.as_str());
    }
    data
}

#[test]
fn index_lists_categories_with_counts() {
    let mut f = fixture();
    query::add_category(&mut f.conn, DishType::Soup, None).unwrap();

    let response = index(&mut f.conn, &FormData::new()).unwrap();
    let categories = context(&response).get("categories").unwrap();
    assert_eq!(categories.as_array().unwrap().len(), 2);
    assert_eq!(categories[0]["dish_type"], "soup");
    assert_eq!(categories[0]["label"], "soups");
    assert_eq!(categories[1]["dish_count"], 1);

    let response = index(&mut f.conn, &form(&[("name", "ROLL")])).unwrap();
    let categories = context(&response).get("categories").unwrap();
    assert_eq!(categories.as_array().unwrap().len(), 1);
    assert_eq!(categories[0]["dish_type"], "sushi");
}

#[test]
fn dish_list_with_search_query() {
    let mut f = fixture();
    dish(
        &mut f.conn,
        f.category.id,
        "Test Dish 2",
        "12.99",
        Difficulty::Medium,
        &[],
    );

    let response =
        dish_list(&mut f.conn, f.category.id, &form(&[("query", "Test Dish 1")])).unwrap();
    let dishes = context(&response).get("dishes").unwrap().as_array().unwrap();
    assert_eq!(dishes.len(), 1);
    assert_eq!(dishes[0]["name"], "Test Dish 1");

    let response = dish_list(
        &mut f.conn,
        f.category.id,
        &form(&[("query", "Non-existing Dish")]),
    )
    .unwrap();
    assert_eq!(context(&response).get("dishes").unwrap(), &serde_json::json!([]));
}

#[test]
fn dish_list_pagination() {
    let mut f = fixture();
    dish(&mut f.conn, f.category.id, "Test Dish 2", "12.99", Difficulty::Medium, &[]);

    let response = dish_list(&mut f.conn, f.category.id, &FormData::new()).unwrap();
    assert_eq!(context(&response).get("is_paginated").unwrap(), false);
    assert_eq!(context(&response).get("dishes").unwrap().as_array().unwrap().len(), 2);

    dish(&mut f.conn, f.category.id, "Test Dish 3", "15.99", Difficulty::Hard, &[]);
    let response = dish_list(&mut f.conn, f.category.id, &FormData::new()).unwrap();
    let ctx = context(&response);
    assert_eq!(ctx.get("is_paginated").unwrap(), true);
    assert_eq!(ctx.get("dishes").unwrap().as_array().unwrap().len(), 2);
    assert_eq!(ctx.get("page_obj").unwrap()["num_pages"], 2);

    let response = dish_list(&mut f.conn, f.category.id, &form(&[("page", "2")])).unwrap();
    let dishes = context(&response).get("dishes").unwrap();
    assert_eq!(dishes[0]["name"], "Test Dish 3");

    assert!(matches!(
        dish_list(&mut f.conn, f.category.id, &form(&[("page", "3")])),
        Err(Error::NotFound)
    ));
}

#[test]
fn dish_list_annotations() {
    let mut f = fixture();
    let rice = query::add_ingredient(&mut f.conn, "rice").unwrap();
    let with_rice = dish(
        &mut f.conn,
        f.category.id,
        "Tuna Roll",
        "10.99",
        Difficulty::Medium,
        &[rice.id],
    );
    query::add_review(&mut f.conn, with_rice.id, f.cook.id, "good").unwrap();

    let response =
        dish_list(&mut f.conn, f.category.id, &form(&[("query", "rice")])).unwrap();
    let dishes = context(&response).get("dishes").unwrap();
    assert_eq!(dishes.as_array().unwrap().len(), 1);
    assert_eq!(dishes[0]["name"], "Tuna Roll");
    assert_eq!(dishes[0]["review_count"], 1);
    assert_eq!(dishes[0]["ingredients"], serde_json::json!(["rice"]));
    assert_eq!(dishes[0]["difficulty_display"], "Required some skills");
}

#[test]
fn dish_list_unknown_category_is_empty() {
    let mut f = fixture();
    let response = dish_list(&mut f.conn, CategoryId::new(999), &FormData::new()).unwrap();
    assert_eq!(context(&response).get("dishes").unwrap(), &serde_json::json!([]));
    assert_eq!(context(&response).get("category_pk").unwrap(), 999);
}

#[test]
fn detail_shows_dish_and_reviews() {
    let mut f = fixture();
    let one = cook(&mut f.conn, "user1", "Zoe");
    let two = cook(&mut f.conn, "user2", "Abe");
    query::add_review(&mut f.conn, f.dish.id, one.id, "Review 1").unwrap();
    query::add_review(&mut f.conn, f.dish.id, two.id, "Review 2").unwrap();

    let response = dish_detail(&mut f.conn, None, f.dish.id).unwrap();
    let ctx = context(&response);
    assert_eq!(ctx.get("dish").unwrap()["name"], "Test Dish 1");
    assert_eq!(ctx.get("dish").unwrap()["price"], "10.99");
    let reviews = ctx.get("reviews").unwrap().as_array().unwrap();
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews[0]["content"], "Review 2");
    assert!(ctx.get("form").is_some());
    assert_eq!(ctx.get("user").unwrap(), &Value::Null);
}

#[test]
fn detail_unknown_dish_not_found() {
    let mut f = fixture();
    assert!(matches!(
        dish_detail(&mut f.conn, None, DishId::new(99999)),
        Err(Error::NotFound)
    ));
    assert!(matches!(
        add_review(&mut f.conn, Some(&f.cook), DishId::new(99999), &FormData::new()),
        Err(Error::NotFound)
    ));
}

#[test]
fn add_review_when_logged_in() {
    let mut f = fixture();
    let response = add_review(
        &mut f.conn,
        Some(&f.cook),
        f.dish.id,
        &form(&[("content", "New review content")]),
    )
    .unwrap();
    assert_eq!(response.location(), Some(dish_detail_url(f.dish.id).as_str()));
    assert_eq!(count_reviews(&mut f.conn), 1);
    let reviews = query::dish_reviews(&mut f.conn, f.dish.id).unwrap();
    assert_eq!(reviews[0].0.content, "New review content");
}

#[test]
fn anonymous_review_rejected() {
    let mut f = fixture();
    let response = add_review(
        &mut f.conn,
        None,
        f.dish.id,
        &form(&[("content", "sneaky")]),
    )
    .unwrap();
    assert_eq!(
        response,
        Response::Redirect {
            location: dish_detail_url(f.dish.id),
            message: Some(Message::error("Please log in before adding reviews.")),
            session: None,
        }
    );
    assert_eq!(count_reviews(&mut f.conn), 0);
}

#[test]
fn blank_review_rejected() {
    let mut f = fixture();
    let response =
        add_review(&mut f.conn, Some(&f.cook), f.dish.id, &form(&[("content", "")])).unwrap();
    assert!(matches!(
        response,
        Response::Redirect { message: Some(Message { level: Level::Error, .. }), .. }
    ));
    assert_eq!(count_reviews(&mut f.conn), 0);
}

#[test]
fn create_form_requires_login() {
    let mut f = fixture();
    let response = dish_create_form(&mut f.conn, None, f.category.id).unwrap();
    assert_eq!(
        response.location(),
        Some(format!("/accounts/login/?next=/categories/{}/dishes/create/", f.category.id).as_str())
    );

    let response = dish_create_form(&mut f.conn, Some(&f.cook), f.category.id).unwrap();
    let ctx = context(&response);
    assert!(ctx.get("form").is_some());
    assert_eq!(ctx.get("category_pk").unwrap(), &serde_json::json!(f.category.id));
    assert_eq!(ctx.get("is_update_view").unwrap(), false);
}

#[test]
fn create_dish_links_ingredients_in_order() {
    let mut f = fixture();
    let a = query::add_ingredient(&mut f.conn, "avocado").unwrap();
    let b = query::add_ingredient(&mut f.conn, "nori").unwrap();
    let c = query::add_ingredient(&mut f.conn, "tuna").unwrap();
    let ids = [c.id, a.id, b.id].map(|i| i.to_string());

    let response = dish_create(
        &mut f.conn,
        Some(&f.cook),
        f.category.id,
        &dish_form(f.category.id, &ids),
    )
    .unwrap();
    assert_eq!(response.location(), Some(dish_list_url(f.category.id).as_str()));
    assert_eq!(count_dishes(&mut f.conn), 2);

    let created = query::search_dishes(&mut f.conn, f.category.id, Some("Created"))
        .unwrap()
        .remove(0);
    let linked: Vec<_> = query::dish_ingredients(&mut f.conn, created.id)
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(linked, vec![c.id, a.id, b.id]);
}

#[test]
fn create_dish_invalid_form_rerendered() {
    let mut f = fixture();
    let mut data = dish_form(f.category.id, &[]);
    data.push("name", "");
    let response = dish_create(&mut f.conn, Some(&f.cook), f.category.id, &data).unwrap();
    let errors = &context(&response).get("form").unwrap()["errors"];
    assert!(errors.get("name").is_some());
    assert!(errors.get("ingredients").is_some());
    assert_eq!(count_dishes(&mut f.conn), 1);
}

#[test]
fn create_in_unknown_category_not_found() {
    let mut f = fixture();
    assert!(matches!(
        dish_create_form(&mut f.conn, Some(&f.cook), CategoryId::new(999)),
        Err(Error::NotFound)
    ));
}

#[test]
fn update_form_prefilled() {
    let mut f = fixture();
    let response = dish_update_form(&mut f.conn, Some(&f.cook), f.dish.id).unwrap();
    let ctx = context(&response);
    assert_eq!(ctx.get("is_update_view").unwrap(), true);
    assert_eq!(ctx.get("category_pk").unwrap(), &serde_json::json!(f.category.id));
    assert_eq!(ctx.get("form").unwrap()["data"]["name"], "Test Dish 1");
}

#[test]
fn update_requires_login() {
    let mut f = fixture();
    let response = dish_update(
        &mut f.conn,
        None,
        f.dish.id,
        &dish_form(f.category.id, &[]),
    )
    .unwrap();
    assert!(response.location().unwrap().starts_with(LOGIN_URL));
    assert_eq!(query::get_dish(&mut f.conn, f.dish.id).unwrap().name, "Test Dish 1");
}

#[test]
fn update_replaces_fields_and_ingredients() {
    let mut f = fixture();
    let a = query::add_ingredient(&mut f.conn, "avocado").unwrap();
    let b = query::add_ingredient(&mut f.conn, "nori").unwrap();
    query::update_dish(
        &mut f.conn,
        f.dish.id,
        &NewDish {
            name: &f.dish.name,
            price: f.dish.price,
            cooking_time: f.dish.cooking_time,
            spicy: f.dish.spicy,
            difficulty: f.dish.difficulty,
            category_id: f.dish.category_id,
            recipe: &f.dish.recipe,
            image: None,
        },
        &[a.id],
    )
    .unwrap();

    let response = dish_update(
        &mut f.conn,
        Some(&f.cook),
        f.dish.id,
        &dish_form(f.category.id, &[b.id.to_string()]),
    )
    .unwrap();
    assert_eq!(response.location(), Some(dish_detail_url(f.dish.id).as_str()));

    let updated = query::get_dish(&mut f.conn, f.dish.id).unwrap();
    assert_eq!(updated.name, "Created Dish");
    assert_eq!(updated.difficulty, Difficulty::Hard);
    assert_eq!(updated.price.to_string(), "15.99");
    let linked: Vec<_> = query::dish_ingredients(&mut f.conn, f.dish.id)
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(linked, vec![b.id]);
}

#[test]
fn update_invalid_form_keeps_dish() {
    let mut f = fixture();
    let mut data = dish_form(f.category.id, &[]);
    data.push("price", "ten");
    let response = dish_update(&mut f.conn, Some(&f.cook), f.dish.id, &data).unwrap();
    let context = context(&response);
    assert_eq!(context.get("dish").unwrap()["name"], "Test Dish 1");
    assert_eq!(context.get("is_update_view"), Some(&Value::Bool(true)));
    assert!(context.get("form").unwrap()["errors"].get("price").is_some());
    assert_eq!(query::get_dish(&mut f.conn, f.dish.id).unwrap().name, "Test Dish 1");
}

#[test]
fn update_can_move_dish() {
    let mut f = fixture();
    let soup = query::add_category(&mut f.conn, DishType::Soup, None).unwrap();
    let rice = query::add_ingredient(&mut f.conn, "rice").unwrap();
    dish_update(
        &mut f.conn,
        Some(&f.cook),
        f.dish.id,
        &dish_form(soup.id, &[rice.id.to_string()]),
    )
    .unwrap();
    assert_eq!(query::get_dish(&mut f.conn, f.dish.id).unwrap().category_id, soup.id);
}

#[test]
fn delete_confirm_and_delete() {
    let mut f = fixture();
    query::add_review(&mut f.conn, f.dish.id, f.cook.id, "bye").unwrap();

    let response = dish_delete_confirm(&mut f.conn, Some(&f.cook), f.dish.id).unwrap();
    assert_eq!(context(&response).get("dish").unwrap()["name"], "Test Dish 1");

    let response = dish_delete(&mut f.conn, Some(&f.cook), f.dish.id).unwrap();
    assert_eq!(response.location(), Some(dish_list_url(f.category.id).as_str()));
    assert_eq!(count_dishes(&mut f.conn), 0);
    assert_eq!(count_reviews(&mut f.conn), 0);

    assert!(matches!(
        dish_delete(&mut f.conn, Some(&f.cook), f.dish.id),
        Err(Error::NotFound)
    ));
}

#[test]
fn delete_requires_login() {
    let mut f = fixture();
    let response = dish_delete(&mut f.conn, None, f.dish.id).unwrap();
    assert!(response.location().unwrap().starts_with(LOGIN_URL));
    assert_eq!(count_dishes(&mut f.conn), 1);
}

#[test]
fn review_delete_rules() {
    let mut f = fixture();
    let review = query::add_review(&mut f.conn, f.dish.id, f.cook.id, "Test Review").unwrap();
    let other = cook(&mut f.conn, "other", "Other");

    let response = delete_review(&mut f.conn, None, review.id).unwrap();
    assert!(response.location().unwrap().starts_with(LOGIN_URL));
    assert_eq!(count_reviews(&mut f.conn), 1);

    // Anonymous visitors are sent to log in before the review is even looked up.
    let response = delete_review(&mut f.conn, None, ReviewId::new(99999)).unwrap();
    assert!(response.location().unwrap().starts_with(LOGIN_URL));

    assert!(matches!(
        delete_review(&mut f.conn, Some(&f.cook), ReviewId::new(99999)),
        Err(Error::NotFound)
    ));

    let response = delete_review(&mut f.conn, Some(&other), review.id).unwrap();
    assert_eq!(response.location(), Some(dish_detail_url(f.dish.id).as_str()));
    assert_eq!(count_reviews(&mut f.conn), 1);

    let response = delete_review(&mut f.conn, Some(&f.cook), review.id).unwrap();
    assert_eq!(response.location(), Some(dish_detail_url(f.dish.id).as_str()));
    assert_eq!(count_reviews(&mut f.conn), 0);
}

#[test]
fn profile_page_for_logged_in_cook() {
    let f = fixture();
    let response = profile(Some(&f.cook)).unwrap();
    let Response::Render { template, context } = response else {
        panic!("expected a rendered page");
    };
    assert_eq!(template, "tasty_ideas/user_profile.html");
    assert_eq!(context.get("user").unwrap()["username"], "test_user");
    assert!(context.get("user").unwrap().get("password").is_none());
    assert_eq!(context.get("form").unwrap()["data"]["username"], "test_user");

    let response = profile(None).unwrap();
    assert_eq!(response.location(), Some("/accounts/login/?next=/profile/"));
}

#[test]
fn profile_update_saves_fields_and_password() {
    let mut f = fixture();
    let response = profile_update(
        &mut f.conn,
        Some(&f.cook),
        &form(&[
            ("username", "new_test_user"),
            ("first_name", "New"),
            ("last_name", "User"),
            ("password1", "newpassword"),
            ("password2", "newpassword"),
            ("email", "newtest@example.com"),
        ]),
    )
    .unwrap();
    assert_eq!(response.location(), Some(PROFILE_URL));

    let updated = query::get_cook(&mut f.conn, f.cook.id).unwrap();
    assert_eq!(updated.username, "new_test_user");
    assert_eq!(updated.first_name, "New");
    assert_eq!(updated.email, "newtest@example.com");
    assert!(auth::verify_password(&updated.password, "newpassword"));
}

#[test]
fn password_change_closes_other_sessions() {
    let mut f = fixture();
    let elsewhere = auth::open_session(&mut f.conn, f.cook.id).unwrap();
    let response = profile_update(
        &mut f.conn,
        Some(&f.cook),
        &form(&[
            ("username", "test_user"),
            ("password1", "freshpassword"),
            ("password2", "freshpassword"),
        ]),
    )
    .unwrap();
    assert!(matches!(
        response,
        Response::Redirect { session: Some(SessionChange::LogIn(id)), .. } if id == f.cook.id
    ));
    assert!(auth::session_cook(&mut f.conn, &elsewhere).unwrap().is_none());

    let kept = auth::open_session(&mut f.conn, f.cook.id).unwrap();
    let response = profile_update(
        &mut f.conn,
        Some(&f.cook),
        &form(&[("username", "test_user"), ("first_name", "Renamed")]),
    )
    .unwrap();
    assert!(matches!(response, Response::Redirect { session: None, .. }));
    assert!(auth::session_cook(&mut f.conn, &kept).unwrap().is_some());
}

#[test]
fn profile_update_without_password_keeps_it() {
    let mut f = fixture();
    profile_update(
        &mut f.conn,
        Some(&f.cook),
        &form(&[("username", "test_user"), ("first_name", "Renamed")]),
    )
    .unwrap();
    let updated = query::get_cook(&mut f.conn, f.cook.id).unwrap();
    assert_eq!(updated.first_name, "Renamed");
    assert_eq!(updated.password, f.cook.password);
}

#[test]
fn profile_update_invalid() {
    let mut f = fixture();
    let response = profile_update(
        &mut f.conn,
        Some(&f.cook),
        &form(&[
            ("username", ""),
            ("first_name", "New"),
            ("password1", "newpassword"),
            ("password2", "newpassword"),
        ]),
    )
    .unwrap();
    let errors = &context(&response).get("form").unwrap()["errors"];
    assert_eq!(errors["username"], serde_json::json!(["This field is required."]));
    assert_eq!(query::get_cook(&mut f.conn, f.cook.id).unwrap().first_name, "Test");
}

#[test]
fn signup_then_login() {
    let mut conn = test_connection();
    let response = signup(
        &mut conn,
        &form(&[
            ("username", "newcook"),
            ("email", "newcook@example.com"),
            ("password1", "strongpassword123"),
            ("password2", "strongpassword123"),
        ]),
    )
    .unwrap();
    assert_eq!(response.location(), Some(LOGIN_URL));

    let response = login(
        &mut conn,
        &form(&[("next", "/profile/")]),
        &form(&[("username", "newcook"), ("password", "strongpassword123")]),
    )
    .unwrap();
    let Response::Redirect {
        location, session, ..
    } = response
    else {
        panic!("expected a redirect");
    };
    assert_eq!(location, "/profile/");
    assert!(matches!(session, Some(SessionChange::LogIn(_))));
}

#[test]
fn login_rejects_bad_credentials() {
    let mut conn = test_connection();
    let response = login(
        &mut conn,
        &FormData::new(),
        &form(&[("username", "nobody"), ("password", "whatever1")]),
    )
    .unwrap();
    let errors = &context(&response).get("form").unwrap()["errors"];
    assert!(errors.get("__all__").is_some());
}

#[test]
fn login_ignores_offsite_next() {
    assert_eq!(safe_next(Some("//evil.example/")), INDEX_URL);
    assert_eq!(safe_next(Some("https://evil.example/")), INDEX_URL);
    assert_eq!(safe_next(Some("/\\evil.example/")), INDEX_URL);
    assert_eq!(safe_next(Some("\\evil.example/")), INDEX_URL);
    assert_eq!(safe_next(Some("/\tevil.example/")), INDEX_URL);
    assert_eq!(safe_next(Some("/dishes/1/\n")), INDEX_URL);
    assert_eq!(safe_next(Some("")), INDEX_URL);
    assert_eq!(safe_next(Some("/dishes/1/")), "/dishes/1/");
    assert_eq!(safe_next(None), INDEX_URL);

    let mut conn = test_connection();
    auth::register(
        &mut conn,
        &auth::Registration {
            username: "ann",
            first_name: "Ann",
            last_name: "",
            email: "",
            password: Some("strongpassword123"),
            experience: 0,
        },
    )
    .unwrap();
    let response = login(
        &mut conn,
        &form(&[("next", "/\\evil.example/")]),
        &form(&[("username", "ann"), ("password", "strongpassword123")]),
    )
    .unwrap();
    assert_eq!(response.location(), Some(INDEX_URL));
}

#[test]
fn logout_closes_session() {
    let response = logout(None).unwrap();
    assert!(matches!(
        response,
        Response::Redirect { session: Some(SessionChange::LogOut), .. }
    ));
}
