use crate::database;
use crate::database::models::{
    Amount, CategoryId, Cook, CookId, Difficulty, Dish, Ingredient, IngredientId, Spiciness,
};
use crate::query;
use crate::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use url::Url;
use validator::ValidateEmail;

pub const REQUIRED: &str = "This field is required.";
pub const PASSWORD_MISMATCH: &str = "The two password fields didn't match.";
pub const USERNAME_TAKEN: &str = "A user with that username already exists.";
pub const MIN_PASSWORD_LEN: usize = 8;

const SEARCH_MAX_LEN: usize = 255;
const NAME_MAX_LEN: usize = 100;
const USERNAME_MAX_LEN: usize = 150;
const PERSON_NAME_MAX_LEN: usize = 150;
const EMAIL_MAX_LEN: usize = 254;
const URL_MAX_LEN: usize = 200;

/// Field name to the messages explaining why its value was refused.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub type Validation<T> = std::result::Result<T, FieldErrors>;

/// Submitted fields in the order they arrived. A field may repeat (multiple choice).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FormData(Vec<(String, String)>);

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.push((field.into(), value.into()));
    }

    /// The last value submitted for `field`.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == field)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k == field)
            .map(|(_, v)| v.as_str())
    }

    /// Redisplay values for a form context. Password fields are never echoed back; fields listed
    /// in `multi` are always lists.
    pub fn to_context(&self, multi: &[&str]) -> Value {
        let mut data = Map::new();
        for (field, value) in &self.0 {
            if field.starts_with("password") {
                continue;
            }
            if multi.contains(&field.as_str()) {
                let entry = data
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(vec![]));
                if let Value::Array(values) = entry {
                    values.push(Value::String(value.clone()));
                }
            } else {
                data.insert(field.clone(), Value::String(value.clone()));
            }
        }
        Value::Object(data)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// What a template needs to draw a form: the values to show and the errors next to them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormContext {
    pub data: Value,
    pub errors: FieldErrors,
}

impl FormContext {
    pub fn empty() -> Self {
        Self {
            data: json!({}),
            errors: FieldErrors::new(),
        }
    }

    pub fn bound(data: &FormData, multi: &[&str], errors: FieldErrors) -> Self {
        Self {
            data: data.to_context(multi),
            errors,
        }
    }

    pub fn initial(data: Value) -> Self {
        Self {
            data,
            errors: FieldErrors::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub value: String,
    pub label: String,
}

impl Choice {
    pub fn spiciness() -> Vec<Self> {
        Spiciness::iter()
            .map(|s| Choice {
                value: s.as_ref().into(),
                label: s.to_string(),
            })
            .collect()
    }

    pub fn difficulty() -> Vec<Self> {
        Difficulty::iter()
            .map(|d| Choice {
                value: d.as_ref().into(),
                label: d.to_string(),
            })
            .collect()
    }

    pub fn ingredients(ingredients: &[Ingredient]) -> Vec<Self> {
        ingredients
            .iter()
            .map(|i| Choice {
                value: i.id.to_string(),
                label: i.name.clone(),
            })
            .collect()
    }
}

/// Walks a submission field by field, normalizing values and collecting errors.
struct Cleaner<'a> {
    data: &'a FormData,
    errors: FieldErrors,
}

impl<'a> Cleaner<'a> {
    fn new(data: &'a FormData) -> Self {
        Self {
            data,
            errors: FieldErrors::new(),
        }
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    fn has_error(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    /// Trimmed value, or `None` when blank or missing.
    fn raw(&self, field: &str) -> Option<&'a str> {
        let data: &'a FormData = self.data;
        data.get(field)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn max_len(&mut self, field: &str, value: &str, max: usize) -> bool {
        let len = value.chars().count();
        if len > max {
            self.error(
                field,
                format!("Ensure this value has at most {max} characters (it has {len})."),
            );
            return false;
        }
        true
    }

    fn required_text(&mut self, field: &str, max: Option<usize>) -> Option<String> {
        let Some(value) = self.raw(field) else {
            self.error(field, REQUIRED);
            return None;
        };
        if let Some(max) = max {
            if !self.max_len(field, value, max) {
                return None;
            }
        }
        Some(value.to_owned())
    }

    /// Blank optional text becomes the empty string.
    fn optional_text(&mut self, field: &str, max: usize) -> Option<String> {
        let value = self.raw(field).unwrap_or("");
        self.max_len(field, value, max).then(|| value.to_owned())
    }

    fn choice<T: FromStr>(&mut self, field: &str) -> Option<T> {
        let value = self.raw(field);
        let Some(value) = value else {
            self.error(field, REQUIRED);
            return None;
        };
        let parsed = value.parse().ok();
        if parsed.is_none() {
            self.error(
                field,
                format!("Select a valid choice. {value} is not one of the available choices."),
            );
        }
        parsed
    }

    fn amount(&mut self, field: &str) -> Option<Amount> {
        let Some(value) = self.raw(field) else {
            self.error(field, REQUIRED);
            return None;
        };
        match clean_amount(value) {
            Ok(amount) => Some(amount),
            Err(message) => {
                self.error(field, message);
                None
            }
        }
    }

    fn optional_url(&mut self, field: &str) -> Option<Option<String>> {
        let Some(value) = self.raw(field) else {
            return Some(None);
        };
        if !self.max_len(field, value, URL_MAX_LEN) {
            return None;
        }
        if !is_url(value) {
            self.error(field, "Enter a valid URL.");
            return None;
        }
        Some(Some(value.to_owned()))
    }

    fn optional_email(&mut self, field: &str) -> Option<String> {
        let value = self.optional_text(field, EMAIL_MAX_LEN)?;
        if !value.is_empty() && !is_email(&value) {
            self.error(field, "Enter a valid email address.");
            return None;
        }
        Some(value)
    }

    fn optional_id(&mut self, field: &str) -> Option<Option<i32>> {
        let Some(value) = self.raw(field) else {
            return Some(None);
        };
        match value.parse() {
            Ok(id) => Some(Some(id)),
            Err(_) => {
                self.error(
                    field,
                    "Select a valid choice. That choice is not one of the available choices.",
                );
                None
            }
        }
    }

    /// Ids chosen for a required multiple-choice field, de-duplicated, in submitted order.
    fn ids(&mut self, field: &str) -> Option<Vec<i32>> {
        let data: &'a FormData = self.data;
        let mut ids = vec![];
        for value in data.get_all(field).map(str::trim).filter(|v| !v.is_empty()) {
            match value.parse::<i32>() {
                Ok(id) if !ids.contains(&id) => ids.push(id),
                Ok(_) => {}
                Err(_) => {
                    self.error(field, format!("“{value}” is not a valid value."));
                    return None;
                }
            }
        }
        if ids.is_empty() {
            self.error(field, REQUIRED);
            return None;
        }
        Some(ids)
    }

    fn finish<T>(self, value: Option<T>) -> Validation<T> {
        match value {
            Some(value) if self.errors.is_empty() => Ok(value),
            _ => Err(self.errors),
        }
    }
}

fn clean_amount(value: &str) -> std::result::Result<Amount, String> {
    let parsed = Decimal::from_str(value).map_err(|_| "Enter a number.".to_owned())?;
    if parsed < Decimal::ZERO {
        return Err("Ensure this value is greater than or equal to 0.".into());
    }
    let mut normalized = parsed.normalize();
    if normalized.scale() > Amount::DECIMAL_PLACES {
        return Err(format!(
            "Ensure that there are no more than {} decimal places.",
            Amount::DECIMAL_PLACES
        ));
    }
    let whole_digits = normalized.trunc().to_string().trim_start_matches('0').len() as u32;
    let max_whole = Amount::MAX_DIGITS - Amount::DECIMAL_PLACES;
    if whole_digits > max_whole {
        return Err(format!(
            "Ensure that there are no more than {max_whole} digits before the decimal point."
        ));
    }
    normalized.rescale(Amount::DECIMAL_PLACES);
    Ok(Amount::new(normalized))
}

fn is_url(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    // The parser drops extra slashes before the host; a missing host is still refused.
    match value.split_once("://") {
        Some((_, rest)) if !rest.starts_with('/') => {}
        _ => return false,
    }
    match Url::parse(value) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

/// Dotless domains other than `localhost` are refused.
fn is_email(value: &str) -> bool {
    value.validate_email()
        && value
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain.contains('.') || domain == "localhost")
}

fn is_username(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
}

/// A single optional search box (`query` on dish listings, `name` on the index).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchForm {
    pub value: Option<String>,
    pub context: FormContext,
}

impl SearchForm {
    pub const DISH_FIELD: &'static str = "query";
    pub const CATEGORY_FIELD: &'static str = "name";

    /// An overlong term is reported and ignored rather than searched for.
    pub fn clean(data: &FormData, field: &str) -> Self {
        let mut cleaner = Cleaner::new(data);
        let value = cleaner
            .optional_text(field, SEARCH_MAX_LEN)
            .filter(|v| !v.is_empty());
        Self {
            value,
            context: FormContext::bound(data, &[], cleaner.errors),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewForm {
    pub content: String,
}

impl ReviewForm {
    pub fn clean(data: &FormData) -> Validation<Self> {
        let mut cleaner = Cleaner::new(data);
        let content = cleaner.required_text("content", None);
        cleaner.finish(content.map(|content| Self { content }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DishForm {
    pub name: String,
    pub price: Amount,
    pub cooking_time: Amount,
    pub spicy: Spiciness,
    pub difficulty: Difficulty,
    pub recipe: String,
    pub image: Option<String>,
    pub category: Option<CategoryId>,
    pub ingredients: Vec<IngredientId>,
}

impl DishForm {
    pub const MULTI: &'static [&'static str] = &["ingredients"];

    /// Checks field shapes first, then that the chosen category and ingredients exist.
    pub fn clean(conn: &mut database::Connection, data: &FormData) -> Result<Validation<Self>> {
        let mut cleaner = Cleaner::new(data);
        let name = cleaner.required_text("name", Some(NAME_MAX_LEN));
        let price = cleaner.amount("price");
        let cooking_time = cleaner.amount("cooking_time");
        let spicy = cleaner.choice::<Spiciness>("spicy");
        let difficulty = cleaner.choice::<Difficulty>("difficulty");
        let recipe = cleaner.required_text("recipe", None);
        let image = cleaner.optional_url("image");

        let category = match cleaner.optional_id("category") {
            Some(Some(id)) => {
                let id = CategoryId::new(id);
                if query::category_exists(conn, id)? {
                    Some(Some(id))
                } else {
                    cleaner.error(
                        "category",
                        "Select a valid choice. That choice is not one of the available choices.",
                    );
                    None
                }
            }
            other => other.map(|id| id.map(CategoryId::new)),
        };

        let ingredients = match cleaner.ids("ingredients") {
            Some(ids) => {
                let ids: Vec<_> = ids.into_iter().map(IngredientId::new).collect();
                let existing = query::existing_ingredients(conn, &ids)?;
                match ids.iter().find(|id| !existing.contains(id)) {
                    Some(missing) => {
                        cleaner.error(
                            "ingredients",
                            format!(
                                "Select a valid choice. {missing} is not one of the available choices."
                            ),
                        );
                        None
                    }
                    None => Some(ids),
                }
            }
            None => None,
        };

        let form = match (
            name,
            price,
            cooking_time,
            spicy,
            difficulty,
            recipe,
            image,
            category,
            ingredients,
        ) {
            (
                Some(name),
                Some(price),
                Some(cooking_time),
                Some(spicy),
                Some(difficulty),
                Some(recipe),
                Some(image),
                Some(category),
                Some(ingredients),
            ) => Some(Self {
                name,
                price,
                cooking_time,
                spicy,
                difficulty,
                recipe,
                image,
                category,
                ingredients,
            }),
            _ => None,
        };
        Ok(cleaner.finish(form))
    }

    /// Values for an edit form showing `dish` as it is stored.
    pub fn initial(dish: &Dish, ingredients: &[Ingredient]) -> Value {
        json!({
            "name": dish.name,
            "price": dish.price,
            "cooking_time": dish.cooking_time,
            "spicy": dish.spicy,
            "difficulty": dish.difficulty,
            "recipe": dish.recipe,
            "image": dish.image,
            "category": dish.category_id,
            "ingredients": ingredients.iter().map(|i| i.id.to_string()).collect::<Vec<_>>(),
        })
    }
}

/// Identity fields shared by sign-up and the profile page.
#[derive(Debug, Clone, PartialEq)]
pub struct CookForm {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// New password, when one was given.
    pub password: Option<String>,
}

impl CookForm {
    /// Account creation: a password is required.
    pub fn clean_signup(conn: &mut database::Connection, data: &FormData) -> Result<Validation<Self>> {
        Self::clean(conn, data, None, true)
    }

    /// Profile edit for `cook`: the password only changes when one is entered.
    pub fn clean_profile(
        conn: &mut database::Connection,
        data: &FormData,
        cook: &Cook,
    ) -> Result<Validation<Self>> {
        Self::clean(conn, data, Some(cook.id), false)
    }

    pub fn initial(cook: &Cook) -> Value {
        json!({
            "username": cook.username,
            "first_name": cook.first_name,
            "last_name": cook.last_name,
            "email": cook.email,
        })
    }

    fn clean(
        conn: &mut database::Connection,
        data: &FormData,
        editing: Option<CookId>,
        password_required: bool,
    ) -> Result<Validation<Self>> {
        let mut cleaner = Cleaner::new(data);

        let mut username = cleaner.required_text("username", Some(USERNAME_MAX_LEN));
        if let Some(name) = &username {
            if !is_username(name) {
                cleaner.error(
                    "username",
                    "Enter a valid username. This value may contain only letters, numbers, and \
                     @/./+/-/_ characters.",
                );
                username = None;
            } else if query::username_taken(conn, name, editing)? {
                cleaner.error("username", USERNAME_TAKEN);
                username = None;
            }
        }
        let first_name = cleaner.optional_text("first_name", PERSON_NAME_MAX_LEN);
        let last_name = cleaner.optional_text("last_name", PERSON_NAME_MAX_LEN);
        let email = cleaner.optional_email("email");
        let password = clean_password(&mut cleaner, username.as_deref(), password_required);

        let form = match (username, first_name, last_name, email, password) {
            (Some(username), Some(first_name), Some(last_name), Some(email), Some(password)) => {
                Some(Self {
                    username,
                    first_name,
                    last_name,
                    email,
                    password,
                })
            }
            _ => None,
        };
        Ok(cleaner.finish(form))
    }
}

/// `Some(None)` when no password change was asked for.
fn clean_password(
    cleaner: &mut Cleaner<'_>,
    username: Option<&str>,
    required: bool,
) -> Option<Option<String>> {
    // Passwords are taken verbatim; whitespace is significant.
    let data = cleaner.data;
    let password1 = data.get("password1").unwrap_or("");
    let password2 = data.get("password2").unwrap_or("");

    if password1.is_empty() && password2.is_empty() && !required {
        return Some(None);
    }
    if password1.is_empty() {
        cleaner.error("password1", REQUIRED);
    }
    if password2.is_empty() {
        cleaner.error("password2", REQUIRED);
    }
    if cleaner.has_error("password1") || cleaner.has_error("password2") {
        return None;
    }
    if password1 != password2 {
        cleaner.error("password2", PASSWORD_MISMATCH);
        return None;
    }

    let problems = password_problems(password1, username);
    if !problems.is_empty() {
        for problem in problems {
            cleaner.error("password2", problem);
        }
        return None;
    }
    Some(Some(password1.to_owned()))
}

/// Why `password` is too weak for an account named `username`; empty when it is acceptable.
pub fn password_problems(password: &str, username: Option<&str>) -> Vec<String> {
    let mut problems = vec![];
    if password.chars().count() < MIN_PASSWORD_LEN {
        problems.push(format!(
            "This password is too short. It must contain at least {MIN_PASSWORD_LEN} characters."
        ));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_owned());
    }
    if username.is_some_and(|u| u.eq_ignore_ascii_case(password)) {
        problems.push("The password is too similar to the username.".to_owned());
    }
    problems
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

impl LoginForm {
    pub fn clean(data: &FormData) -> Validation<Self> {
        let mut cleaner = Cleaner::new(data);
        let username = cleaner.required_text("username", Some(USERNAME_MAX_LEN));
        let password = match data.get("password").filter(|p| !p.is_empty()) {
            Some(p) => Some(p.to_owned()),
            None => {
                cleaner.error("password", REQUIRED);
                None
            }
        };
        let form = username
            .zip(password)
            .map(|(username, password)| Self { username, password });
        cleaner.finish(form)
    }
}

#[cfg(test)]
use crate::database::models::DishType;
#[cfg(test)]
use crate::database::test_connection;
#[cfg(test)]
use crate::query::test_support;
#[cfg(test)]
use maplit::btreemap;

#[cfg(test)]
fn form(pairs: &[(&str, &str)]) -> FormData {
    pairs.iter().copied().collect()
}

#[cfg(test)]
fn errors(pairs: &[(&str, &str)]) -> FieldErrors {
    let mut errors = FieldErrors::new();
    for (field, message) in pairs {
        errors
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }
    errors
}

#[test]
fn search_form_values() {
    let data = form(&[("query", "Spicy")]);
    assert_eq!(
        SearchForm::clean(&data, SearchForm::DISH_FIELD).value.as_deref(),
        Some("Spicy")
    );

    let data = form(&[("query", "")]);
    let cleaned = SearchForm::clean(&data, SearchForm::DISH_FIELD);
    assert_eq!(cleaned.value, None);
    assert!(cleaned.context.errors.is_empty());

    let data = form(&[("name", "Sushi")]);
    assert_eq!(
        SearchForm::clean(&data, SearchForm::CATEGORY_FIELD).value.as_deref(),
        Some("Sushi")
    );
}

#[test]
fn overlong_search_ignored() {
    let long = "a".repeat(256);
    let data = form(&[("query", &long)]);
    let cleaned = SearchForm::clean(&data, SearchForm::DISH_FIELD);
    assert_eq!(cleaned.value, None);
    assert!(cleaned.context.errors.contains_key("query"));
}

#[test]
fn review_requires_content() {
    assert_eq!(
        ReviewForm::clean(&form(&[("content", " Tasty ")])),
        Ok(ReviewForm {
            content: "Tasty".into()
        })
    );
    assert_eq!(
        ReviewForm::clean(&form(&[("content", "   ")])),
        Err(errors(&[("content", REQUIRED)]))
    );
}

#[test]
fn amounts() {
    assert_eq!(clean_amount("10.99").unwrap().to_string(), "10.99");
    assert_eq!(clean_amount("30").unwrap().to_string(), "30.00");
    assert_eq!(clean_amount("10.990").unwrap().to_string(), "10.99");
    assert_eq!(clean_amount("999999.99").unwrap().to_string(), "999999.99");
    assert!(clean_amount("1000000").is_err());
    assert!(clean_amount("1.234").is_err());
    assert!(clean_amount("-1").is_err());
    assert!(clean_amount("ten").is_err());
}

#[test]
fn urls_and_emails() {
    assert!(is_url("https://example.com/a.png"));
    assert!(is_url("http://example.com"));
    assert!(!is_url("example.com"));
    assert!(!is_url("https:///path"));
    assert!(!is_url("http://%%%/"));
    assert!(!is_url("ftp://example.com/a.png"));
    assert!(!is_url("http://exa mple.com"));
    assert!(is_email("cook@example.com"));
    assert!(is_email("cook@localhost"));
    assert!(!is_email("cook@example"));
    assert!(!is_email("@example.com"));
    assert!(!is_email("co ok@example.com"));
}

#[cfg(test)]
fn dish_data(category: &str, ingredients: &[&str]) -> FormData {
    let mut data = form(&[
        ("name", "Test Dish"),
        ("price", "10.99"),
        ("cooking_time", "30.0"),
        ("spicy", "easy"),
        ("category", category),
        ("difficulty", "easy"),
        ("recipe", "Test recipe"),
    ]);
    for i in ingredients {
        data.push("ingredients", *i);
    }
    data
}

#[test]
fn dish_form_valid() {
    let mut conn = test_connection();
    let sushi = query::add_category(&mut conn, DishType::Sushi, None).unwrap();
    let one = query::add_ingredient(&mut conn, "Ingredient 1").unwrap();
    let two = query::add_ingredient(&mut conn, "Ingredient 2").unwrap();

    let data = dish_data(
        &sushi.id.to_string(),
        &[&two.id.to_string(), &one.id.to_string(), &two.id.to_string()],
    );
    let cleaned = DishForm::clean(&mut conn, &data).unwrap().unwrap();
    assert_eq!(cleaned.name, "Test Dish");
    assert_eq!(cleaned.price.to_string(), "10.99");
    assert_eq!(cleaned.cooking_time.to_string(), "30.00");
    assert_eq!(cleaned.spicy, Spiciness::Easy);
    assert_eq!(cleaned.difficulty, Difficulty::Easy);
    assert_eq!(cleaned.category, Some(sushi.id));
    assert_eq!(cleaned.image, None);
    assert_eq!(cleaned.ingredients, vec![two.id, one.id]);
}

#[test]
fn dish_form_invalid() {
    let mut conn = test_connection();
    let sushi = query::add_category(&mut conn, DishType::Sushi, None).unwrap();
    let one = query::add_ingredient(&mut conn, "Ingredient 1").unwrap();

    let mut data = dish_data(&sushi.id.to_string(), &[&one.id.to_string(), "999"]);
    data.push("name", "");
    data.push("spicy", "mild");
    data.push("image", "not a url");

    let errs = DishForm::clean(&mut conn, &data).unwrap().unwrap_err();
    assert_eq!(
        errs,
        btreemap! {
            "image".to_owned() => vec!["Enter a valid URL.".to_owned()],
            "ingredients".to_owned() => vec![
                "Select a valid choice. 999 is not one of the available choices.".to_owned()
            ],
            "name".to_owned() => vec![REQUIRED.to_owned()],
            "spicy".to_owned() => vec![
                "Select a valid choice. mild is not one of the available choices.".to_owned()
            ],
        }
    );
}

#[test]
fn dish_form_requires_ingredients_and_known_category() {
    let mut conn = test_connection();
    let errs = DishForm::clean(&mut conn, &dish_data("12", &[]))
        .unwrap()
        .unwrap_err();
    assert!(errs.contains_key("category"));
    assert_eq!(errs["ingredients"], vec![REQUIRED.to_owned()]);
}

#[test]
fn dish_form_category_is_optional() {
    let mut conn = test_connection();
    let rice = query::add_ingredient(&mut conn, "rice").unwrap();
    let rice = rice.id.to_string();

    let cleaned = DishForm::clean(&mut conn, &dish_data("", &[&rice]))
        .unwrap()
        .unwrap();
    assert_eq!(cleaned.category, None);

    let errs = DishForm::clean(&mut conn, &dish_data("sushi", &[&rice]))
        .unwrap()
        .unwrap_err();
    assert_eq!(errs.keys().collect::<Vec<_>>(), ["category"]);
}

#[cfg(test)]
fn signup(pairs: &[(&str, &str)]) -> FormData {
    let mut data = form(&[
        ("username", "newcook"),
        ("first_name", "New"),
        ("last_name", "Cook"),
        ("email", "newcook@example.com"),
    ]);
    for (k, v) in pairs {
        data.push(*k, *v);
    }
    data
}

#[test]
fn cook_create_form() {
    let mut conn = test_connection();
    let data = signup(&[
        ("password1", "strongpassword123"),
        ("password2", "strongpassword123"),
    ]);
    let cleaned = CookForm::clean_signup(&mut conn, &data).unwrap().unwrap();
    assert_eq!(cleaned.username, "newcook");
    assert_eq!(cleaned.first_name, "New");
    assert_eq!(cleaned.last_name, "Cook");
    assert_eq!(cleaned.email, "newcook@example.com");
    assert_eq!(cleaned.password.as_deref(), Some("strongpassword123"));
}

#[test]
fn cook_create_form_mismatched_passwords() {
    let mut conn = test_connection();
    let data = signup(&[
        ("password1", "strongpassword123"),
        ("password2", "differentpassword"),
    ]);
    let errs = CookForm::clean_signup(&mut conn, &data).unwrap().unwrap_err();
    assert_eq!(errs, errors(&[("password2", PASSWORD_MISMATCH)]));
}

#[test]
fn cook_create_form_weak_password() {
    let mut conn = test_connection();
    let data = signup(&[("password1", "1234"), ("password2", "1234")]);
    let errs = CookForm::clean_signup(&mut conn, &data).unwrap().unwrap_err();
    assert_eq!(errs["password2"].len(), 2);

    let data = signup(&[]);
    let errs = CookForm::clean_signup(&mut conn, &data).unwrap().unwrap_err();
    assert_eq!(
        errs,
        errors(&[("password1", REQUIRED), ("password2", REQUIRED)])
    );
}

#[test]
fn password_rules() {
    assert!(password_problems("kombu-dashi", Some("sensei")).is_empty());
    assert!(password_problems("kombu-dashi", None).is_empty());
    assert_eq!(password_problems("12345678", None), ["This password is entirely numeric."]);
    assert_eq!(
        password_problems("Sensei01", Some("sensei01")),
        ["The password is too similar to the username."]
    );
    assert_eq!(password_problems("1234", None).len(), 2);
}

#[test]
fn cook_form_username_rules() {
    let mut conn = test_connection();
    let existing = test_support::cook(&mut conn, "taken", "Ann");
    let me = test_support::cook(&mut conn, "testcook", "Test");

    let data = form(&[("username", "taken")]);
    let errs = CookForm::clean_profile(&mut conn, &data, &me)
        .unwrap()
        .unwrap_err();
    assert_eq!(errs, errors(&[("username", USERNAME_TAKEN)]));

    let errs = CookForm::clean_profile(&mut conn, &form(&[("username", "")]), &me)
        .unwrap()
        .unwrap_err();
    assert_eq!(errs, errors(&[("username", REQUIRED)]));

    let errs = CookForm::clean_profile(&mut conn, &form(&[("username", "bad name!")]), &me)
        .unwrap()
        .unwrap_err();
    assert!(errs.contains_key("username"));

    // Keeping one's own name is fine.
    let data = form(&[("username", "taken"), ("email", "ann@example.com")]);
    let cleaned = CookForm::clean_profile(&mut conn, &data, &existing)
        .unwrap()
        .unwrap();
    assert_eq!(cleaned.password, None);
    assert_eq!(cleaned.email, "ann@example.com");
}

#[test]
fn login_form() {
    assert_eq!(
        LoginForm::clean(&form(&[("username", "cook"), ("password", "secret")])),
        Ok(LoginForm {
            username: "cook".into(),
            password: "secret".into()
        })
    );
    assert_eq!(
        LoginForm::clean(&form(&[("username", "cook")])),
        Err(errors(&[("password", REQUIRED)]))
    );
}

#[test]
fn context_hides_passwords() {
    let data = form(&[
        ("username", "cook"),
        ("password1", "secret"),
        ("ingredients", "1"),
        ("ingredients", "2"),
    ]);
    assert_eq!(
        data.to_context(DishForm::MULTI),
        json!({"username": "cook", "ingredients": ["1", "2"]})
    );
}
