// Copyright 2023 Remi Bernotavicius

use crate::database;
use crate::database::models::{
    Category, CategoryId, Cook, CookId, Dish, DishId, DishType, Ingredient, IngredientId,
    NewCategory, NewCook, NewDish, NewReview, NewSession, Review, ReviewId,
};
use crate::Result;
use diesel::dsl::count_star;
use diesel::prelude::OptionalExtension as _;
use diesel::BoolExpressionMethods as _;
use diesel::Connection as _;
use diesel::ExpressionMethods as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;
use std::collections::HashMap;

/// Builds a `LIKE` pattern matching `query` anywhere, with wildcards in `query` taken literally.
fn contains_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

pub fn add_category(
    conn: &mut database::Connection,
    new_dish_type: DishType,
    new_image: Option<&str>,
) -> Result<Category> {
    use database::schema::categories::dsl::*;
    use diesel::insert_into;

    Ok(insert_into(categories)
        .values(NewCategory {
            dish_type: new_dish_type,
            image: new_image,
        })
        .returning(Category::as_returning())
        .get_result(conn)?)
}

pub fn get_category(conn: &mut database::Connection, category_id: CategoryId) -> Result<Category> {
    use database::schema::categories::dsl::*;

    Ok(categories
        .find(category_id)
        .select(Category::as_select())
        .get_result(conn)?)
}

/// Every category ordered by dish type, with how many dishes each holds.
pub fn list_categories(conn: &mut database::Connection) -> Result<Vec<(Category, i64)>> {
    use database::schema::{categories, dishes};

    let counts: HashMap<CategoryId, i64> = dishes::table
        .group_by(dishes::category_id)
        .select((dishes::category_id, count_star()))
        .load::<(CategoryId, i64)>(conn)?
        .into_iter()
        .collect();

    Ok(categories::table
        .select(Category::as_select())
        .order((categories::dish_type.asc(), categories::id.asc()))
        .load(conn)?
        .into_iter()
        .map(|c| {
            let count = counts.get(&c.id).copied().unwrap_or(0);
            (c, count)
        })
        .collect())
}

/// Deletes the category along with its dishes. Returns false if there was nothing to delete.
pub fn delete_category(conn: &mut database::Connection, delete_id: CategoryId) -> Result<bool> {
    use database::schema::categories::dsl::*;
    use diesel::delete;

    Ok(delete(categories.filter(id.eq(delete_id))).execute(conn)? > 0)
}

pub fn add_ingredient(conn: &mut database::Connection, new_name: &str) -> Result<Ingredient> {
    use database::schema::ingredients::dsl::*;
    use diesel::insert_into;

    Ok(insert_into(ingredients)
        .values(name.eq(new_name))
        .returning(Ingredient::as_returning())
        .get_result(conn)?)
}

pub fn list_ingredients(conn: &mut database::Connection) -> Result<Vec<Ingredient>> {
    use database::schema::ingredients::dsl::*;

    Ok(ingredients
        .select(Ingredient::as_select())
        .order(name.asc())
        .load(conn)?)
}

/// The subset of `wanted` that names existing ingredients.
pub fn existing_ingredients(
    conn: &mut database::Connection,
    wanted: &[IngredientId],
) -> Result<Vec<IngredientId>> {
    use database::schema::ingredients::dsl::*;

    Ok(ingredients
        .select(id)
        .filter(id.eq_any(wanted.to_vec()))
        .load(conn)?)
}

pub fn category_exists(conn: &mut database::Connection, category_id: CategoryId) -> Result<bool> {
    use database::schema::categories::dsl::*;

    Ok(categories
        .find(category_id)
        .select(id)
        .first::<CategoryId>(conn)
        .optional()?
        .is_some())
}

pub fn add_cook(conn: &mut database::Connection, new_cook: &NewCook<'_>) -> Result<Cook> {
    use database::schema::cooks::dsl::*;
    use diesel::insert_into;

    Ok(insert_into(cooks)
        .values(new_cook)
        .returning(Cook::as_returning())
        .get_result(conn)?)
}

pub fn get_cook(conn: &mut database::Connection, cook_id: CookId) -> Result<Cook> {
    use database::schema::cooks::dsl::*;

    Ok(cooks.find(cook_id).select(Cook::as_select()).get_result(conn)?)
}

pub fn find_cook_by_username(
    conn: &mut database::Connection,
    wanted: &str,
) -> Result<Option<Cook>> {
    use database::schema::cooks::dsl::*;

    Ok(cooks
        .select(Cook::as_select())
        .filter(username.eq(wanted))
        .first(conn)
        .optional()?)
}

/// Whether a cook other than `except` already uses `wanted`.
pub fn username_taken(
    conn: &mut database::Connection,
    wanted: &str,
    except: Option<CookId>,
) -> Result<bool> {
    use database::schema::cooks::dsl::*;

    let owner: Option<CookId> = cooks
        .select(id)
        .filter(username.eq(wanted))
        .first(conn)
        .optional()?;
    Ok(owner.is_some_and(|owner| Some(owner) != except))
}

pub struct ProfileChanges<'a> {
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub password: Option<&'a str>,
}

pub fn update_cook(
    conn: &mut database::Connection,
    edit_id: CookId,
    changes: &ProfileChanges<'_>,
) -> Result<Cook> {
    use database::schema::cooks::dsl::*;
    use diesel::update;

    conn.transaction(|conn| {
        if let Some(new_password) = changes.password {
            update(cooks.find(edit_id))
                .set(password.eq(new_password))
                .execute(conn)?;
        }
        Ok(update(cooks.find(edit_id))
            .set((
                username.eq(changes.username),
                first_name.eq(changes.first_name),
                last_name.eq(changes.last_name),
                email.eq(changes.email),
            ))
            .returning(Cook::as_returning())
            .get_result(conn)?)
    })
}

pub fn get_dish(conn: &mut database::Connection, dish_id: DishId) -> Result<Dish> {
    use database::schema::dishes::dsl::*;

    Ok(dishes.find(dish_id).select(Dish::as_select()).get_result(conn)?)
}

/// Dishes of a category, narrowed to those whose name or any ingredient's name contains `query`
/// (ignoring case), easiest first. A category that doesn't exist just has no dishes.
pub fn search_dishes(
    conn: &mut database::Connection,
    category: CategoryId,
    query: Option<&str>,
) -> Result<Vec<Dish>> {
    use database::schema::{dish_ingredients, dishes, ingredients};
    use diesel::expression_methods::EscapeExpressionMethods as _;
    use diesel::expression_methods::TextExpressionMethods as _;

    let in_category = dishes::table
        .select(Dish::as_select())
        .filter(dishes::category_id.eq(category));

    let mut found = match query.map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => {
            let pattern = contains_pattern(query);
            let by_ingredient = dish_ingredients::table
                .inner_join(ingredients::table)
                .filter(ingredients::name.like(pattern.clone()).escape('\\'))
                .select(dish_ingredients::dish_id);
            in_category
                .filter(
                    dishes::name
                        .like(pattern)
                        .escape('\\')
                        .or(dishes::id.eq_any(by_ingredient)),
                )
                .load(conn)?
        }
        None => in_category.load(conn)?,
    };

    found.sort_by_key(|d| (d.difficulty, d.id));
    Ok(found)
}

/// A dish's ingredients in the order they were linked.
pub fn dish_ingredients(conn: &mut database::Connection, dish: DishId) -> Result<Vec<Ingredient>> {
    use database::schema::{dish_ingredients, ingredients};

    Ok(dish_ingredients::table
        .inner_join(ingredients::table)
        .filter(dish_ingredients::dish_id.eq(dish))
        .order(dish_ingredients::id.asc())
        .select(Ingredient::as_select())
        .load(conn)?)
}

pub fn ingredient_names_by_dish(
    conn: &mut database::Connection,
    dish_ids: &[DishId],
) -> Result<HashMap<DishId, Vec<String>>> {
    use database::schema::{dish_ingredients, ingredients};

    let mut names: HashMap<DishId, Vec<String>> = HashMap::new();
    for (dish, name) in dish_ingredients::table
        .inner_join(ingredients::table)
        .filter(dish_ingredients::dish_id.eq_any(dish_ids.to_vec()))
        .order(dish_ingredients::id.asc())
        .select((dish_ingredients::dish_id, ingredients::name))
        .load::<(DishId, String)>(conn)?
    {
        names.entry(dish).or_default().push(name);
    }
    Ok(names)
}

pub fn review_counts(
    conn: &mut database::Connection,
    dish_ids: &[DishId],
) -> Result<HashMap<DishId, i64>> {
    use database::schema::reviews::dsl::*;

    Ok(reviews
        .filter(dish_id.eq_any(dish_ids.to_vec()))
        .group_by(dish_id)
        .select((dish_id, count_star()))
        .load::<(DishId, i64)>(conn)?
        .into_iter()
        .collect())
}

fn link_ingredients(
    conn: &mut database::Connection,
    dish: DishId,
    linked: &[IngredientId],
) -> Result<()> {
    use database::schema::dish_ingredients::dsl::*;
    use diesel::insert_into;

    // One row at a time so the link ids follow the submitted order.
    for &ingredient in linked {
        insert_into(dish_ingredients)
            .values((dish_id.eq(dish), ingredient_id.eq(ingredient)))
            .execute(conn)?;
    }
    Ok(())
}

pub fn add_dish(
    conn: &mut database::Connection,
    new_dish: &NewDish<'_>,
    linked: &[IngredientId],
) -> Result<Dish> {
    use database::schema::dishes::dsl::*;
    use diesel::insert_into;

    conn.transaction(|conn| {
        let dish = insert_into(dishes)
            .values(new_dish)
            .returning(Dish::as_returning())
            .get_result(conn)?;
        link_ingredients(conn, dish.id, linked)?;
        Ok(dish)
    })
}

/// Overwrites every field of the dish and replaces its ingredient set with `linked`.
pub fn update_dish(
    conn: &mut database::Connection,
    edit_id: DishId,
    changes: &NewDish<'_>,
    linked: &[IngredientId],
) -> Result<Dish> {
    use database::schema::{dish_ingredients, dishes};
    use diesel::{delete, update};

    conn.transaction(|conn| {
        let dish = update(dishes::table.find(edit_id))
            .set(changes)
            .returning(Dish::as_returning())
            .get_result(conn)?;
        delete(dish_ingredients::table.filter(dish_ingredients::dish_id.eq(edit_id)))
            .execute(conn)?;
        link_ingredients(conn, edit_id, linked)?;
        Ok(dish)
    })
}

/// Deletes the dish, its reviews and its ingredient links, handing back what was deleted.
pub fn delete_dish(conn: &mut database::Connection, delete_id: DishId) -> Result<Dish> {
    use database::schema::dishes::dsl::*;
    use diesel::delete;

    Ok(delete(dishes.filter(id.eq(delete_id)))
        .returning(Dish::as_returning())
        .get_result(conn)?)
}

pub fn add_review(
    conn: &mut database::Connection,
    dish: DishId,
    author: CookId,
    new_content: &str,
) -> Result<Review> {
    use database::schema::reviews::dsl::*;
    use diesel::insert_into;

    Ok(insert_into(reviews)
        .values(NewReview {
            dish_id: dish,
            left_by: author,
            content: new_content,
            created_at: chrono::Utc::now().naive_utc(),
        })
        .returning(Review::as_returning())
        .get_result(conn)?)
}

pub fn get_review(conn: &mut database::Connection, review_id: ReviewId) -> Result<Review> {
    use database::schema::reviews::dsl::*;

    Ok(reviews
        .find(review_id)
        .select(Review::as_select())
        .get_result(conn)?)
}

/// Reviews of a dish with their authors, ordered by the author's first name.
pub fn dish_reviews(conn: &mut database::Connection, dish: DishId) -> Result<Vec<(Review, Cook)>> {
    use database::schema::{cooks, reviews};

    Ok(reviews::table
        .inner_join(cooks::table)
        .filter(reviews::dish_id.eq(dish))
        .order((cooks::first_name.asc(), reviews::id.asc()))
        .select((Review::as_select(), Cook::as_select()))
        .load(conn)?)
}

/// Deletes the review only if `author` wrote it. Returns whether anything was deleted.
pub fn delete_review_by(
    conn: &mut database::Connection,
    delete_id: ReviewId,
    author: CookId,
) -> Result<bool> {
    use database::schema::reviews::dsl::*;
    use diesel::delete;

    Ok(delete(reviews.filter(id.eq(delete_id).and(left_by.eq(author)))).execute(conn)? > 0)
}

/// Deletes the cook with their reviews and sessions.
pub fn delete_cook(conn: &mut database::Connection, delete_id: CookId) -> Result<bool> {
    use database::schema::cooks::dsl::*;
    use diesel::delete;

    Ok(delete(cooks.filter(id.eq(delete_id))).execute(conn)? > 0)
}

/// Deletes the ingredient, unlinking it from every dish that used it.
pub fn delete_ingredient(conn: &mut database::Connection, delete_id: IngredientId) -> Result<bool> {
    use database::schema::ingredients::dsl::*;
    use diesel::delete;

    Ok(delete(ingredients.filter(id.eq(delete_id))).execute(conn)? > 0)
}

pub fn add_session(conn: &mut database::Connection, new_session: &NewSession<'_>) -> Result<()> {
    use database::schema::sessions::dsl::*;
    use diesel::insert_into;

    insert_into(sessions).values(new_session).execute(conn)?;
    Ok(())
}

/// The cook logged in under `key`, unless that session was closed or expired before `now`.
pub fn session_cook(
    conn: &mut database::Connection,
    key: &str,
    now: chrono::NaiveDateTime,
) -> Result<Option<Cook>> {
    use database::schema::{cooks, sessions};

    Ok(sessions::table
        .inner_join(cooks::table)
        .filter(sessions::session_key.eq(key).and(sessions::expires_at.gt(now)))
        .select(Cook::as_select())
        .first(conn)
        .optional()?)
}

pub fn delete_session(conn: &mut database::Connection, key: &str) -> Result<bool> {
    use database::schema::sessions::dsl::*;
    use diesel::delete;

    Ok(delete(sessions.filter(session_key.eq(key))).execute(conn)? > 0)
}

pub fn delete_cook_sessions(conn: &mut database::Connection, cook: CookId) -> Result<usize> {
    use database::schema::sessions::dsl::*;
    use diesel::delete;

    Ok(delete(sessions.filter(cook_id.eq(cook))).execute(conn)?)
}

pub fn delete_expired_sessions(
    conn: &mut database::Connection,
    now: chrono::NaiveDateTime,
) -> Result<usize> {
    use database::schema::sessions::dsl::*;
    use diesel::delete;

    Ok(delete(sessions.filter(expires_at.le(now))).execute(conn)?)
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::database::models::{Amount, Difficulty, Spiciness};
    use diesel::QueryDsl as _;
    use diesel::RunQueryDsl as _;

    pub fn cook(conn: &mut database::Connection, name: &str, first: &str) -> Cook {
        add_cook(
            conn,
            &NewCook {
                username: name,
                first_name: first,
                last_name: "Cook",
                email: "",
                password: crate::auth::UNUSABLE_PASSWORD,
                experience: 0,
                date_joined: chrono::Utc::now().naive_utc(),
            },
        )
        .unwrap()
    }

    pub fn dish(
        conn: &mut database::Connection,
        category: CategoryId,
        name: &str,
        price: &str,
        difficulty: Difficulty,
        linked: &[IngredientId],
    ) -> Dish {
        add_dish(
            conn,
            &NewDish {
                name,
                price: Amount::new(price.parse().unwrap()),
                cooking_time: Amount::new("30.00".parse().unwrap()),
                spicy: Spiciness::Easy,
                difficulty,
                category_id: category,
                recipe: "Test recipe",
                image: None,
            },
            linked,
        )
        .unwrap()
    }

    pub fn count_reviews(conn: &mut database::Connection) -> i64 {
        database::schema::reviews::table
            .count()
            .get_result(conn)
            .unwrap()
    }

    pub fn count_dishes(conn: &mut database::Connection) -> i64 {
        database::schema::dishes::table
            .count()
            .get_result(conn)
            .unwrap()
    }
}

#[cfg(test)]
use crate::database::models::Difficulty;
#[cfg(test)]
use crate::database::test_connection;
#[cfg(test)]
use test_support::*;

#[cfg(test)]
fn names(found: &[Dish]) -> Vec<&str> {
    found.iter().map(|d| d.name.as_str()).collect()
}

#[test]
fn pattern_escapes_wildcards() {
    assert_eq!(contains_pattern("tuna"), "%tuna%");
    assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
}

#[test]
fn search_by_name_and_ingredient() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let rice = add_ingredient(&mut conn, "rice").unwrap();
    let nori = add_ingredient(&mut conn, "nori").unwrap();
    dish(
        &mut conn,
        sushi.id,
        "Tuna Roll",
        "10.99",
        Difficulty::Medium,
        &[rice.id, nori.id],
    );
    dish(&mut conn, sushi.id, "Salmon Nigiri", "12.99", Difficulty::Easy, &[]);

    let found = search_dishes(&mut conn, sushi.id, Some("Tuna")).unwrap();
    assert_eq!(names(&found), vec!["Tuna Roll"]);

    let found = search_dishes(&mut conn, sushi.id, Some("RICE")).unwrap();
    assert_eq!(names(&found), vec!["Tuna Roll"]);

    // "r" matches the name and both ingredients but the dish comes back once.
    let found = search_dishes(&mut conn, sushi.id, Some("r")).unwrap();
    assert_eq!(names(&found), vec!["Salmon Nigiri", "Tuna Roll"]);

    let found = search_dishes(&mut conn, sushi.id, Some("miso")).unwrap();
    assert!(found.is_empty());
}

#[test]
fn search_without_query_orders_by_difficulty() {
    let mut conn = test_connection();
    let soup = add_category(&mut conn, DishType::Soup, None).unwrap();
    let other = add_category(&mut conn, DishType::Salad, None).unwrap();
    dish(&mut conn, soup.id, "Ramen", "9.00", Difficulty::Hard, &[]);
    dish(&mut conn, soup.id, "Miso", "4.00", Difficulty::Easy, &[]);
    dish(&mut conn, soup.id, "Udon", "8.00", Difficulty::Medium, &[]);
    dish(&mut conn, other.id, "Wakame", "5.00", Difficulty::Easy, &[]);

    let found = search_dishes(&mut conn, soup.id, None).unwrap();
    assert_eq!(names(&found), vec!["Miso", "Udon", "Ramen"]);

    let found = search_dishes(&mut conn, soup.id, Some("   ")).unwrap();
    assert_eq!(found.len(), 3);
}

#[test]
fn search_literal_wildcards() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    dish(&mut conn, sushi.id, "100% Tuna", "10.00", Difficulty::Easy, &[]);
    dish(&mut conn, sushi.id, "Tuna", "10.00", Difficulty::Easy, &[]);

    let found = search_dishes(&mut conn, sushi.id, Some("0%")).unwrap();
    assert_eq!(names(&found), vec!["100% Tuna"]);
}

#[test]
fn unknown_category_has_no_dishes() {
    let mut conn = test_connection();
    assert!(search_dishes(&mut conn, CategoryId::new(42), None)
        .unwrap()
        .is_empty());
}

#[test]
fn ingredients_keep_submitted_order() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let a = add_ingredient(&mut conn, "avocado").unwrap();
    let b = add_ingredient(&mut conn, "wasabi").unwrap();
    let c = add_ingredient(&mut conn, "cucumber").unwrap();
    let d = dish(
        &mut conn,
        sushi.id,
        "Roll",
        "5.00",
        Difficulty::Easy,
        &[b.id, c.id, a.id],
    );

    let linked: Vec<_> = dish_ingredients(&mut conn, d.id)
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(linked, vec!["wasabi", "cucumber", "avocado"]);
}

#[test]
fn update_replaces_ingredient_set() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let a = add_ingredient(&mut conn, "avocado").unwrap();
    let b = add_ingredient(&mut conn, "wasabi").unwrap();
    let d = dish(&mut conn, sushi.id, "Roll", "5.00", Difficulty::Easy, &[a.id]);

    let changes = NewDish {
        name: "Green Roll",
        price: d.price,
        cooking_time: d.cooking_time,
        spicy: d.spicy,
        difficulty: Difficulty::Hard,
        category_id: d.category_id,
        recipe: &d.recipe,
        image: None,
    };
    let updated = update_dish(&mut conn, d.id, &changes, &[b.id]).unwrap();
    assert_eq!(updated.name, "Green Roll");
    assert_eq!(updated.difficulty, Difficulty::Hard);

    let linked: Vec<_> = dish_ingredients(&mut conn, d.id)
        .unwrap()
        .into_iter()
        .map(|i| i.id)
        .collect();
    assert_eq!(linked, vec![b.id]);
}

#[test]
fn deleting_dish_cascades_to_reviews() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let rice = add_ingredient(&mut conn, "rice").unwrap();
    let kept = dish(&mut conn, sushi.id, "Kept", "5.00", Difficulty::Easy, &[]);
    let gone = dish(&mut conn, sushi.id, "Gone", "5.00", Difficulty::Easy, &[rice.id]);
    let author = cook(&mut conn, "author", "Ann");
    add_review(&mut conn, gone.id, author.id, "one").unwrap();
    add_review(&mut conn, gone.id, author.id, "two").unwrap();
    add_review(&mut conn, kept.id, author.id, "three").unwrap();
    assert_eq!(count_reviews(&mut conn), 3);

    let deleted = delete_dish(&mut conn, gone.id).unwrap();
    assert_eq!(deleted.category_id, sushi.id);
    assert_eq!(count_reviews(&mut conn), 1);
    assert!(ingredient_names_by_dish(&mut conn, &[gone.id])
        .unwrap()
        .is_empty());
    assert!(matches!(
        delete_dish(&mut conn, gone.id),
        Err(crate::Error::NotFound)
    ));
}

#[test]
fn deleting_category_cascades_to_dishes() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let d = dish(&mut conn, sushi.id, "Roll", "5.00", Difficulty::Easy, &[]);
    let author = cook(&mut conn, "author", "Ann");
    add_review(&mut conn, d.id, author.id, "tasty").unwrap();

    assert!(delete_category(&mut conn, sushi.id).unwrap());
    assert_eq!(count_dishes(&mut conn), 0);
    assert_eq!(count_reviews(&mut conn), 0);
    assert!(!delete_category(&mut conn, sushi.id).unwrap());
}

#[test]
fn categories_with_dish_counts() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let nigiri = add_category(&mut conn, DishType::Nigiri, Some("https://img/n.png")).unwrap();
    dish(&mut conn, sushi.id, "A", "1.00", Difficulty::Easy, &[]);
    dish(&mut conn, sushi.id, "B", "1.00", Difficulty::Easy, &[]);

    let listed: Vec<_> = list_categories(&mut conn)
        .unwrap()
        .into_iter()
        .map(|(c, n)| (c.id, n))
        .collect();
    assert_eq!(listed, vec![(nigiri.id, 0), (sushi.id, 2)]);
}

#[test]
fn review_counts_per_dish() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let a = dish(&mut conn, sushi.id, "A", "1.00", Difficulty::Easy, &[]);
    let b = dish(&mut conn, sushi.id, "B", "1.00", Difficulty::Easy, &[]);
    let author = cook(&mut conn, "author", "Ann");
    add_review(&mut conn, a.id, author.id, "x").unwrap();
    add_review(&mut conn, a.id, author.id, "y").unwrap();

    let counts = review_counts(&mut conn, &[a.id, b.id]).unwrap();
    assert_eq!(counts.get(&a.id), Some(&2));
    assert_eq!(counts.get(&b.id), None);
}

#[test]
fn reviews_ordered_by_author_first_name() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let d = dish(&mut conn, sushi.id, "A", "1.00", Difficulty::Easy, &[]);
    let zed = cook(&mut conn, "zed", "Zed");
    let amy = cook(&mut conn, "amy", "Amy");
    add_review(&mut conn, d.id, zed.id, "first").unwrap();
    add_review(&mut conn, d.id, amy.id, "second").unwrap();

    let authors: Vec<_> = dish_reviews(&mut conn, d.id)
        .unwrap()
        .into_iter()
        .map(|(_, c)| c.username)
        .collect();
    assert_eq!(authors, vec!["amy", "zed"]);
}

#[test]
fn only_author_deletes_review() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let d = dish(&mut conn, sushi.id, "A", "1.00", Difficulty::Easy, &[]);
    let author = cook(&mut conn, "author", "Ann");
    let other = cook(&mut conn, "other", "Bob");
    let review = add_review(&mut conn, d.id, author.id, "mine").unwrap();

    assert!(!delete_review_by(&mut conn, review.id, other.id).unwrap());
    assert_eq!(count_reviews(&mut conn), 1);
    assert!(delete_review_by(&mut conn, review.id, author.id).unwrap());
    assert_eq!(count_reviews(&mut conn), 0);
}

#[test]
fn username_uniqueness() {
    let mut conn = test_connection();
    let ann = cook(&mut conn, "ann", "Ann");
    assert!(username_taken(&mut conn, "ann", None).unwrap());
    assert!(!username_taken(&mut conn, "ann", Some(ann.id)).unwrap());
    assert!(!username_taken(&mut conn, "bob", None).unwrap());
    assert!(find_cook_by_username(&mut conn, "bob").unwrap().is_none());
}

#[test]
fn decimal_round_trip() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let d = dish(&mut conn, sushi.id, "Test Dish", "10.99", Difficulty::Easy, &[]);
    let loaded = get_dish(&mut conn, d.id).unwrap();
    assert_eq!(loaded.price.to_string(), "10.99");
    assert_eq!(loaded.to_string(), "Test Dish, price: (10.99)");
}

#[test]
fn deleting_cook_cascades_to_reviews_and_sessions() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let d = dish(&mut conn, sushi.id, "Roll", "5.00", Difficulty::Easy, &[]);
    let gone = cook(&mut conn, "gone", "Gus");
    let stays = cook(&mut conn, "stays", "Sue");
    add_review(&mut conn, d.id, gone.id, "mine").unwrap();
    add_review(&mut conn, d.id, stays.id, "theirs").unwrap();
    let now = chrono::Utc::now().naive_utc();
    let later = now + chrono::TimeDelta::hours(1);
    add_session(
        &mut conn,
        &NewSession {
            session_key: "k1",
            cook_id: gone.id,
            expires_at: later,
        },
    )
    .unwrap();

    assert!(delete_cook(&mut conn, gone.id).unwrap());
    let left: Vec<_> = dish_reviews(&mut conn, d.id)
        .unwrap()
        .into_iter()
        .map(|(r, _)| r.content)
        .collect();
    assert_eq!(left, vec!["theirs"]);
    assert!(session_cook(&mut conn, "k1", now).unwrap().is_none());
    assert!(!delete_session(&mut conn, "k1").unwrap());
    assert_eq!(count_dishes(&mut conn), 1);
    assert!(!delete_cook(&mut conn, gone.id).unwrap());
}

#[test]
fn deleting_ingredient_unlinks_it() {
    let mut conn = test_connection();
    let sushi = add_category(&mut conn, DishType::Sushi, None).unwrap();
    let rice = add_ingredient(&mut conn, "rice").unwrap();
    let nori = add_ingredient(&mut conn, "nori").unwrap();
    let d = dish(&mut conn, sushi.id, "Roll", "5.00", Difficulty::Easy, &[rice.id, nori.id]);

    assert!(delete_ingredient(&mut conn, nori.id).unwrap());
    let linked: Vec<_> = dish_ingredients(&mut conn, d.id)
        .unwrap()
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(linked, vec!["rice"]);
    assert_eq!(count_dishes(&mut conn), 1);
    assert!(!delete_ingredient(&mut conn, nori.id).unwrap());
}

#[test]
fn sessions_close_and_expire() {
    let mut conn = test_connection();
    let ann = cook(&mut conn, "ann", "Ann");
    let now = chrono::Utc::now().naive_utc();
    for (key, expires_at) in [
        ("fresh", now + chrono::TimeDelta::hours(1)),
        ("other", now + chrono::TimeDelta::hours(1)),
        ("stale", now - chrono::TimeDelta::hours(1)),
    ] {
        add_session(
            &mut conn,
            &NewSession {
                session_key: key,
                cook_id: ann.id,
                expires_at,
            },
        )
        .unwrap();
    }

    let found = session_cook(&mut conn, "fresh", now).unwrap();
    assert_eq!(found.map(|c| c.id), Some(ann.id));
    assert!(session_cook(&mut conn, "stale", now).unwrap().is_none());
    assert!(session_cook(&mut conn, "unknown", now).unwrap().is_none());

    assert_eq!(delete_expired_sessions(&mut conn, now).unwrap(), 1);
    assert!(delete_session(&mut conn, "fresh").unwrap());
    assert!(session_cook(&mut conn, "fresh", now).unwrap().is_none());
    assert_eq!(delete_cook_sessions(&mut conn, ann.id).unwrap(), 1);
    assert!(session_cook(&mut conn, "other", now).unwrap().is_none());
}
