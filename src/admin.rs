use crate::auth;
use crate::database;
use crate::database::models::{Category, CategoryId, Cook, DishType, Ingredient, IngredientId};
use crate::forms;
use crate::query;
use crate::{Error, Result};
use log::info;

pub fn add_category(
    conn: &mut database::Connection,
    dish_type: DishType,
    image: Option<&str>,
) -> Result<Category> {
    let category = query::add_category(conn, dish_type, image)?;
    info!("added category {} ({})", category.id, category.dish_type);
    Ok(category)
}

pub fn delete_category(conn: &mut database::Connection, id: CategoryId) -> Result<()> {
    if !query::delete_category(conn, id)? {
        return Err(Error::NotFound);
    }
    info!("deleted category {id} and its dishes");
    Ok(())
}

pub fn add_ingredient(conn: &mut database::Connection, name: &str) -> Result<Ingredient> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Invalid("ingredient name must not be blank".into()));
    }
    let ingredient = query::add_ingredient(conn, name)?;
    info!("added ingredient {} ({})", ingredient.id, ingredient.name);
    Ok(ingredient)
}

/// Removes the ingredient from every dish that lists it.
pub fn delete_ingredient(conn: &mut database::Connection, id: IngredientId) -> Result<()> {
    if !query::delete_ingredient(conn, id)? {
        return Err(Error::NotFound);
    }
    info!("deleted ingredient {id}");
    Ok(())
}

/// Same username and password rules as sign-up.
pub fn create_cook(
    conn: &mut database::Connection,
    registration: &auth::Registration<'_>,
) -> Result<Cook> {
    if query::username_taken(conn, registration.username, None)? {
        return Err(Error::Invalid(format!(
            "username {:?} is already taken",
            registration.username
        )));
    }
    if let Some(password) = registration.password {
        let problems = forms::password_problems(password, Some(registration.username));
        if !problems.is_empty() {
            return Err(Error::Invalid(problems.join(" ")));
        }
    }
    auth::register(conn, registration)
}

/// Deletes the account along with its reviews and sessions. Dishes stay.
pub fn delete_cook(conn: &mut database::Connection, username: &str) -> Result<()> {
    let cook = query::find_cook_by_username(conn, username)?.ok_or(Error::NotFound)?;
    query::delete_cook(conn, cook.id)?;
    info!("deleted cook {} ({})", cook.id, cook.username);
    Ok(())
}

#[cfg(test)]
fn registration<'a>(username: &'a str, password: Option<&'a str>) -> auth::Registration<'a> {
    auth::Registration {
        username,
        first_name: "",
        last_name: "",
        email: "",
        password,
        experience: 10,
    }
}

#[test]
fn categories() {
    let mut conn = database::test_connection();
    let soup = add_category(&mut conn, DishType::Soup, Some("https://img/soup.png")).unwrap();
    assert_eq!(soup.image.as_deref(), Some("https://img/soup.png"));

    delete_category(&mut conn, soup.id).unwrap();
    assert!(matches!(
        delete_category(&mut conn, soup.id),
        Err(Error::NotFound)
    ));
}

#[test]
fn ingredients_trimmed_and_unique() {
    let mut conn = database::test_connection();
    assert_eq!(add_ingredient(&mut conn, " rice ").unwrap().name, "rice");
    assert!(add_ingredient(&mut conn, "rice").is_err());
    assert!(add_ingredient(&mut conn, "  ").is_err());
}

#[test]
fn duplicate_cook_refused() {
    let mut conn = database::test_connection();
    query::test_support::cook(&mut conn, "chef", "Chef");
    let result = create_cook(&mut conn, &registration("chef", None));
    assert!(matches!(result, Err(Error::Invalid(_))));
}

#[test]
fn weak_cook_password_refused() {
    let mut conn = database::test_connection();
    for weak in ["1", "12345678", "shortpw", "Sensei01"] {
        let result = create_cook(&mut conn, &registration("sensei01", Some(weak)));
        assert!(matches!(result, Err(Error::Invalid(_))), "{weak}");
    }
    assert!(!query::username_taken(&mut conn, "sensei01", None).unwrap());

    let cook = create_cook(&mut conn, &registration("sensei01", Some("kombu-dashi"))).unwrap();
    assert_eq!(cook.username, "sensei01");
    let unusable = create_cook(&mut conn, &registration("apprentice", None)).unwrap();
    assert_eq!(unusable.username, "apprentice");
}

#[test]
fn deleting_ingredient_and_cook() {
    let mut conn = database::test_connection();
    let nori = add_ingredient(&mut conn, "nori").unwrap();
    delete_ingredient(&mut conn, nori.id).unwrap();
    assert!(query::list_ingredients(&mut conn).unwrap().is_empty());
    assert!(matches!(
        delete_ingredient(&mut conn, nori.id),
        Err(Error::NotFound)
    ));

    query::test_support::cook(&mut conn, "chef", "Chef");
    delete_cook(&mut conn, "chef").unwrap();
    assert!(query::find_cook_by_username(&mut conn, "chef").unwrap().is_none());
    assert!(matches!(delete_cook(&mut conn, "chef"), Err(Error::NotFound)));
}
