// Copyright 2023 Remi Bernotavicius

use derive_more::Display;
use diesel::associations::{Associations, Identifiable};
use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql, FromSqlRow, Queryable};
use diesel::expression::{AsExpression, Selectable};
use diesel::prelude::{AsChangeset, Insertable};
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;
use diesel_derive_enum::DbEnum;
use diesel_derive_newtype::DieselNewType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use strum::{AsRefStr, EnumIter, EnumString};

#[derive(
    DieselNewType, Debug, Display, Hash, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CategoryId(i32);

impl CategoryId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }
}

/// The closed set of labels a category can carry.
#[derive(
    Debug, Display, EnumIter, EnumString, AsRefStr, Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, DbEnum, Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DishType {
    #[display("sushi rolls")]
    Sushi,
    #[display("nigiri")]
    Nigiri,
    #[display("sashimi")]
    Sashimi,
    #[display("salads")]
    Salad,
    #[display("soups")]
    Soup,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = crate::database::schema::categories)]
pub struct Category {
    pub id: CategoryId,
    pub dish_type: DishType,
    pub image: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = crate::database::schema::categories)]
pub struct NewCategory<'a> {
    pub dish_type: DishType,
    pub image: Option<&'a str>,
}

#[derive(
    DieselNewType, Debug, Display, Hash, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CookId(i32);

impl CookId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = crate::database::schema::cooks)]
pub struct Cook {
    pub id: CookId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip)]
    pub password: String,
    pub experience: i32,
    pub date_joined: chrono::NaiveDateTime,
}

impl std::fmt::Display for Cook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {}", self.first_name, self.last_name, self.experience)
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::database::schema::cooks)]
pub struct NewCook<'a> {
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub experience: i32,
    pub date_joined: chrono::NaiveDateTime,
}

#[derive(
    DieselNewType, Debug, Display, Hash, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IngredientId(i32);

impl IngredientId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = crate::database::schema::ingredients)]
pub struct Ingredient {
    pub id: IngredientId,
    pub name: String,
}

#[derive(Debug, Display, EnumIter, EnumString, AsRefStr, Hash, Copy, Clone, PartialEq, Eq, DbEnum, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Spiciness {
    #[display("Not spicy at all")]
    Easy,
    #[display("Can be a little spicy")]
    Medium,
    #[display("Spicy as hell")]
    Hot,
}

impl Spiciness {
    pub fn iter() -> impl Iterator<Item = Self> {
        <Self as strum::IntoEnumIterator>::iter()
    }
}

/// Variant order is the listing order: easiest dishes first.
#[derive(
    Debug, Display, EnumIter, EnumString, AsRefStr, Hash, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, DbEnum, Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    #[display("Easy to make")]
    Easy,
    #[display("Required some skills")]
    Medium,
    #[display("Required skills and a lot of time")]
    Hard,
}

impl Difficulty {
    pub fn iter() -> impl Iterator<Item = Self> {
        <Self as strum::IntoEnumIterator>::iter()
    }
}

/// A non-negative decimal with at most two fractional digits, stored as text.
#[derive(Debug, Display, Hash, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
pub struct Amount(Decimal);

impl Amount {
    pub const MAX_DIGITS: u32 = 8;
    pub const DECIMAL_PLACES: u32 = 2;

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }
}

impl ToSql<Text, Sqlite> for Amount {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.0.to_string());
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Sqlite> for Amount {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let text = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        Ok(Self(text.parse()?))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

#[derive(
    DieselNewType, Debug, Display, Hash, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DishId(i32);

impl DishId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }
}

#[derive(Associations, Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(belongs_to(Category))]
#[diesel(table_name = crate::database::schema::dishes)]
pub struct Dish {
    pub id: DishId,
    pub name: String,
    pub price: Amount,
    pub cooking_time: Amount,
    pub spicy: Spiciness,
    pub difficulty: Difficulty,
    pub category_id: CategoryId,
    pub recipe: String,
    pub image: Option<String>,
}

impl std::fmt::Display for Dish {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, price: ({})", self.name, self.price)
    }
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = crate::database::schema::dishes)]
#[diesel(treat_none_as_null = true)]
pub struct NewDish<'a> {
    pub name: &'a str,
    pub price: Amount,
    pub cooking_time: Amount,
    pub spicy: Spiciness,
    pub difficulty: Difficulty,
    pub category_id: CategoryId,
    pub recipe: &'a str,
    pub image: Option<&'a str>,
}

#[derive(Associations, Queryable, Selectable, Identifiable, Insertable, Clone)]
#[diesel(belongs_to(Dish))]
#[diesel(belongs_to(Ingredient))]
#[diesel(table_name = crate::database::schema::dish_ingredients)]
pub struct DishIngredient {
    pub id: i32,
    pub dish_id: DishId,
    pub ingredient_id: IngredientId,
}

#[derive(
    DieselNewType, Debug, Display, Hash, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ReviewId(i32);

impl ReviewId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }
}

#[derive(Associations, Queryable, Selectable, Identifiable, Debug, Clone, PartialEq, Serialize)]
#[diesel(belongs_to(Dish))]
#[diesel(belongs_to(Cook, foreign_key = left_by))]
#[diesel(table_name = crate::database::schema::reviews)]
pub struct Review {
    pub id: ReviewId,
    pub dish_id: DishId,
    pub left_by: CookId,
    pub content: String,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::database::schema::reviews)]
pub struct NewReview<'a> {
    pub dish_id: DishId,
    pub left_by: CookId,
    pub content: &'a str,
    pub created_at: chrono::NaiveDateTime,
}

/// A logged-in browser. The key is what the session cookie carries.
#[derive(Insertable)]
#[diesel(table_name = crate::database::schema::sessions)]
pub struct NewSession<'a> {
    pub session_key: &'a str,
    pub cook_id: CookId,
    pub expires_at: chrono::NaiveDateTime,
}
