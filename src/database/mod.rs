// Copyright 2023 Remi Bernotavicius

use diesel::prelude::Connection as _;
use diesel::RunQueryDsl as _;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::path::Path;

pub mod models;
pub mod schema;

pub type Connection = diesel::sqlite::SqliteConnection;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Opens the database at `path` and brings its schema up to date. Foreign keys are switched on
/// for every connection so deletes cascade.
pub fn establish_connection(path: impl AsRef<Path>) -> crate::Result<Connection> {
    let path = path.as_ref();
    let url = path.to_str().ok_or_else(|| {
        crate::Error::Config(format!("database path {} is not valid UTF-8", path.display()))
    })?;
    let mut connection = Connection::establish(url)?;
    diesel::sql_query("PRAGMA foreign_keys = ON").execute(&mut connection)?;
    connection
        .run_pending_migrations(MIGRATIONS)
        .map_err(crate::Error::Migration)?;
    log::debug!("database ready at {url}");
    Ok(connection)
}

#[cfg(test)]
pub fn test_connection() -> Connection {
    establish_connection(":memory:").unwrap()
}

#[test]
fn migrations() {
    let mut conn = test_connection();
    conn.revert_all_migrations(MIGRATIONS).unwrap();
    conn.run_pending_migrations(MIGRATIONS).unwrap();
    assert!(!conn.has_pending_migration(MIGRATIONS).unwrap());
}

#[test]
fn foreign_keys_enabled() {
    use diesel::sql_types::Integer;

    #[derive(diesel::QueryableByName)]
    struct Pragma {
        #[diesel(sql_type = Integer)]
        foreign_keys: i32,
    }

    let mut conn = test_connection();
    let pragma: Pragma = diesel::sql_query("PRAGMA foreign_keys")
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(pragma.foreign_keys, 1);
}
