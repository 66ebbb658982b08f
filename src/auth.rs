use crate::database;
use crate::database::models::{Cook, CookId, NewCook, NewSession};
use crate::query;
use crate::Result;
use argon2::password_hash::rand_core::{OsRng, RngCore as _};
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString};
use argon2::Argon2;

/// Stored in place of a hash for accounts that cannot log in.
pub const UNUSABLE_PASSWORD: &str = "!";

/// Two weeks.
pub const SESSION_AGE_SECS: i64 = 14 * 24 * 60 * 60;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// False for a wrong password and for anything that isn't a hash we produced.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// The cook `username` names, if `password` is theirs.
pub fn authenticate(
    conn: &mut database::Connection,
    username: &str,
    password: &str,
) -> Result<Option<Cook>> {
    let Some(cook) = query::find_cook_by_username(conn, username)? else {
        log::debug!("login for unknown user {username:?}");
        return Ok(None);
    };
    if verify_password(&cook.password, password) {
        Ok(Some(cook))
    } else {
        log::debug!("wrong password for {username:?}");
        Ok(None)
    }
}

pub struct Registration<'a> {
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub password: Option<&'a str>,
    pub experience: i32,
}

/// Creates a cook, hashing the password. Without a password the account can't log in.
pub fn register(conn: &mut database::Connection, registration: &Registration<'_>) -> Result<Cook> {
    let hashed = match registration.password {
        Some(password) => hash_password(password)?,
        None => UNUSABLE_PASSWORD.to_owned(),
    };
    let cook = query::add_cook(
        conn,
        &NewCook {
            username: registration.username,
            first_name: registration.first_name,
            last_name: registration.last_name,
            email: registration.email,
            password: &hashed,
            experience: registration.experience,
            date_joined: chrono::Utc::now().naive_utc(),
        },
    )?;
    log::info!("registered cook {}", cook.username);
    Ok(cook)
}

/// Starts a session for `cook`, handing back the key the browser keeps.
pub fn open_session(conn: &mut database::Connection, cook: CookId) -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let key: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

    let now = chrono::Utc::now().naive_utc();
    query::delete_expired_sessions(conn, now)?;
    query::add_session(
        conn,
        &NewSession {
            session_key: &key,
            cook_id: cook,
            expires_at: now + chrono::TimeDelta::seconds(SESSION_AGE_SECS),
        },
    )?;
    log::debug!("opened session for cook {cook}");
    Ok(key)
}

/// The cook behind a session key, if the session is still open.
pub fn session_cook(conn: &mut database::Connection, key: &str) -> Result<Option<Cook>> {
    query::session_cook(conn, key, chrono::Utc::now().naive_utc())
}

pub fn close_session(conn: &mut database::Connection, key: &str) -> Result<()> {
    query::delete_session(conn, key)?;
    Ok(())
}

/// Logs `cook` out everywhere.
pub fn close_all_sessions(conn: &mut database::Connection, cook: CookId) -> Result<()> {
    let closed = query::delete_cook_sessions(conn, cook)?;
    log::debug!("closed {closed} sessions of cook {cook}");
    Ok(())
}

#[test]
fn hash_round_trip() {
    let hashed = hash_password("strongpassword123").unwrap();
    assert_ne!(hashed, "strongpassword123");
    assert!(verify_password(&hashed, "strongpassword123"));
    assert!(!verify_password(&hashed, "strongpassword124"));
    assert!(!verify_password(UNUSABLE_PASSWORD, ""));
}

#[test]
fn authenticate_cook() {
    let mut conn = database::test_connection();
    let cook = register(
        &mut conn,
        &Registration {
            username: "testcook",
            first_name: "Test",
            last_name: "Cook",
            email: "",
            password: Some("testpass123"),
            experience: 5,
        },
    )
    .unwrap();
    assert_eq!(cook.experience, 5);
    assert_eq!(cook.to_string(), "Test, Cook, 5");

    let found = authenticate(&mut conn, "testcook", "testpass123").unwrap();
    assert_eq!(found.map(|c| c.id), Some(cook.id));
    assert!(authenticate(&mut conn, "testcook", "nope").unwrap().is_none());
    assert!(authenticate(&mut conn, "nobody", "testpass123")
        .unwrap()
        .is_none());
}

#[test]
fn registration_without_password_cannot_log_in() {
    let mut conn = database::test_connection();
    register(
        &mut conn,
        &Registration {
            username: "admin",
            first_name: "",
            last_name: "",
            email: "",
            password: None,
            experience: 0,
        },
    )
    .unwrap();
    assert!(authenticate(&mut conn, "admin", "").unwrap().is_none());
}

#[test]
fn sessions_open_and_close() {
    let mut conn = database::test_connection();
    let cook = query::test_support::cook(&mut conn, "ann", "Ann");
    let first = open_session(&mut conn, cook.id).unwrap();
    let second = open_session(&mut conn, cook.id).unwrap();
    assert_ne!(first, second);
    assert_eq!(first.len(), 64);

    let found = session_cook(&mut conn, &first).unwrap();
    assert_eq!(found.map(|c| c.id), Some(cook.id));

    close_session(&mut conn, &first).unwrap();
    assert!(session_cook(&mut conn, &first).unwrap().is_none());
    assert!(session_cook(&mut conn, &second).unwrap().is_some());

    close_all_sessions(&mut conn, cook.id).unwrap();
    assert!(session_cook(&mut conn, &second).unwrap().is_none());
}
