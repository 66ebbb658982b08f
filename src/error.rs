use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(diesel::result::Error),

    #[error(transparent)]
    Connection(#[from] diesel::ConnectionError),

    #[error("migration failed: {0}")]
    Migration(Box<dyn std::error::Error + Send + Sync>),

    #[error("password hashing failed: {0}")]
    Password(#[from] argon2::password_hash::Error),

    #[error("context serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Logger(#[from] log::SetLoggerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => Self::NotFound,
            e => Self::Database(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
