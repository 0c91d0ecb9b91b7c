use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to prepare {script}: {message}")]
    ScriptPreparation { script: String, message: String },

    #[error("failed to execute {script}: {message}")]
    Execution { script: String, message: String },

    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
