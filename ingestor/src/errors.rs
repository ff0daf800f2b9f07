use thiserror::Error;

/// A frame that could not be turned back into a plaintext record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 in frame {payload:?}: {source}")]
    Base64 {
        payload: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("frame {payload:?} does not decode to UTF-8 text")]
    NotText { payload: String },
}

impl DecodeError {
    /// The raw frame as received, for logging.
    pub fn payload(&self) -> &str {
        match self {
            DecodeError::Base64 { payload, .. } | DecodeError::NotText { payload } => payload,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store failure: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient_error(&err) {
            StoreError::Transient(err.to_string())
        } else {
            StoreError::Permanent(err.to_string())
        }
    }
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            code == "08000" || // connection_exception
            code == "08003" || // connection_does_not_exist
            code == "08006" || // connection_failure
            code == "57P03" || // cannot_connect_now
            code == "53300" || // too_many_connections
            code == "40001" || // serialization_failure
            code == "40P01" // deadlock_detected
        }),
        _ => false,
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("push request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not obtain push access token: {0}")]
    Auth(String),

    #[error("push service rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotifyError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Only transient storage failures are worth another attempt; bad data
    /// stays bad and permanent store errors won't clear on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(e) => e.is_transient(),
            Error::Decode(_)
            | Error::Validation(_)
            | Error::Notification(_)
            | Error::NotFound(_)
            | Error::Config(_)
            | Error::Mqtt(_)
            | Error::Database(_)
            | Error::Migration(_)
            | Error::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
