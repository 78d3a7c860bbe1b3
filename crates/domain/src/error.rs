/// Shared error type used across all BudCore crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("memory graph: {0}")]
    Graph(String),

    #[error("driver: {0}")]
    Driver(String),

    #[error("budget exhausted: {reason}")]
    Budget { reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry on the next tick is reasonable.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Timeout(_) | Error::Graph(_) | Error::Driver(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
