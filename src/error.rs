use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Span JSON failed to parse or does not have the expected shape.
    #[error("malformed span input: {0}")]
    MalformedInput(String),
    /// The query API could not be reached (timeout, connection, TLS).
    #[error("error fetching spans from zipkin: {0}")]
    Fetch(#[from] attohttpc::Error),
    #[error("zipkin responded with status {0}")]
    Status(u16),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedInput(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
