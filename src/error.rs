use thiserror::Error;

/// Why a single candidate URL was rejected. Never fatal: the fetcher moves
/// on to the next candidate and records the reason.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    Url(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("body too short ({len} < {min} bytes)")]
    TooShort { len: usize, min: usize },
    #[error("error marker in body: {0}")]
    ErrorMarker(String),
    #[error("malformed csv: {0}")]
    Malformed(String),
    #[error("table has no rows or columns")]
    EmptyTable,
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<csv::Error> for FetchError {
    fn from(value: csv::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}
