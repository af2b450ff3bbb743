use thiserror::Error;

pub type Result<T> = std::result::Result<T, GravatarError>;

#[derive(Error, Debug)]
pub enum GravatarError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parsing error: {0}")]
    Parse(String),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0} {1}")]
    Storage(String, String),
    #[error("No async runtime available: {0}")]
    Runtime(String),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for GravatarError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<DecodeError> for GravatarError {
    fn from(e: DecodeError) -> Self {
        Self::Fetch(FetchError::Decode(e))
    }
}

impl From<image::ImageError> for GravatarError {
    fn from(e: image::ImageError) -> Self {
        Self::Other(anyhow::anyhow!(e.to_string()))
    }
}

/// Everything that can go wrong between issuing the avatar request and
/// having a decoded image in hand.
///
/// These never escape the view as a `Result`; they are handed to the
/// observer and kept in the `Failed` state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid identity: {0:?}")]
    InvalidIdentity(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl From<image::ImageError> for DecodeError {
    fn from(e: image::ImageError) -> Self {
        Self(e.to_string())
    }
}
