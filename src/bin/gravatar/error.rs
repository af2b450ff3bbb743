use gravatar_view::{FetchError, GravatarError};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not an email address: {0:?}")]
    InvalidEmail(String),

    #[error("Could not load options: {0}")]
    OptionsLoadError(String),

    #[error("Could not open cache directory: {0}")]
    CacheCreationError(String),

    #[error("Could not load placeholder: {0}")]
    PlaceholderLoadError(String),

    #[error("Failed to fetch avatar: {0}")]
    FetchFailed(FetchError),

    #[error("Failed to write image: {0}")]
    OutputError(String),

    #[error(transparent)]
    IoError(#[from] io::Error),

    #[error(transparent)]
    GravatarError(#[from] GravatarError),
}
