use thiserror::Error;

#[derive(Debug, Error)]
pub enum VtrError {
    #[error("tile store is unavailable")]
    StorageUnavailable,

    #[error("failed to encode tile image")]
    EncodeFailed,

    #[error("failed to decode tile image")]
    DecodeFailed,

    #[error("no matching tiles found")]
    NoResult,

    #[error("store reply had an unexpected shape")]
    InvalidResultShape,

    #[error("store reply result is missing the `img` field")]
    MissingImage,

    #[error("store reply field had an unexpected type")]
    InvalidField,
}
