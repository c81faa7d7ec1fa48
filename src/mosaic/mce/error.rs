use thiserror::Error;

#[derive(Debug, Error)]
pub enum MceError {
    #[error("no tile source was provided")]
    InvalidTilesRepository,

    #[error("mosaic rendering failed")]
    RenderFailed,
}
