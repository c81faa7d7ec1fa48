use thiserror::Error;

#[derive(Debug, Error)]
pub enum TipError {
    #[error("bus is unavailable")]
    BusUnavailable,

    #[error("no tiles could be downloaded from the source")]
    SourceUnavailable,
}
