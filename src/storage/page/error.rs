use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("overlay does not fit in a page ({0} bytes)")]
    Overflow(usize),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid page format")]
    InvalidFormat,
}
