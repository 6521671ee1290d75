//! Routing error type.

use thiserror::Error;

pub type RouteResult<T> = std::result::Result<T, RouteError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unroutable destination: {0}")]
    BadDestination(String),

    #[error("frame has no destination header")]
    MissingDestination,
}
