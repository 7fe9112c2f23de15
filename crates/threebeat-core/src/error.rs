//! Error types for threebeat

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThreebeatError {
    #[error("Unknown sound: {0}")]
    UnknownSound(String),
}
