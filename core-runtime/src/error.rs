//! Errors raised while wiring up runtime infrastructure.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The global subscriber could not be installed, usually because one is
    /// already set for this process.
    #[error("Unable to install log subscriber: {0}")]
    SubscriberInstall(String),

    #[error("Invalid log filter `{filter}`: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Logger sink error: {0}")]
    Sink(String),
}

impl Error {
    /// Whether the failure stems from the logging configuration rather than
    /// from a host sink.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::SubscriberInstall(_) | Error::InvalidFilter { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
