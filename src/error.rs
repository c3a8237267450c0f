use thiserror::Error;

use crate::activation::ActivationError;
use crate::config::ConfigError;
use crate::event_bus::EventError;
use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Activation error: {0}")]
    Activation(#[from] ActivationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type LoaderResult<T> = Result<T, LoaderError>;

impl LoaderError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        LoaderError::Internal(message.into())
    }
}
