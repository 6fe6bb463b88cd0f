// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::path::PathBuf;

use readout_common::{InvalidModule, ModuleId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid request or session state, detected before any hardware command.
    #[error("{0}")]
    Configuration(String),

    /// A remote command failed. The device is left in an indeterminate state
    /// and must be reset by the caller (clear channels) before retrying.
    #[error("{}", protocol_message(.module))]
    Protocol {
        module: Option<ModuleId>,
        #[source]
        source: anyhow::Error,
    },

    #[error("capture output directory {} already exists", .0.display())]
    Precapture(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

fn protocol_message(module: &Option<ModuleId>) -> String {
    match module {
        Some(module) => format!("Command on module {module} failed"),
        None => "Device command failed".to_string(),
    }
}

impl Error {
    pub fn new<T>(msg: T) -> Self
    where
        T: Display,
    {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }

    pub fn configuration<T>(msg: T) -> Self
    where
        T: Display,
    {
        Error::Configuration(msg.to_string())
    }

    pub fn protocol(module: Option<ModuleId>, source: anyhow::Error) -> Self {
        Error::Protocol { module, source }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

impl From<InvalidModule> for Error {
    fn from(error: InvalidModule) -> Self {
        Error::configuration(error)
    }
}

/// Attach a module to a failed remote call.
pub(crate) trait ProtocolContext<T> {
    fn on_module(self, module: ModuleId) -> Result<T>;
    fn on_device(self) -> Result<T>;
}

impl<T> ProtocolContext<T> for anyhow::Result<T> {
    fn on_module(self, module: ModuleId) -> Result<T> {
        self.map_err(|source| Error::protocol(Some(module), source))
    }

    fn on_device(self) -> Result<T> {
        self.map_err(|source| Error::protocol(None, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_message() {
        let module = ModuleId::new(2).unwrap();
        let err = Err::<(), _>(anyhow::anyhow!("timeout"))
            .on_module(module)
            .unwrap_err();
        assert_eq!(err.to_string(), "Command on module 2 failed");
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "timeout");

        let err = Err::<(), _>(anyhow::anyhow!("timeout"))
            .on_device()
            .unwrap_err();
        assert_eq!(err.to_string(), "Device command failed");
    }

    #[test]
    fn test_invalid_module_is_configuration_error() {
        let err: Error = InvalidModule(7).into();
        assert!(err.is_configuration());
    }
}
