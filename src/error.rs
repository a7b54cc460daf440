use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start (radio): {source}")]
    RadioError { #[from] source: RadioError },
}

#[derive(Error, Debug)]
pub enum RadioError {
    #[error("Error communicating with adapter (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("No peripheral is connected")]
    NotConnected,

    #[error("Unknown peripheral handle: {handle}")]
    UnknownPeripheral { handle: String },

    #[error("The radio rejected the request: {reason}")]
    Rejected { reason: String },
}

#[derive(Error, Debug)]
pub enum SubscribeError {
    #[error("The characteristic supports neither notification nor indication")]
    Unsupported,

    #[error("Failed to register for characteristic changes: {source}")]
    Registration { source: RadioError },

    #[error("Failed to write the configuration descriptor: {source}")]
    DescriptorWrite { source: RadioError },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Sensor payload of {len} byte(s) is too short, expected at least 3")]
    TooShort { len: usize },
}
