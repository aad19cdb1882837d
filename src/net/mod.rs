//! A store SCP that writes every received instance to a sorted directory tree.

mod config;
mod storescp;

pub use config::{DicomNode, ServerConfig, StorageConfig};
pub use storescp::{run_server, StoreScpServer};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid server configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Association error: {0}")]
    Association(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(format!("{err}"))
    }
}

impl From<garde::Report> for Error {
    fn from(err: garde::Report) -> Self {
        Error::Config(format!("{err}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
