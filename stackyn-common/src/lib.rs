pub mod config;
pub mod db;
pub mod docker;
pub mod error;
pub mod id;
pub mod log;
pub mod models;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use id::Id;
