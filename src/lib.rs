pub mod api;
pub mod booking;
pub mod collections;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod error;
pub mod import;
pub mod limits;
pub mod location;
pub mod model;
pub mod observability;
pub mod platform;
pub mod provision;
pub mod tenant;
pub mod validate;
pub mod wal;

pub use error::{Error, Result};
