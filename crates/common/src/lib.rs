//! Common types for the Uplink workspace

mod error;
mod secret;
mod time;

pub use error::{Error, Result};
pub use secret::Secret;
pub use time::unix_timestamp;
