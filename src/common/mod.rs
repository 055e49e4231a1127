//! Common utilities and types

pub mod endpoint;
pub mod error;
pub mod fs;
pub mod net;
pub mod socks;

pub use endpoint::Endpoint;
pub use error::{Error, Result};
