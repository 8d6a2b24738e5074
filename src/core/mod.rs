pub mod artifacts;
pub mod config;
pub mod errors;

pub use errors::{CustodyError, CustodyResult};
