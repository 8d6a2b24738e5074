pub mod artifacts;
pub mod naming;

pub use artifacts::{ensure_absent, read_json, read_value, write_new};
