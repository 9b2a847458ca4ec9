pub mod artifact;
pub mod config;
pub mod error;
pub mod io;
pub mod machine;
pub mod memory;
pub mod paths;
pub mod prompt;
pub mod protocol;
pub mod role;
pub mod types;
pub mod unit;

pub use error::{ConductorError, Result};
