pub mod config;
pub mod init;
pub mod memory;
pub mod phase;
pub mod prompt;
pub mod run;
pub mod unit;
