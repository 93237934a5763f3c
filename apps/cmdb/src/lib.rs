//! # cmdb
//!
//! Library half of the `cmdb` binary:
//! - `cli`: argument parsing and command execution
//! - `config`: TOML configuration loading
//! - `audit`: audit sinks, including the JSON-lines file writer
//! - `json`: conversion between engine documents and JSON

pub mod audit;
pub mod cli;
pub mod config;
pub mod json;
