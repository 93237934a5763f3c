//! # cmdb
//!
//! Command line front end of the mainline topology and association
//! consistency engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │               apps/cmdb (THE BINARY)          │
//! │                                               │
//! │   ┌──────────┐   ┌──────────┐   ┌──────────┐  │
//! │   │   CLI    │   │  Config  │   │  Audit   │  │
//! │   │  (clap)  │   │  (toml)  │   │ (JSONL)  │  │
//! │   └────┬─────┘   └────┬─────┘   └────┬─────┘  │
//! │        └──────────────┼──────────────┘        │
//! │                       ▼                       │
//! │               ┌──────────────┐                │
//! │               │  cmdb-core   │                │
//! │               │ (THE LOGIC)  │                │
//! │               └──────────────┘                │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! cmdb init
//! cmdb biz create shop
//! cmdb level insert region --name Region --parent biz
//! cmdb topo --id 2 --with-statistics
//! cmdb biz archive 2 && cmdb biz delete 2
//! ```

use clap::Parser;
use cmdb::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // CMDB_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("CMDB_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cmdb=info,cmdb_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!(code = e.code(), "Error: {}", e);
        std::process::exit(1);
    }
}
