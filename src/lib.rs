//! Fault Injector Library
//!
//! Composable fault injection for HTTP request pipelines, built as tower layers.
//!
//! # Features
//!
//! - **Delay**: added latency before or after the downstream call
//! - **Error**: forced status responses that short-circuit the pipeline
//! - **Abort**: dropped connections with no response at all
//! - **Combinations**: delay followed by an error or an abort
//! - **Stacking**: every layer draws its own decision, so layers compose freely
//! - **Host server**: a standalone reverse proxy that injects configured faults

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod fault;
pub mod gateway;

pub use error::{Aborted, BoxError, Error, Result, is_aborted};
pub use fault::{Fault, FaultKind, FaultLayer, FaultService, RandomSource, decide};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
