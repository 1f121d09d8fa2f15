//! Isolated execution for Finch pipelines.
//!
//! The parent side ([`runner`]) forks a worker process, ships it a
//! [`Setup`](finch_types::Setup) message, and relays its output back as a
//! stream. The child side ([`worker`]) looks the requested factory up in a
//! [`FactoryRegistry`] and streams its outputs over the wire protocol.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod env;
pub mod error;
pub mod runner;
pub mod worker;

pub use env::{ProcessOptions, SpawnEnv, WorkerCommand};
pub use error::{Result, RuntimeError};
pub use runner::{run, WorkerStream};
pub use worker::{serve, serve_stdio, Factory, FactoryRegistry, OutputStream};
