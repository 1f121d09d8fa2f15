//! Core engine for Finch streams.
//!
//! Resolves stage definitions into flat pipelines, compiles them into chains
//! of transformation stages, runs them in isolated worker processes, and keeps
//! them running against file changes in watch mode.

#![warn(clippy::pedantic)]

pub mod compile;
pub mod config;
pub mod error;
pub mod launcher;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod resolve;
pub mod task_stream;
pub mod watch;

pub use compile::{compile, compile_pipeline, compose_pipeline, CompiledStage, ValueStream};
pub use config::settings::EngineSettings;
pub use error::PipelineError;
pub use launcher::{start, PathStream, StartOptions, StreamItem};
pub use orchestrator::{Orchestrator, PipelineStream, StreamOptions};
pub use pipeline::{register_pipeline_factory, PipelineArgs, PIPELINE_FACTORY};
pub use registry::TransformRegistry;
pub use resolve::{ResolvedPipeline, Resolver};
pub use watch::{watch, WatchEvent, WatchEventKind, WatchOptions, WatchSettings, WatchStream};
