#![deny(rust_2024_compatibility)]
#![allow(
    clippy::module_name_repetitions, // e.g. PipelineError in pipeline module
    clippy::missing_errors_doc       // Internal API
)]

pub mod app;
pub mod domain;
pub mod parser;
pub mod pipeline;
pub mod sender;
pub mod tail;

// Re-export main types for easy access
pub use app::{App, Config};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
