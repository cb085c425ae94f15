//! Safe LLM-to-SQL gateway library.
//!
//! The core pipeline (`core`) is the hard part of this crate: a natural
//! language question goes in, a deterministically-validated read-only SQL
//! statement and its result come out. `main.rs` wires the pipeline's
//! components into a thin `axum` HTTP adapter; everything a caller needs to
//! embed the pipeline in a different transport lives here instead.

pub mod config;
pub mod core;
pub mod db;
pub mod models;
pub mod utils;

pub use config::Config;
