//! Server module for Plaza
//!
//! Contains the main server initialization and runtime logic.
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for all server components
//! - `loader`: Configuration loading from files and environment
//! - `init`: Main server initialization and run loop

pub mod config;
mod init;
mod loader;

// Re-export public API
pub use config::{AppConfig, SurfaceMode};
pub use init::{run, ServerContext};
pub use loader::load_config;
