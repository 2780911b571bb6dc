//! Build driver for a systems programming language: content-addressed
//! caching, a topologically ordered task graph, file-lock arbitration
//! between concurrent build drivers, and tag-filtered source discovery.
//!
//! This crate implements the `build`/`run`/`test`/`cache` subcommands; the
//! language frontend, SSA backend, assembler, and linker are external tools
//! invoked through [`driver::run_task`].

pub mod arch;
pub mod cache;
pub mod config;
pub mod context;
pub mod discover;
pub mod driver;
pub mod error;
pub mod fingerprint;
pub mod ident;
pub mod pathbuf;
pub mod resolver;
pub mod scheduler;
pub mod stage;
pub mod tags;
pub mod taskgraph;

pub use error::{DriverError, Result};
