//! Shared data model, injected-capability contracts, error kinds and
//! configuration for the folder indexing lifecycle engine.

pub mod capability;
pub mod config;
pub mod error;
pub mod model;

pub use capability::{Chunker, Embedder, FacadeLogger, FileSystem, IgnoreRules, Logger, Parser};
pub use config::FolderConfig;
pub use error::{EmbedError, ParseError, ProbeError, ReadError};
pub use model::*;
