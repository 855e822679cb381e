//! Core types, configuration, and error handling for the Strata toolkit.
//!
//! This crate provides the shared foundation used by all other Strata crates:
//! - [`StrataError`]: unified error type using `thiserror`
//! - [`StrataConfig`] / [`MiningConfig`]: configuration loaded from `.strata.toml`
//! - Shared data model: [`Commit`], [`Modification`], [`LineRecord`],
//!   [`ParsedDiff`], [`MethodMetrics`], [`Developer`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{DiffAlgorithm, MiningConfig, Order, StrataConfig, CONFIG_FILE};
pub use error::StrataError;
pub use types::{
    ChangeBlock, ChangeKind, Commit, CommitStub, Developer, HunkHeader, LineRecord, MethodMetrics,
    Modification, OutputFormat, ParsedDiff,
};

/// A convenience `Result` type for Strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;
