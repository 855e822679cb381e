//! Git history mining: commit traversal, line provenance and process metrics.
//!
//! Repositories are read through the [`backend::VcsBackend`] trait, with a
//! libgit2 implementation in [`git`] and an in-memory one in [`memory`] for
//! constructed histories. [`traverse`] streams the selected commits,
//! [`provenance`] blames the lines a commit removes, [`process`] aggregates
//! per-file change metrics over a range and [`dmm`] scores commits with the
//! Delta Maintainability Model.

pub mod backend;
pub mod dmm;
pub mod filter;
pub mod git;
pub mod memory;
pub mod process;
pub mod provenance;
pub mod scratch;
pub mod traverse;

pub use backend::{MethodsProvider, VcsBackend, WalkScope};
pub use traverse::{traverse, traverse_backend, CommitStream, RepoCommits};
