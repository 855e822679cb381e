//! Diff parsing and Delta Maintainability Model scoring.
//!
//! Turns raw unified-diff text into line records ([`parser`]) and scores
//! method-level risk changes ([`dmm`]). Everything here is a pure function of
//! its input; no repository access happens in this crate.

pub mod dmm;
pub mod parser;
