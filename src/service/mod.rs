//! Document stream orchestration
//!
//! [`LiveDocService`] turns document requests into shared, self-healing
//! streams of reconstructed documents, and reports connection health.

mod builder;
mod document;
mod livedoc;
mod merge;

pub use builder::*;
pub(crate) use document::*;
pub use livedoc::*;
pub use merge::MergeStrategy;

#[cfg(test)]
mod merge_test;
