//! claircore is an embeddable container-image vulnerability analysis engine.
//!
//! It ingests a content-addressed [`manifest::Manifest`], discovers the
//! software artifacts installed in the image by fanning a set of pluggable
//! [`scanner`] leaves out across the image's layers, folds the resulting
//! per-layer facts into the image's effective package set with a
//! [`coalesce::Coalescer`] and [`whiteout`] resolver, and persists progress
//! through a pluggable [`store::Store`] so that crashes and incremental
//! scanner upgrades never repeat already-completed work.
//!
//! The [`indexer`] module ties all of this together behind a single
//! [`indexer::Controller::index`] entrypoint.

pub mod coalesce;
pub mod config;
pub mod digest;
mod error;
pub mod ecosystem;
pub mod indexer;
pub mod layer;
pub mod lock;
pub mod manifest;
pub mod realize;
pub mod report;
pub mod scanner;
pub mod store;
pub mod whiteout;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use config::Config;
pub use digest::Digest;
pub use error::{Error, Result};
pub use manifest::{LayerRef, Manifest};
pub use report::IndexReport;
