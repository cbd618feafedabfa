//! Tile Canvas Core
//!
//! Canonical encoding, content hashing, the event envelope/validator, and the
//! Normal-Form engine that the rest of the tile canvas workspace builds on.
//!
//! # Modules
//!
//! - [`canonical`]: deterministic JSON byte-image for hashing
//! - [`hashing`]: HashRef identifiers and hash derivations
//! - [`types`]: envelope, operation, and materialized-state types
//! - [`event`]: envelope/payload validation
//! - [`normalize`]: normalization, ordering, pruning, trace/state hashing
//! - [`error`]: error types

pub mod canonical;
pub mod error;
pub mod event;
pub mod hashing;
pub mod normalize;
pub mod types;

pub use error::{Error, Result};
pub use hashing::{Algo, HashRef, Sid, GENESIS};
pub use types::*;
