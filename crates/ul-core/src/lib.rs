//! # ul-core
//!
//! Core contract for uplim: the likelihood-engine trait, error types, and
//! parameter-state snapshots.
//!
//! ## Architecture
//!
//! The upper-limit machinery (`ul-inference`) depends on the
//! [`traits::LikelihoodEngine`] trait, NOT on a concrete fitting backend.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod state;
pub mod traits;

pub use error::{Error, Result};
pub use state::{LikelihoodState, ParamState};
pub use traits::LikelihoodEngine;
