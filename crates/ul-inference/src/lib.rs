//! Upper limits on one parameter of a likelihood model.
//!
//! Two complementary limits are provided, both driven through the
//! [`ul_core::LikelihoodEngine`] trait:
//!
//! - [`bayesian_upper_limit`]: integrate the profile likelihood between
//!   interval bounds found by a cached approximate/exact crossing search
//!   and invert the cumulative at the confidence level;
//! - [`profile_upper_limit`]: the frequentist chi-squared bound, a single
//!   high-side threshold crossing of the profiled cost.
//!
//! [`scan_upper_limit`](scan::scan_upper_limit) is a coarser fixed-step
//! variant, and [`engine::FnEngine`] is a ready-made engine over a plain
//! NLL closure for stand-alone use and testing.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bounds;
pub mod cache;
pub mod cost;
pub mod engine;
pub mod extract;
pub mod limits;
pub mod optimizer;
pub mod quad;
pub mod root;
pub mod scan;
pub mod spline;

pub use engine::FnEngine;
pub use limits::{
    bayesian_upper_limit, profile_upper_limit, PointProbability, ProfileLimitResult,
    UpperLimitOptions, UpperLimitResult,
};
pub use scan::{scan_upper_limit, ScanOptions, ScanResult};
