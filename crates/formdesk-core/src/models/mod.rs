//! Data models for the forms subsystem
//!
//! Each sub-module covers one concern: the form record itself, filters and pagination,
//! the activity/analytics side collections, statistics and upload progress.

mod activity;
mod filter;
mod form;
mod stats;
mod upload;

pub use activity::*;
pub use filter::*;
pub use form::*;
pub use stats::*;
pub use upload::*;
