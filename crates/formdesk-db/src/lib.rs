//! FormDesk Database Library
//!
//! Document store access for forms, activity and analytics.

pub mod db;

pub use db::*;
