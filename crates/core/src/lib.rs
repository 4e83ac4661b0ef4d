//! Core domain types for the lmsbridge LMS integration.

pub mod config;
pub mod errors;
pub mod lms;

pub use config::LmsConfig;
pub use errors::{DatabaseError, Error, Result};
