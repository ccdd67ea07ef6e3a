//! ADE Core - value objects and errors for the Adaptive Decision Engine
//!
//! This crate provides the types shared by the policy, the mastery
//! estimator and the persistence layer.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod types;
pub mod util;

pub use error::{AdeError, Result};
pub use types::*;
