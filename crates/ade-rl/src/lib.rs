//! ADE RL - the learning core of the Adaptive Decision Engine
//!
//! This crate provides the pure, synchronous pieces of the engine: state
//! encoding, the tabular Q-learning policy, reward shaping and the
//! transition log.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::float_cmp)]
#![allow(clippy::similar_names)]

pub mod algorithm;
pub mod experience;
pub mod reward;
pub mod state;

pub use algorithm::{Choice, PolicyParams, QPolicy, QValues};
pub use experience::{TransitionLog, TransitionRecord, TransitionSummary};
pub use reward::{FiredRule, RewardBreakdown, RewardCalculator, RewardContext, RewardTable};
pub use state::{Action, LearnerTopicState, StateEncoder, StateKey};
