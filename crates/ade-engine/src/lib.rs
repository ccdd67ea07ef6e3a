//! ADE Engine - per-answer adaptive decisions
//!
//! Ties the pure policy pieces from `ade-rl` to persistence: mastery
//! estimation, action selection, the progression gate, the Q-table cache,
//! repository implementations (in-memory and PostgreSQL) and metrics.

// Clippy pedantic allows - these are intentional design choices
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::float_cmp)]
#![allow(clippy::too_many_lines)]

pub mod config;
pub mod engine;
pub mod mastery;
pub mod memory;
pub mod metrics;
pub mod misconception;
pub mod postgres;
pub mod progression;
pub mod qtable;
pub mod repository;
pub mod selector;

pub use config::EngineConfig;
pub use engine::{AdaptiveEngine, AnswerOutcome, AnswerRequest, PolicySnapshot, ProcessOutcome};
pub use mastery::{MasteryConfig, MasteryEstimator, MasteryEvent, MasteryUpdate};
pub use memory::{FailPoint, InMemoryStore};
pub use misconception::{Misconception, MisconceptionDetector};
pub use postgres::PgStore;
pub use progression::{
    ProgressionConfig, ProgressionGate, StabilityCheck, StabilityCondition, UnlockNotification,
};
pub use qtable::{CacheStats, QTableCache};
pub use repository::{
    AnswerCommit, Catalog, CommitReceipt, LearnerRepository, ProgressionRepository, QValueUpdate,
    SubmissionRecord, TopicInfo, UnitRef,
};
pub use selector::{ActionSelector, Decision, DecisionInput, Strategy};
