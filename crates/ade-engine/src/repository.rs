//! Persistence collaborators
//!
//! The engine owns no storage. Learner state, Q-values, attempt history and
//! submission tokens live behind [`LearnerRepository`]; unlocks behind
//! [`ProgressionRepository`]; reference data behind [`Catalog`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ade_core::{AttemptRecord, CohortMode, Result, StudentId, SubmissionToken, TopicId, UnitId};
use ade_rl::{Action, LearnerTopicState, QValues, StateKey, TransitionRecord};

/// A unit that can be unlocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRef {
    pub id: UnitId,
    pub display_name: String,
}

/// Reference data for a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub id: TopicId,
    pub name: String,
    /// Unit unlocked once the topic is stably mastered
    pub next_unit: Option<UnitRef>,
}

/// One Q-value write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QValueUpdate {
    pub state_key: StateKey,
    pub action: Action,
    pub value: f64,
}

/// Everything one processed answer writes, committed as a unit
#[derive(Debug, Clone)]
pub struct AnswerCommit {
    pub state: LearnerTopicState,
    /// Absent when learning is disabled (control cohort)
    pub q_update: Option<QValueUpdate>,
    pub attempt: AttemptRecord,
    pub token: SubmissionToken,
    /// Unit to unlock in the same commit when the progression gate is met
    pub unlock: Option<UnitId>,
    /// Serialized outcome, replayed on a duplicate submission
    pub outcome: serde_json::Value,
}

/// What a successful commit changed beyond the answer itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// The requested unlock created a new record
    pub newly_unlocked: bool,
}

/// A previously accepted submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub token: SubmissionToken,
    pub outcome: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait LearnerRepository: Send + Sync {
    /// Current state, or a fresh one (difficulty 3, mastery 0) if none exists
    async fn load_state(&self, student: &StudentId, topic: &TopicId) -> Result<LearnerTopicState>;

    /// Up to `limit` most recent attempts, most recent last
    async fn recent_attempts(
        &self,
        student: &StudentId,
        topic: &TopicId,
        limit: usize,
    ) -> Result<Vec<AttemptRecord>>;

    /// Q-values of one state; empty for an unseen state
    async fn load_q_values(&self, student: &StudentId, key: &StateKey) -> Result<QValues>;

    async fn find_submission(
        &self,
        student: &StudentId,
        topic: &TopicId,
        token: &SubmissionToken,
    ) -> Result<Option<SubmissionRecord>>;

    /// Write state, Q-value, attempt, submission token and unlock atomically.
    ///
    /// Either everything is stored or nothing is.
    async fn commit_answer(&self, commit: AnswerCommit) -> Result<CommitReceipt>;

    /// Append to the analytics log
    async fn append_transition(&self, record: TransitionRecord) -> Result<()>;

    async fn cohort_mode(&self, student: &StudentId) -> Result<CohortMode>;
}

#[async_trait]
pub trait ProgressionRepository: Send + Sync {
    async fn is_unlocked(&self, student: &StudentId, unit: &UnitId) -> Result<bool>;

    /// Create or refresh the unlock record; returns whether it was newly created
    async fn unlock(&self, student: &StudentId, unit: &UnitId) -> Result<bool>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn topic(&self, topic: &TopicId) -> Result<Option<TopicInfo>>;

    async fn student_exists(&self, student: &StudentId) -> Result<bool>;
}
