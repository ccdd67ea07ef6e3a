//! Transition records (the episode log) and a bounded in-memory log

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ade_core::CohortMode;

use crate::state::{Action, LearnerTopicState};

/// A single (s, a, r, s') transition with its analysis context.
///
/// Append-only and never read back by the policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: Uuid,
    pub prev_state: LearnerTopicState,
    pub action: Action,
    pub reward: f64,
    pub next_state: LearnerTopicState,
    pub was_correct: bool,
    pub elapsed_seconds: f64,
    pub explored: bool,
    pub epsilon: f64,
    pub cohort: CohortMode,
    pub recorded_at: DateTime<Utc>,
}

impl TransitionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prev_state: LearnerTopicState,
        action: Action,
        reward: f64,
        next_state: LearnerTopicState,
        was_correct: bool,
        elapsed_seconds: f64,
        explored: bool,
        epsilon: f64,
        cohort: CohortMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prev_state,
            action,
            reward,
            next_state,
            was_correct,
            elapsed_seconds,
            explored,
            epsilon,
            cohort,
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregate figures over the transitions currently held in a log
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransitionSummary {
    pub count: usize,
    pub mean_reward: f64,
    pub accuracy: f64,
    pub exploration_ratio: f64,
}

/// Bounded transition log; the oldest record is dropped when full
pub struct TransitionLog {
    buffer: VecDeque<TransitionRecord>,
    capacity: usize,
}

impl TransitionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, record: TransitionRecord) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// All records, oldest first
    pub fn all(&self) -> Vec<TransitionRecord> {
        self.buffer.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.buffer.iter()
    }

    pub fn summary(&self) -> TransitionSummary {
        let count = self.buffer.len();
        if count == 0 {
            return TransitionSummary::default();
        }
        let n = count as f64;
        let total_reward: f64 = self.buffer.iter().map(|t| t.reward).sum();
        let correct = self.buffer.iter().filter(|t| t.was_correct).count();
        let explored = self.buffer.iter().filter(|t| t.explored).count();

        TransitionSummary {
            count,
            mean_reward: total_reward / n,
            accuracy: correct as f64 / n,
            exploration_ratio: explored as f64 / n,
        }
    }
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self::new(10000)
    }
}
