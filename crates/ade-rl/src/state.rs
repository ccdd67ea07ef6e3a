//! Learner state, action space and state-key encoding

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ade_core::{AdeError, Difficulty, Mastery, Representation, StudentId, TopicId};

/// Per-(student, topic) learner state, the aggregate every answer mutates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerTopicState {
    pub student_id: StudentId,
    pub topic_id: TopicId,
    pub difficulty: Difficulty,
    pub mastery: Mastery,
    /// Consecutive correct answers, reset on a wrong answer
    pub correct_streak: u32,
    /// Consecutive wrong answers, reset on a correct answer
    pub wrong_streak: u32,
    pub total_attempts: u32,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub current_representation: Representation,
    pub last_action: Option<Action>,
    pub exploration_count: u32,
    pub exploitation_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl LearnerTopicState {
    /// Fresh state for a first interaction: difficulty 3, mastery 0
    pub fn new(student_id: StudentId, topic_id: TopicId) -> Self {
        Self {
            student_id,
            topic_id,
            difficulty: Difficulty::default(),
            mastery: Mastery::default(),
            correct_streak: 0,
            wrong_streak: 0,
            total_attempts: 0,
            correct_answers: 0,
            wrong_answers: 0,
            current_representation: Representation::default(),
            last_action: None,
            exploration_count: 0,
            exploitation_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// Lifetime accuracy on this topic, 0.0 before the first attempt
    pub fn accuracy(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.correct_answers as f64 / self.total_attempts as f64
        }
    }
}

/// Closed set of tutoring actions the policy chooses between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    DecreaseDifficulty,
    MaintainDifficulty,
    IncreaseDifficulty,
    SwitchToVisual,
    SwitchToRealWorld,
    CycleRepresentation,
    HintThenRetry,
    AdvanceTopic,
    ReviewPrerequisite,
    RepeatCurrent,
}

impl Action {
    /// All actions, in the order used to break Q-value ties
    pub const ALL: [Action; 10] = [
        Action::DecreaseDifficulty,
        Action::MaintainDifficulty,
        Action::IncreaseDifficulty,
        Action::SwitchToVisual,
        Action::SwitchToRealWorld,
        Action::CycleRepresentation,
        Action::HintThenRetry,
        Action::AdvanceTopic,
        Action::ReviewPrerequisite,
        Action::RepeatCurrent,
    ];

    /// Actions that support a struggling learner
    pub const SUPPORT: [Action; 3] = [
        Action::HintThenRetry,
        Action::DecreaseDifficulty,
        Action::ReviewPrerequisite,
    ];

    /// Convert action to index for the discrete action space
    pub fn to_index(self) -> usize {
        match self {
            Action::DecreaseDifficulty => 0,
            Action::MaintainDifficulty => 1,
            Action::IncreaseDifficulty => 2,
            Action::SwitchToVisual => 3,
            Action::SwitchToRealWorld => 4,
            Action::CycleRepresentation => 5,
            Action::HintThenRetry => 6,
            Action::AdvanceTopic => 7,
            Action::ReviewPrerequisite => 8,
            Action::RepeatCurrent => 9,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Number of discrete actions
    pub fn action_space_size() -> usize {
        Self::ALL.len()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::DecreaseDifficulty => "decrease_difficulty",
            Action::MaintainDifficulty => "maintain_difficulty",
            Action::IncreaseDifficulty => "increase_difficulty",
            Action::SwitchToVisual => "switch_to_visual",
            Action::SwitchToRealWorld => "switch_to_real_world",
            Action::CycleRepresentation => "cycle_representation",
            Action::HintThenRetry => "hint_then_retry",
            Action::AdvanceTopic => "advance_topic",
            Action::ReviewPrerequisite => "review_prerequisite",
            Action::RepeatCurrent => "repeat_current",
        }
    }

    pub fn is_support(self) -> bool {
        Self::SUPPORT.contains(&self)
    }

    /// Apply the action's side effect (difficulty or representation) to a state
    pub fn apply(self, state: &mut LearnerTopicState) {
        match self {
            Action::DecreaseDifficulty => state.difficulty = state.difficulty.decrement(),
            Action::IncreaseDifficulty => state.difficulty = state.difficulty.increment(),
            Action::SwitchToVisual => state.current_representation = Representation::Visual,
            Action::SwitchToRealWorld => state.current_representation = Representation::RealWorld,
            Action::CycleRepresentation => {
                state.current_representation = state.current_representation.next();
            }
            Action::MaintainDifficulty
            | Action::HintThenRetry
            | Action::AdvanceTopic
            | Action::ReviewPrerequisite
            | Action::RepeatCurrent => {}
        }
        state.last_action = Some(self);
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AdeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| AdeError::InvalidInput(format!("unknown action: {s}")))
    }
}

/// Bucketed view of a learner state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateBuckets {
    pub mastery: u8,
    pub difficulty: u8,
    pub correct_streak: u8,
    pub wrong_streak: u8,
}

/// Opaque key indexing the Q-table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(String);

impl StateKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<StateBuckets> for StateKey {
    fn from(b: StateBuckets) -> Self {
        StateKey(format!(
            "m{}:d{}:c{}:w{}",
            b.mastery, b.difficulty, b.correct_streak, b.wrong_streak
        ))
    }
}

impl FromStr for StateKey {
    type Err = AdeError;

    /// Accept only keys in the encoder's own format
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AdeError::InvalidInput(format!("malformed state key: {s}"));
        let parts: Vec<&str> = s.split(':').collect();
        let [m, d, c, w] = parts.as_slice() else {
            return Err(invalid());
        };
        let field = |part: &str, prefix: char| -> Result<u8, AdeError> {
            part.strip_prefix(prefix)
                .and_then(|n| n.parse::<u8>().ok())
                .ok_or_else(invalid)
        };
        let buckets = StateBuckets {
            mastery: field(*m, 'm')?,
            difficulty: field(*d, 'd')?,
            correct_streak: field(*c, 'c')?,
            wrong_streak: field(*w, 'w')?,
        };
        Ok(StateKey::from(buckets))
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discretizes learner metrics into a finite state space
///
/// Mastery falls into five 20-point buckets, the correct streak into
/// pairs capped at 3, and the wrong streak is capped at 3.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateEncoder;

impl StateEncoder {
    const MASTERY_BUCKET_WIDTH: f64 = 20.0;
    const MAX_MASTERY_BUCKET: u8 = 4;
    const MAX_STREAK_BUCKET: u32 = 3;

    pub fn new() -> Self {
        Self
    }

    pub fn buckets(&self, state: &LearnerTopicState) -> StateBuckets {
        let mastery = (state.mastery.value() / Self::MASTERY_BUCKET_WIDTH).floor() as u8;
        StateBuckets {
            mastery: mastery.min(Self::MAX_MASTERY_BUCKET),
            difficulty: state.difficulty.level(),
            correct_streak: (state.correct_streak / 2).min(Self::MAX_STREAK_BUCKET) as u8,
            wrong_streak: state.wrong_streak.min(Self::MAX_STREAK_BUCKET) as u8,
        }
    }

    pub fn encode(&self, state: &LearnerTopicState) -> StateKey {
        StateKey::from(self.buckets(state))
    }
}
