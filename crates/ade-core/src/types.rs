//! Value objects shared across the engine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AdeError;
use crate::util::round2;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Learner identifier, assigned by the host application
    StudentId
);
string_id!(
    /// Topic identifier
    TopicId
);
string_id!(
    /// Identifier of a unit that can be unlocked downstream of a topic
    UnitId
);
string_id!(
    /// Client-supplied token identifying one answer submission
    SubmissionToken
);

// ============================================================================
// Difficulty
// ============================================================================

/// Challenge level presented to the learner, always within `[1, 5]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    pub const MIN: Difficulty = Difficulty(1);
    pub const MAX: Difficulty = Difficulty(5);

    /// Create a difficulty, clamping into range
    pub fn new(level: u8) -> Self {
        Self(level.clamp(Self::MIN.0, Self::MAX.0))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn increment(self) -> Self {
        Self::new(self.0.saturating_add(1))
    }

    pub fn decrement(self) -> Self {
        Self::new(self.0.saturating_sub(1))
    }

    pub fn is_min(self) -> bool {
        self == Self::MIN
    }

    pub fn is_max(self) -> bool {
        self == Self::MAX
    }

    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "Very Easy",
            2 => "Easy",
            3 => "Medium",
            4 => "Hard",
            _ => "Very Hard",
        }
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self(3)
    }
}

impl From<u8> for Difficulty {
    fn from(level: u8) -> Self {
        Self::new(level)
    }
}

impl From<Difficulty> for u8 {
    fn from(d: Difficulty) -> Self {
        d.0
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.label())
    }
}

// ============================================================================
// Mastery
// ============================================================================

/// Proficiency band derived from a mastery score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl MasteryLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            MasteryLevel::Beginner => "beginner",
            MasteryLevel::Intermediate => "intermediate",
            MasteryLevel::Advanced => "advanced",
            MasteryLevel::Expert => "expert",
        }
    }
}

/// Mastery score in `[0, 100]`, rounded to two decimals
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Mastery(f64);

impl Mastery {
    pub const INTERMEDIATE: f64 = 30.0;
    pub const ADVANCED: f64 = 80.0;
    pub const EXPERT: f64 = 95.0;

    /// Create a mastery score; non-finite input becomes 0
    pub fn new(value: f64) -> Self {
        if !value.is_finite() {
            return Self(0.0);
        }
        Self(round2(value.clamp(0.0, 100.0)))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn level(self) -> MasteryLevel {
        if self.0 < Self::INTERMEDIATE {
            MasteryLevel::Beginner
        } else if self.0 < Self::ADVANCED {
            MasteryLevel::Intermediate
        } else if self.0 < Self::EXPERT {
            MasteryLevel::Advanced
        } else {
            MasteryLevel::Expert
        }
    }
}

impl From<f64> for Mastery {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Mastery> for f64 {
    fn from(m: Mastery) -> Self {
        m.0
    }
}

impl fmt::Display for Mastery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ============================================================================
// Representation
// ============================================================================

/// How a question is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    #[default]
    Text,
    Visual,
    RealWorld,
}

impl Representation {
    pub const ALL: [Representation; 3] = [
        Representation::Text,
        Representation::Visual,
        Representation::RealWorld,
    ];

    /// Next representation in the text -> visual -> real_world cycle
    pub fn next(self) -> Self {
        match self {
            Representation::Text => Representation::Visual,
            Representation::Visual => Representation::RealWorld,
            Representation::RealWorld => Representation::Text,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Representation::Text => "text",
            Representation::Visual => "visual",
            Representation::RealWorld => "real_world",
        }
    }
}

impl FromStr for Representation {
    type Err = AdeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Representation::Text),
            "visual" => Ok(Representation::Visual),
            "real_world" => Ok(Representation::RealWorld),
            other => Err(AdeError::InvalidInput(format!(
                "unknown representation: {other}"
            ))),
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Cognitive domain
// ============================================================================

/// Six-level cognitive scale a question is tagged with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveDomain {
    #[default]
    KnowledgeRecall,
    Comprehension,
    Application,
    Analysis,
    Evaluation,
    HigherOrderThinking,
}

impl CognitiveDomain {
    pub const ALL: [CognitiveDomain; 6] = [
        CognitiveDomain::KnowledgeRecall,
        CognitiveDomain::Comprehension,
        CognitiveDomain::Application,
        CognitiveDomain::Analysis,
        CognitiveDomain::Evaluation,
        CognitiveDomain::HigherOrderThinking,
    ];

    /// Mastery gain multiplier, 1.0 for recall up to 1.5 for higher-order thinking
    pub fn gain_multiplier(self) -> f64 {
        match self {
            CognitiveDomain::KnowledgeRecall => 1.0,
            CognitiveDomain::Comprehension => 1.1,
            CognitiveDomain::Application => 1.2,
            CognitiveDomain::Analysis => 1.3,
            CognitiveDomain::Evaluation => 1.4,
            CognitiveDomain::HigherOrderThinking => 1.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CognitiveDomain::KnowledgeRecall => "knowledge_recall",
            CognitiveDomain::Comprehension => "comprehension",
            CognitiveDomain::Application => "application",
            CognitiveDomain::Analysis => "analysis",
            CognitiveDomain::Evaluation => "evaluation",
            CognitiveDomain::HigherOrderThinking => "higher_order_thinking",
        }
    }
}

impl FromStr for CognitiveDomain {
    type Err = AdeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CognitiveDomain::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| AdeError::InvalidInput(format!("unknown cognitive domain: {s}")))
    }
}

// ============================================================================
// Cohort
// ============================================================================

/// Experiment arm a student is assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CohortMode {
    /// Learned policy drives decisions
    #[default]
    Adaptive,
    /// Fixed policy: always maintain difficulty
    Control,
}

impl CohortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CohortMode::Adaptive => "adaptive",
            CohortMode::Control => "control",
        }
    }
}

impl FromStr for CohortMode {
    type Err = AdeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adaptive" => Ok(CohortMode::Adaptive),
            "control" => Ok(CohortMode::Control),
            other => Err(AdeError::InvalidInput(format!("unknown cohort mode: {other}"))),
        }
    }
}

// ============================================================================
// Attempt history
// ============================================================================

/// One answered question, as kept in the per-topic attempt history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub was_correct: bool,
    pub difficulty: Difficulty,
    pub representation: Representation,
    /// The question was served right after a hint-then-retry decision
    pub hint_used: bool,
    pub elapsed_seconds: f64,
    pub submitted_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn new(was_correct: bool, difficulty: Difficulty, representation: Representation) -> Self {
        Self {
            was_correct,
            difficulty,
            representation,
            hint_used: false,
            elapsed_seconds: 0.0,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_hint(mut self, hint_used: bool) -> Self {
        self.hint_used = hint_used;
        self
    }

    pub fn with_elapsed(mut self, seconds: f64) -> Self {
        self.elapsed_seconds = seconds;
        self
    }
}
