//! Misconception patterns in recent attempts

use serde::{Deserialize, Serialize};

use ade_core::{AttemptRecord, Representation};

/// Attempts inspected, most recent last
pub const WINDOW: usize = 5;

/// A recurring error pattern worth scaffolding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Misconception {
    /// Repeated misses in one representation
    Representation { representation: Representation, misses: usize },
    /// Repeated misses on easy questions, pointing at a missing prerequisite
    PrerequisiteGap { misses: usize },
}

impl Misconception {
    pub fn describe(&self) -> String {
        match self {
            Misconception::Representation {
                representation,
                misses,
            } => format!("{misses} recent misses in the {representation} representation"),
            Misconception::PrerequisiteGap { misses } => {
                format!("{misses} recent misses at low difficulty")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MisconceptionDetector;

impl MisconceptionDetector {
    const SAME_REPRESENTATION_MISSES: usize = 2;
    const EASY_MISSES: usize = 3;
    const EASY_MAX_LEVEL: u8 = 2;

    pub fn new() -> Self {
        Self
    }

    /// Look for a pattern in the last `WINDOW` attempts
    pub fn detect(&self, history: &[AttemptRecord]) -> Option<Misconception> {
        let start = history.len().saturating_sub(WINDOW);
        let misses: Vec<&AttemptRecord> = history[start..]
            .iter()
            .filter(|a| !a.was_correct)
            .collect();

        for representation in Representation::ALL {
            let count = misses
                .iter()
                .filter(|a| a.representation == representation)
                .count();
            if count >= Self::SAME_REPRESENTATION_MISSES {
                return Some(Misconception::Representation {
                    representation,
                    misses: count,
                });
            }
        }

        let easy = misses
            .iter()
            .filter(|a| a.difficulty.level() <= Self::EASY_MAX_LEVEL)
            .count();
        (easy >= Self::EASY_MISSES).then_some(Misconception::PrerequisiteGap { misses: easy })
    }
}
