//! Tabular Q-learning policy with a decaying epsilon-greedy schedule

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use ade_core::{AdeError, Result};

use crate::state::Action;

/// Q-values of one state; actions never updated are absent and read as 0
pub type QValues = HashMap<Action, f64>;

/// Learning hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyParams {
    /// Bellman step size (alpha)
    pub learning_rate: f64,
    /// Weight of the best next-state value (gamma)
    pub discount_factor: f64,
    pub initial_epsilon: f64,
    /// Per-attempt multiplicative decay of epsilon
    pub epsilon_decay: f64,
    pub min_epsilon: f64,
}

impl Default for PolicyParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.95,
            initial_epsilon: 1.0,
            epsilon_decay: 0.995,
            min_epsilon: 0.01,
        }
    }
}

impl PolicyParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(AdeError::Config(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.discount_factor) {
            return Err(AdeError::Config(format!(
                "discount_factor must be in [0, 1], got {}",
                self.discount_factor
            )));
        }
        if !(self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0) {
            return Err(AdeError::Config(format!(
                "epsilon_decay must be in (0, 1], got {}",
                self.epsilon_decay
            )));
        }
        if !(0.0..=1.0).contains(&self.min_epsilon)
            || !(0.0..=1.0).contains(&self.initial_epsilon)
            || self.min_epsilon > self.initial_epsilon
        {
            return Err(AdeError::Config(format!(
                "epsilon bounds must satisfy 0 <= min ({}) <= initial ({}) <= 1",
                self.min_epsilon, self.initial_epsilon
            )));
        }
        Ok(())
    }
}

/// Outcome of an epsilon-greedy draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Random pick among the candidates
    Explore(Action),
    /// Highest-valued candidate
    Exploit(Action),
    /// Exploitation requested but every candidate reads 0: nothing learned yet
    Unseen,
}

/// Q-learning policy
///
/// Holds only hyperparameters. Q-values are owned by the caller (a per-student
/// cache backed by persistent storage) and passed in per decision, which keeps
/// every method here pure.
#[derive(Debug, Clone, Default)]
pub struct QPolicy {
    params: PolicyParams,
}

impl QPolicy {
    pub fn new(params: PolicyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PolicyParams {
        &self.params
    }

    /// `max(min, initial * decay^attempts)`, non-increasing in `attempts`
    pub fn epsilon(&self, attempts: u32) -> f64 {
        let decayed = self.params.initial_epsilon * self.params.epsilon_decay.powf(f64::from(attempts));
        decayed.max(self.params.min_epsilon)
    }

    /// Draw `r` in `[0, 1)`; explore when `r < epsilon`
    pub fn should_explore<R: Rng + ?Sized>(&self, epsilon: f64, rng: &mut R) -> bool {
        rng.gen::<f64>() < epsilon
    }

    /// Uniform pick among candidates
    pub fn random_action<R: Rng + ?Sized>(&self, candidates: &[Action], rng: &mut R) -> Option<Action> {
        candidates.choose(rng).copied()
    }

    /// Argmax over candidates, ties broken by `Action::ALL` order.
    ///
    /// Returns `None` when every candidate reads exactly 0, i.e. the state
    /// has never been updated for any of them.
    pub fn best_action(&self, q_values: &QValues, candidates: &[Action]) -> Option<Action> {
        let mut best: Option<(Action, f64)> = None;
        let mut any_learned = false;

        for action in Action::ALL.iter().filter(|a| candidates.contains(a)) {
            let value = q_values.get(action).copied().unwrap_or(0.0);
            if value != 0.0 {
                any_learned = true;
            }
            match best {
                Some((_, best_value)) if value <= best_value => {}
                _ => best = Some((*action, value)),
            }
        }

        if any_learned {
            best.map(|(action, _)| action)
        } else {
            None
        }
    }

    /// Plain epsilon-greedy selection over candidates
    pub fn select<R: Rng + ?Sized>(
        &self,
        q_values: &QValues,
        candidates: &[Action],
        epsilon: f64,
        rng: &mut R,
    ) -> Choice {
        if self.should_explore(epsilon, rng) {
            if let Some(action) = self.random_action(candidates, rng) {
                return Choice::Explore(action);
            }
        }
        self.best_action(q_values, candidates)
            .map_or(Choice::Unseen, Choice::Exploit)
    }

    /// `max_a Q(state, a)`, with unvisited actions (and unseen states) read as 0
    pub fn max_value(q_values: &QValues) -> f64 {
        Action::ALL
            .iter()
            .map(|a| q_values.get(a).copied().unwrap_or(0.0))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Bellman update: `Q + alpha * (r + gamma * max_next - Q)`
    pub fn updated_value(&self, current: f64, reward: f64, next_values: &QValues) -> f64 {
        let target = reward + self.params.discount_factor * Self::max_value(next_values);
        current + self.params.learning_rate * (target - current)
    }
}
