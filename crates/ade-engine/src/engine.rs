//! Answer processing
//!
//! `AdaptiveEngine::process_answer` runs the full per-answer pipeline:
//! encode the previous state, update mastery, encode the new state, choose
//! an action, compute the reward, update the Q-value, check the progression
//! gate, then commit everything in one repository call.
//!
//! Answers for the same (student, topic) are serialized by a keyed lock.
//! A second per-student lock covers the Q-table read-modify-write, which is
//! shared across topics. Different students proceed in parallel.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ade_core::util::{finite_or_zero, sanitize_elapsed};
use ade_core::{
    AdeError, AttemptRecord, CognitiveDomain, CohortMode, Difficulty, Mastery, Result, StudentId,
    SubmissionToken, TopicId,
};
use ade_rl::{
    Action, FiredRule, LearnerTopicState, QPolicy, QValues, RewardCalculator, RewardContext,
    StateEncoder, StateKey, TransitionRecord,
};

use crate::config::EngineConfig;
use crate::mastery::{MasteryEstimator, MasteryEvent};
use crate::metrics;
use crate::misconception::MisconceptionDetector;
use crate::progression::{ProgressionGate, StabilityCheck, UnlockNotification};
use crate::qtable::{CacheStats, QTableCache};
use crate::repository::{
    AnswerCommit, Catalog, LearnerRepository, ProgressionRepository, QValueUpdate,
};
use crate::selector::{ActionSelector, DecisionInput, Strategy};

/// One submitted answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub student_id: StudentId,
    pub topic_id: TopicId,
    pub token: SubmissionToken,
    pub was_correct: bool,
    pub elapsed_seconds: f64,
    #[serde(default)]
    pub domain: CognitiveDomain,
}

/// Decision and bookkeeping produced for one answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub action: Action,
    pub reason: String,
    pub strategy: Strategy,
    pub used_exploration: bool,
    pub epsilon: f64,
    pub new_difficulty: Difficulty,
    pub new_mastery: Mastery,
    pub mastery_delta: f64,
    pub reward: f64,
    pub reward_rules: Vec<FiredRule>,
    pub events: Vec<MasteryEvent>,
    pub stability: StabilityCheck,
    pub unlock: Option<UnlockNotification>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Processed(AnswerOutcome),
    /// The token was already processed; nothing was changed
    Duplicate { previous: Option<AnswerOutcome> },
}

impl ProcessOutcome {
    /// The outcome to show the caller, if one is available
    pub fn outcome(&self) -> Option<&AnswerOutcome> {
        match self {
            ProcessOutcome::Processed(outcome) => Some(outcome),
            ProcessOutcome::Duplicate { previous } => previous.as_ref(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, ProcessOutcome::Duplicate { .. })
    }
}

/// Learned values for one state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySnapshot {
    pub state_key: StateKey,
    /// Every action in tie-break order; unvisited actions read 0
    pub q_values: Vec<(Action, f64)>,
    pub best: Option<Action>,
    pub epsilon: f64,
}

/// One async mutex per key, created on demand; idle entries are pruned
struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Lock entries kept before idle ones are pruned
    const PRUNE_THRESHOLD: usize = 1024;

    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() > Self::PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks.entry(key.clone()).or_default().clone()
    }
}

pub struct AdaptiveEngine {
    learners: Arc<dyn LearnerRepository>,
    progression: Arc<dyn ProgressionRepository>,
    catalog: Arc<dyn Catalog>,
    encoder: StateEncoder,
    estimator: MasteryEstimator,
    selector: ActionSelector,
    rewards: RewardCalculator,
    gate: ProgressionGate,
    detector: MisconceptionDetector,
    cache: QTableCache,
    /// Serializes answers for one (student, topic)
    topic_locks: KeyedLocks<(StudentId, TopicId)>,
    /// Serializes Q-table read-modify-write for one student across topics
    qtable_locks: KeyedLocks<StudentId>,
    rng: Mutex<StdRng>,
}

impl AdaptiveEngine {
    pub fn new(
        config: &EngineConfig,
        learners: Arc<dyn LearnerRepository>,
        progression: Arc<dyn ProgressionRepository>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        let policy = QPolicy::new(config.policy.params());
        Self {
            learners,
            progression,
            catalog,
            encoder: StateEncoder::new(),
            estimator: MasteryEstimator::new(config.mastery.clone()),
            selector: ActionSelector::new(policy, config.policy.struggling_support_bias),
            rewards: RewardCalculator::new(config.rewards.clone()),
            gate: ProgressionGate::new(config.progression.clone()),
            detector: MisconceptionDetector::new(),
            cache: QTableCache::new(config.cache.max_students),
            topic_locks: KeyedLocks::new(),
            qtable_locks: KeyedLocks::new(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Build an engine over a single store implementing every repository
    pub fn with_store<S>(config: &EngineConfig, store: Arc<S>) -> Self
    where
        S: LearnerRepository + ProgressionRepository + Catalog + 'static,
    {
        Self::new(config, store.clone(), store.clone(), store)
    }

    /// Make exploration draws reproducible
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Process one answer; duplicates are reported, not reprocessed
    pub async fn process_answer(&self, request: AnswerRequest) -> Result<ProcessOutcome> {
        let result = self.process(request).await;
        match &result {
            Ok(ProcessOutcome::Processed(_)) => metrics::record_answer("processed"),
            Ok(ProcessOutcome::Duplicate { .. }) => metrics::record_answer("duplicate"),
            Err(e) => {
                warn!("Answer processing failed: {}", e);
                metrics::record_answer("error");
            }
        }
        result
    }

    async fn process(&self, request: AnswerRequest) -> Result<ProcessOutcome> {
        let AnswerRequest {
            student_id: student,
            topic_id: topic,
            token,
            was_correct,
            elapsed_seconds,
            domain,
        } = request;
        let elapsed = sanitize_elapsed(elapsed_seconds);

        let topic_info = self
            .catalog
            .topic(&topic)
            .await?
            .ok_or_else(|| AdeError::UnknownTopic(topic.to_string()))?;
        if !self.catalog.student_exists(&student).await? {
            return Err(AdeError::UnknownStudent(student.to_string()));
        }

        let topic_lock = self.topic_locks.get(&(student.clone(), topic.clone()));
        let _topic_guard = topic_lock.lock().await;

        if let Some(previous) = self.learners.find_submission(&student, &topic, &token).await? {
            debug!(student = %student, topic = %topic, token = %token, "Duplicate submission");
            let previous = previous.outcome.and_then(|value| {
                serde_json::from_value::<AnswerOutcome>(value)
                    .map_err(|e| warn!("Stored outcome for {} is unreadable: {}", token, e))
                    .ok()
            });
            return Ok(ProcessOutcome::Duplicate { previous });
        }

        let prev = self.learners.load_state(&student, &topic).await?;
        let cohort = self.learners.cohort_mode(&student).await?;
        let prev_key = self.encoder.encode(&prev);

        let update = self.estimator.update(&prev, was_correct, domain);
        let next = update.state;
        let next_key = self.encoder.encode(&next);

        let attempt = AttemptRecord::new(was_correct, prev.difficulty, prev.current_representation)
            .with_hint(prev.last_action == Some(Action::HintThenRetry))
            .with_elapsed(elapsed);
        let history_limit = self.gate.config().history_limit;
        let mut history = match self
            .learners
            .recent_attempts(&student, &topic, history_limit.saturating_sub(1))
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(student = %student, topic = %topic, "Recent attempts unavailable, continuing without history: {}", e);
                Vec::new()
            }
        };
        history.push(attempt.clone());

        let misconception = self.detector.detect(&history);

        // Held until the cache is updated so answers on other topics cannot
        // compute their update from the same stale Q-value
        let qtable_lock = self.qtable_locks.get(&student);
        let qtable_guard = qtable_lock.lock().await;
        let next_q = self
            .cache
            .get_or_load(self.learners.as_ref(), &student, &next_key)
            .await?;

        let decision = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.selector.decide(
                &DecisionInput {
                    state: &next,
                    q_values: &next_q,
                    cohort,
                    misconception,
                },
                &mut *rng,
            )
        };

        let breakdown = self.rewards.calculate(&RewardContext {
            prev: &prev,
            next: &next,
            action: decision.action,
            was_correct,
            elapsed_seconds: elapsed,
        });
        let reward = finite_or_zero(breakdown.total, "reward");

        let q_update = match cohort {
            CohortMode::Control => None,
            CohortMode::Adaptive => {
                let prev_q = if prev_key == next_key {
                    next_q.clone()
                } else {
                    self.cache
                        .get_or_load(self.learners.as_ref(), &student, &prev_key)
                        .await?
                };
                Some(self.q_update(&prev_q, &prev_key, decision.action, reward, &next_q))
            }
        };

        let mut committed = next.clone();
        decision.action.apply(&mut committed);
        if decision.used_exploration {
            committed.exploration_count = committed.exploration_count.saturating_add(1);
        } else if decision.strategy == Strategy::Exploitation {
            committed.exploitation_count = committed.exploitation_count.saturating_add(1);
        }
        committed.updated_at = Utc::now();

        let stability = self.gate.check_unlock(&next, &history);
        let pending_unit = self
            .gate
            .pending_unlock(self.progression.as_ref(), &student, &topic_info, &stability)
            .await?;
        let unlock = pending_unit.map(|unit| self.gate.notification(&topic_info, unit));

        let mut outcome = AnswerOutcome {
            action: decision.action,
            reason: decision.reason,
            strategy: decision.strategy,
            used_exploration: decision.used_exploration,
            epsilon: decision.epsilon,
            new_difficulty: committed.difficulty,
            new_mastery: committed.mastery,
            mastery_delta: update.delta,
            reward,
            reward_rules: breakdown.fired,
            events: update.events,
            stability,
            unlock,
        };

        let receipt = self
            .learners
            .commit_answer(AnswerCommit {
                state: committed.clone(),
                q_update: q_update.clone(),
                attempt,
                token,
                unlock: pending_unit.map(|unit| unit.id.clone()),
                outcome: serde_json::to_value(&outcome)?,
            })
            .await?;

        if let Some(update) = &q_update {
            self.cache.apply(&student, update).await;
        }
        drop(qtable_guard);

        match (&outcome.unlock, receipt.newly_unlocked) {
            (Some(unlock), true) => {
                info!(student = %student, unit = %unlock.unit_id, reason = %outcome.stability.reason, "Unit unlocked");
                metrics::record_unlock();
            }
            // Another topic unlocked the same unit first
            (Some(_), false) => outcome.unlock = None,
            (None, _) => {}
        }

        let transition = TransitionRecord::new(
            prev,
            decision.action,
            reward,
            committed,
            was_correct,
            elapsed,
            decision.used_exploration,
            decision.epsilon,
            cohort,
        );
        if let Err(e) = self.learners.append_transition(transition).await {
            warn!(student = %student, topic = %topic, "Failed to append transition: {}", e);
        }

        metrics::record_decision(outcome.action, outcome.strategy, outcome.reward);
        for event in &outcome.events {
            let MasteryEvent::Milestone { level, .. } = event;
            metrics::record_milestone(level.as_str());
        }

        debug!(
            student = %student,
            topic = %topic,
            action = %outcome.action,
            strategy = outcome.strategy.as_str(),
            reward = outcome.reward,
            mastery = outcome.new_mastery.value(),
            "Answer processed"
        );

        Ok(ProcessOutcome::Processed(outcome))
    }

    fn q_update(
        &self,
        prev_q: &QValues,
        prev_key: &StateKey,
        action: Action,
        reward: f64,
        next_q: &QValues,
    ) -> QValueUpdate {
        let current = finite_or_zero(prev_q.get(&action).copied().unwrap_or(0.0), "q_value");
        let value = self.selector.policy().updated_value(current, reward, next_q);
        QValueUpdate {
            state_key: prev_key.clone(),
            action,
            value: finite_or_zero(value, "q_value"),
        }
    }

    /// Current learner state for a topic
    pub async fn state(&self, student: &StudentId, topic: &TopicId) -> Result<LearnerTopicState> {
        self.learners.load_state(student, topic).await
    }

    /// Learned Q-values for the given state
    pub async fn policy_snapshot(
        &self,
        student: &StudentId,
        state: &LearnerTopicState,
    ) -> Result<PolicySnapshot> {
        let state_key = self.encoder.encode(state);
        let values = self
            .cache
            .get_or_load(self.learners.as_ref(), student, &state_key)
            .await?;
        let policy = self.selector.policy();
        Ok(PolicySnapshot {
            q_values: Action::ALL
                .iter()
                .map(|a| (*a, values.get(a).copied().unwrap_or(0.0)))
                .collect(),
            best: policy.best_action(&values, &Action::ALL),
            epsilon: policy.epsilon(state.total_attempts),
            state_key,
        })
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Drop a student's cached Q-values; the next access reloads them
    pub async fn invalidate_student(&self, student: &StudentId) {
        self.cache.invalidate_student(student).await;
    }
}
