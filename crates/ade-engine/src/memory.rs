//! In-process store implementing every repository trait
//!
//! Used by the simulator and the test suites. Supports failure injection
//! so callers can verify that persistence errors propagate without leaving
//! partial writes behind.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use ade_core::{AdeError, AttemptRecord, CohortMode, Result, StudentId, SubmissionToken, TopicId, UnitId};
use ade_rl::{Action, LearnerTopicState, QValues, StateKey, TransitionLog, TransitionRecord, TransitionSummary};

use crate::repository::{
    AnswerCommit, Catalog, CommitReceipt, LearnerRepository, ProgressionRepository,
    SubmissionRecord, TopicInfo, UnitRef,
};

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    LoadState,
    RecentAttempts,
    LoadQValues,
    FindSubmission,
    Commit,
    AppendTransition,
    Unlock,
}

type TopicKey = (StudentId, TopicId);

#[derive(Default)]
pub struct InMemoryStore {
    states: RwLock<HashMap<TopicKey, LearnerTopicState>>,
    attempts: RwLock<HashMap<TopicKey, Vec<AttemptRecord>>>,
    q_values: RwLock<HashMap<(StudentId, StateKey), QValues>>,
    submissions: RwLock<HashMap<(StudentId, TopicId, SubmissionToken), SubmissionRecord>>,
    transitions: RwLock<TransitionLog>,
    cohorts: RwLock<HashMap<StudentId, CohortMode>>,
    unlocks: RwLock<HashSet<(StudentId, UnitId)>>,
    topics: RwLock<HashMap<TopicId, TopicInfo>>,
    /// `None` accepts any student
    students: RwLock<Option<HashSet<StudentId>>>,
    failures: RwLock<HashSet<FailPoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a topic, optionally leading to a downstream unit
    pub async fn add_topic(&self, id: &str, name: &str, next_unit: Option<(&str, &str)>) {
        let info = TopicInfo {
            id: TopicId::from(id),
            name: name.to_string(),
            next_unit: next_unit.map(|(unit, display)| UnitRef {
                id: UnitId::from(unit),
                display_name: display.to_string(),
            }),
        };
        self.topics.write().await.insert(info.id.clone(), info);
    }

    /// Register a student; once any student is registered, unknown ones are rejected
    pub async fn add_student(&self, id: &str) {
        self.students
            .write()
            .await
            .get_or_insert_with(HashSet::new)
            .insert(StudentId::from(id));
    }

    pub async fn set_cohort(&self, student: &StudentId, cohort: CohortMode) {
        self.cohorts.write().await.insert(student.clone(), cohort);
    }

    /// Replace a learner state, bypassing the engine
    pub async fn put_state(&self, state: LearnerTopicState) {
        let key = (state.student_id.clone(), state.topic_id.clone());
        self.states.write().await.insert(key, state);
    }

    /// Append attempts to a learner's history, bypassing the engine
    pub async fn push_attempts(&self, student: &StudentId, topic: &TopicId, attempts: Vec<AttemptRecord>) {
        self.attempts
            .write()
            .await
            .entry((student.clone(), topic.clone()))
            .or_default()
            .extend(attempts);
    }

    pub async fn fail(&self, point: FailPoint) {
        self.failures.write().await.insert(point);
    }

    pub async fn recover(&self, point: FailPoint) {
        self.failures.write().await.remove(&point);
    }

    async fn check(&self, point: FailPoint) -> Result<()> {
        if self.failures.read().await.contains(&point) {
            Err(AdeError::persistence(
                &format!("{point:?}"),
                "injected failure",
            ))
        } else {
            Ok(())
        }
    }

    // ---- inspection ----

    pub async fn stored_state(&self, student: &StudentId, topic: &TopicId) -> Option<LearnerTopicState> {
        self.states
            .read()
            .await
            .get(&(student.clone(), topic.clone()))
            .cloned()
    }

    pub async fn stored_q_value(&self, student: &StudentId, key: &StateKey, action: Action) -> Option<f64> {
        self.q_values
            .read()
            .await
            .get(&(student.clone(), key.clone()))
            .and_then(|q| q.get(&action).copied())
    }

    /// Number of Q-values stored for a student across all states
    pub async fn q_value_count(&self, student: &StudentId) -> usize {
        self.q_values
            .read()
            .await
            .iter()
            .filter(|((s, _), _)| s == student)
            .map(|(_, q)| q.len())
            .sum()
    }

    pub async fn attempt_count(&self, student: &StudentId, topic: &TopicId) -> usize {
        self.attempts
            .read()
            .await
            .get(&(student.clone(), topic.clone()))
            .map_or(0, Vec::len)
    }

    pub async fn submission_count(&self) -> usize {
        self.submissions.read().await.len()
    }

    pub async fn unlock_count(&self) -> usize {
        self.unlocks.read().await.len()
    }

    pub async fn transitions(&self) -> Vec<TransitionRecord> {
        self.transitions.read().await.all()
    }

    pub async fn transition_summary(&self) -> TransitionSummary {
        self.transitions.read().await.summary()
    }
}

#[async_trait]
impl LearnerRepository for InMemoryStore {
    async fn load_state(&self, student: &StudentId, topic: &TopicId) -> Result<LearnerTopicState> {
        self.check(FailPoint::LoadState).await?;
        Ok(self
            .states
            .read()
            .await
            .get(&(student.clone(), topic.clone()))
            .cloned()
            .unwrap_or_else(|| LearnerTopicState::new(student.clone(), topic.clone())))
    }

    async fn recent_attempts(
        &self,
        student: &StudentId,
        topic: &TopicId,
        limit: usize,
    ) -> Result<Vec<AttemptRecord>> {
        self.check(FailPoint::RecentAttempts).await?;
        let attempts = self.attempts.read().await;
        let history = attempts
            .get(&(student.clone(), topic.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let start = history.len().saturating_sub(limit);
        Ok(history[start..].to_vec())
    }

    async fn load_q_values(&self, student: &StudentId, key: &StateKey) -> Result<QValues> {
        self.check(FailPoint::LoadQValues).await?;
        Ok(self
            .q_values
            .read()
            .await
            .get(&(student.clone(), key.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn find_submission(
        &self,
        student: &StudentId,
        topic: &TopicId,
        token: &SubmissionToken,
    ) -> Result<Option<SubmissionRecord>> {
        self.check(FailPoint::FindSubmission).await?;
        Ok(self
            .submissions
            .read()
            .await
            .get(&(student.clone(), topic.clone(), token.clone()))
            .cloned())
    }

    async fn commit_answer(&self, commit: AnswerCommit) -> Result<CommitReceipt> {
        // Take every lock before validating so the commit is all-or-nothing
        let mut states = self.states.write().await;
        let mut attempts = self.attempts.write().await;
        let mut q_values = self.q_values.write().await;
        let mut submissions = self.submissions.write().await;
        let mut unlocks = self.unlocks.write().await;
        self.check(FailPoint::Commit).await?;
        if commit.unlock.is_some() {
            self.check(FailPoint::Unlock).await?;
        }

        let student = commit.state.student_id.clone();
        let topic = commit.state.topic_id.clone();

        if let Some(update) = &commit.q_update {
            q_values
                .entry((student.clone(), update.state_key.clone()))
                .or_default()
                .insert(update.action, update.value);
        }
        attempts
            .entry((student.clone(), topic.clone()))
            .or_default()
            .push(commit.attempt);
        submissions.insert(
            (student.clone(), topic.clone(), commit.token.clone()),
            SubmissionRecord {
                token: commit.token,
                outcome: Some(commit.outcome),
                recorded_at: Utc::now(),
            },
        );
        states.insert((student.clone(), topic.clone()), commit.state);
        let newly_unlocked = commit
            .unlock
            .is_some_and(|unit| unlocks.insert((student.clone(), unit)));

        debug!(student = %student, topic = %topic, newly_unlocked, "Answer committed");
        Ok(CommitReceipt { newly_unlocked })
    }

    async fn append_transition(&self, record: TransitionRecord) -> Result<()> {
        self.check(FailPoint::AppendTransition).await?;
        self.transitions.write().await.push(record);
        Ok(())
    }

    async fn cohort_mode(&self, student: &StudentId) -> Result<CohortMode> {
        Ok(self
            .cohorts
            .read()
            .await
            .get(student)
            .copied()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProgressionRepository for InMemoryStore {
    async fn is_unlocked(&self, student: &StudentId, unit: &UnitId) -> Result<bool> {
        Ok(self
            .unlocks
            .read()
            .await
            .contains(&(student.clone(), unit.clone())))
    }

    async fn unlock(&self, student: &StudentId, unit: &UnitId) -> Result<bool> {
        self.check(FailPoint::Unlock).await?;
        Ok(self
            .unlocks
            .write()
            .await
            .insert((student.clone(), unit.clone())))
    }
}

#[async_trait]
impl Catalog for InMemoryStore {
    async fn topic(&self, topic: &TopicId) -> Result<Option<TopicInfo>> {
        Ok(self.topics.read().await.get(topic).cloned())
    }

    async fn student_exists(&self, student: &StudentId) -> Result<bool> {
        Ok(self
            .students
            .read()
            .await
            .as_ref()
            .map_or(true, |known| known.contains(student)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ade_core::{Difficulty, Representation};
    use ade_rl::StateEncoder;

    fn commit_for(state: LearnerTopicState, token: &str) -> AnswerCommit {
        let key = StateEncoder::new().encode(&state);
        AnswerCommit {
            state,
            q_update: Some(crate::repository::QValueUpdate {
                state_key: key,
                action: Action::HintThenRetry,
                value: 0.6,
            }),
            attempt: AttemptRecord::new(true, Difficulty::default(), Representation::Text),
            token: SubmissionToken::from(token),
            unlock: None,
            outcome: serde_json::json!({"ok": true}),
        }
    }

    #[tokio::test]
    async fn test_load_state_defaults() {
        let store = InMemoryStore::new();
        let state = store
            .load_state(&StudentId::from("s1"), &TopicId::from("t1"))
            .await
            .unwrap();
        assert_eq!(state.difficulty.level(), 3);
        assert_eq!(state.mastery.value(), 0.0);
    }

    #[tokio::test]
    async fn test_commit_writes_everything() {
        let store = InMemoryStore::new();
        let student = StudentId::from("s1");
        let topic = TopicId::from("t1");
        let mut state = LearnerTopicState::new(student.clone(), topic.clone());
        state.total_attempts = 1;

        store.commit_answer(commit_for(state, "tok-1")).await.unwrap();

        assert_eq!(store.stored_state(&student, &topic).await.unwrap().total_attempts, 1);
        assert_eq!(store.attempt_count(&student, &topic).await, 1);
        assert_eq!(store.q_value_count(&student).await, 1);
        let found = store
            .find_submission(&student, &topic, &SubmissionToken::from("tok-1"))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let store = InMemoryStore::new();
        let student = StudentId::from("s1");
        let topic = TopicId::from("t1");
        store.fail(FailPoint::Commit).await;

        let state = LearnerTopicState::new(student.clone(), topic.clone());
        let err = store.commit_answer(commit_for(state, "tok-1")).await.unwrap_err();
        assert!(matches!(err, AdeError::Persistence(_)));

        assert!(store.stored_state(&student, &topic).await.is_none());
        assert_eq!(store.attempt_count(&student, &topic).await, 0);
        assert_eq!(store.q_value_count(&student).await, 0);
        assert_eq!(store.submission_count().await, 0);
    }

    #[tokio::test]
    async fn test_commit_unlocks_with_the_answer() {
        let store = InMemoryStore::new();
        let student = StudentId::from("s1");
        let topic = TopicId::from("t1");
        let unit = UnitId::from("u2");

        let mut commit = commit_for(LearnerTopicState::new(student.clone(), topic.clone()), "tok-1");
        commit.unlock = Some(unit.clone());
        store.fail(FailPoint::Unlock).await;
        assert!(store.commit_answer(commit.clone()).await.is_err());
        assert_eq!(store.unlock_count().await, 0);
        assert_eq!(store.submission_count().await, 0);

        store.recover(FailPoint::Unlock).await;
        let receipt = store.commit_answer(commit).await.unwrap();
        assert!(receipt.newly_unlocked);
        assert!(store.is_unlocked(&student, &unit).await.unwrap());

        let mut again = commit_for(LearnerTopicState::new(student.clone(), topic), "tok-2");
        again.unlock = Some(unit);
        assert!(!store.commit_answer(again).await.unwrap().newly_unlocked);
        assert_eq!(store.unlock_count().await, 1);
    }

    #[tokio::test]
    async fn test_recent_attempts_limit_and_order() {
        let store = InMemoryStore::new();
        let student = StudentId::from("s1");
        let topic = TopicId::from("t1");
        let attempts = (1..=12)
            .map(|i| AttemptRecord::new(i % 2 == 0, Difficulty::new(3), Representation::Text).with_elapsed(f64::from(i)))
            .collect();
        store.push_attempts(&student, &topic, attempts).await;

        let recent = store.recent_attempts(&student, &topic, 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent.first().unwrap().elapsed_seconds, 3.0);
        assert_eq!(recent.last().unwrap().elapsed_seconds, 12.0);
    }

    #[tokio::test]
    async fn test_unlock_is_idempotent() {
        let store = InMemoryStore::new();
        let student = StudentId::from("s1");
        let unit = UnitId::from("u2");
        assert!(store.unlock(&student, &unit).await.unwrap());
        assert!(!store.unlock(&student, &unit).await.unwrap());
        assert!(store.is_unlocked(&student, &unit).await.unwrap());
        assert_eq!(store.unlock_count().await, 1);
    }

    #[tokio::test]
    async fn test_student_registry() {
        let store = InMemoryStore::new();
        assert!(store.student_exists(&StudentId::from("anyone")).await.unwrap());

        store.add_student("s1").await;
        assert!(store.student_exists(&StudentId::from("s1")).await.unwrap());
        assert!(!store.student_exists(&StudentId::from("anyone")).await.unwrap());
    }
}
