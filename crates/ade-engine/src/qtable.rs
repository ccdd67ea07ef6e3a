//! Process-local read-through cache of per-student Q-values
//!
//! The repository is the source of truth. Entries are hydrated on first
//! access to a state, refreshed only after a successful commit, and whole
//! students are evicted least-recently-used first when the cache is full.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use ade_core::{Result, StudentId};
use ade_rl::{QValues, StateKey};

use crate::metrics;
use crate::repository::{LearnerRepository, QValueUpdate};

#[derive(Debug, Default)]
struct StudentTable {
    states: HashMap<StateKey, QValues>,
    last_used: u64,
}

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub students: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct QTableCache {
    tables: RwLock<HashMap<StudentId, StudentTable>>,
    max_students: usize,
    /// Bumped on every write or invalidation; a load that raced one is not cached
    generation: AtomicU64,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QTableCache {
    pub fn new(max_students: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            max_students: max_students.max(1),
            generation: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Q-values for a state, loading them from the repository on a miss
    pub async fn get_or_load(
        &self,
        repo: &dyn LearnerRepository,
        student: &StudentId,
        key: &StateKey,
    ) -> Result<QValues> {
        {
            let mut tables = self.tables.write().await;
            if let Some(table) = tables.get_mut(student) {
                if let Some(values) = table.states.get(key) {
                    table.last_used = self.tick();
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_lookup(true);
                    return Ok(values.clone());
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(false);

        let generation = self.generation.load(Ordering::Acquire);
        let values = repo.load_q_values(student, key).await?;

        let mut tables = self.tables.write().await;
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(student = %student, key = %key, "Q-table changed during load, not caching");
            return Ok(values);
        }
        if !tables.contains_key(student) && tables.len() >= self.max_students {
            Self::evict_one(&mut tables);
        }
        let table = tables.entry(student.clone()).or_default();
        table.last_used = self.tick();
        table.states.insert(key.clone(), values.clone());
        Ok(values)
    }

    fn evict_one(tables: &mut HashMap<StudentId, StudentTable>) {
        let oldest = tables
            .iter()
            .min_by_key(|(_, t)| t.last_used)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            debug!(student = %id, "Evicting Q-table from cache");
            tables.remove(&id);
        }
    }

    /// Reflect a committed write; states not cached are left to the next load
    pub async fn apply(&self, student: &StudentId, update: &QValueUpdate) {
        let mut tables = self.tables.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(values) = tables
            .get_mut(student)
            .and_then(|t| t.states.get_mut(&update.state_key))
        {
            values.insert(update.action, update.value);
        }
    }

    pub async fn invalidate_student(&self, student: &StudentId) {
        let mut tables = self.tables.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        tables.remove(student);
    }

    pub async fn clear(&self) {
        let mut tables = self.tables.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        tables.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            students: self.tables.read().await.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FailPoint, InMemoryStore};
    use crate::repository::AnswerCommit;
    use ade_core::{AttemptRecord, Difficulty, Representation, SubmissionToken, TopicId};
    use ade_rl::{Action, LearnerTopicState, StateEncoder};

    async fn seed(store: &InMemoryStore, student: &str, value: f64) -> StateKey {
        let state = LearnerTopicState::new(StudentId::from(student), TopicId::from("t1"));
        let key = StateEncoder::new().encode(&state);
        store
            .commit_answer(AnswerCommit {
                state,
                q_update: Some(QValueUpdate {
                    state_key: key.clone(),
                    action: Action::HintThenRetry,
                    value,
                }),
                attempt: AttemptRecord::new(true, Difficulty::default(), Representation::Text),
                token: SubmissionToken::from(format!("{student}-seed")),
                unlock: None,
                outcome: serde_json::Value::Null,
            })
            .await
            .unwrap();
        key
    }

    #[tokio::test]
    async fn test_read_through_and_hit() {
        let store = InMemoryStore::new();
        let key = seed(&store, "s1", 1.5).await;
        let cache = QTableCache::new(10);
        let student = StudentId::from("s1");

        let first = cache.get_or_load(&store, &student, &key).await.unwrap();
        assert_eq!(first.get(&Action::HintThenRetry), Some(&1.5));

        // Served from cache even when the store is down
        store.fail(FailPoint::LoadQValues).await;
        let second = cache.get_or_load(&store, &student, &key).await.unwrap();
        assert_eq!(first, second);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.students, 1);
    }

    #[tokio::test]
    async fn test_load_failure_propagates() {
        let store = InMemoryStore::new();
        store.fail(FailPoint::LoadQValues).await;
        let cache = QTableCache::new(10);
        let key = StateEncoder::new().encode(&LearnerTopicState::new(
            StudentId::from("s1"),
            TopicId::from("t1"),
        ));
        assert!(cache
            .get_or_load(&store, &StudentId::from("s1"), &key)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_apply_updates_cached_state() {
        let store = InMemoryStore::new();
        let key = seed(&store, "s1", 1.0).await;
        let cache = QTableCache::new(10);
        let student = StudentId::from("s1");
        cache.get_or_load(&store, &student, &key).await.unwrap();

        cache
            .apply(
                &student,
                &QValueUpdate {
                    state_key: key.clone(),
                    action: Action::RepeatCurrent,
                    value: -0.4,
                },
            )
            .await;
        let values = cache.get_or_load(&store, &student, &key).await.unwrap();
        assert_eq!(values.get(&Action::RepeatCurrent), Some(&-0.4));
        assert_eq!(values.get(&Action::HintThenRetry), Some(&1.0));
    }

    #[tokio::test]
    async fn test_eviction_keeps_correctness() {
        let store = InMemoryStore::new();
        let key_a = seed(&store, "a", 2.0).await;
        let key_b = seed(&store, "b", 3.0).await;
        let cache = QTableCache::new(1);

        cache.get_or_load(&store, &StudentId::from("a"), &key_a).await.unwrap();
        cache.get_or_load(&store, &StudentId::from("b"), &key_b).await.unwrap();
        assert_eq!(cache.stats().await.students, 1);

        // Evicted student reloads from the store
        let values = cache
            .get_or_load(&store, &StudentId::from("a"), &key_a)
            .await
            .unwrap();
        assert_eq!(values.get(&Action::HintThenRetry), Some(&2.0));
        assert_eq!(cache.stats().await.misses, 3);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let store = InMemoryStore::new();
        let key = seed(&store, "s1", 1.0).await;
        let cache = QTableCache::new(10);
        let student = StudentId::from("s1");

        cache.get_or_load(&store, &student, &key).await.unwrap();
        cache.invalidate_student(&student).await;
        assert_eq!(cache.stats().await.students, 0);

        cache.get_or_load(&store, &student, &key).await.unwrap();
        cache.clear().await;
        assert_eq!(cache.stats().await.students, 0);
    }
}
