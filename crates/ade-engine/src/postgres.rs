//! PostgreSQL store
//!
//! Implements every repository trait over a `sqlx` pool. An answer's state,
//! Q-value, attempt and submission token are written in one transaction.

use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};

use ade_core::{
    AdeError, AttemptRecord, CohortMode, Difficulty, Mastery, Representation, Result, StudentId,
    SubmissionToken, TopicId, UnitId,
};
use ade_rl::{Action, LearnerTopicState, QValues, StateKey, TransitionRecord};

use crate::config::PostgresConfig;
use crate::repository::{
    AnswerCommit, Catalog, CommitReceipt, LearnerRepository, ProgressionRepository,
    SubmissionRecord, TopicInfo, UnitRef,
};

/// Attach the failing operation to a database error
trait PersistContext<T> {
    fn context(self, operation: &str) -> Result<T>;
}

impl<T, E: Display> PersistContext<T> for std::result::Result<T, E> {
    fn context(self, operation: &str) -> Result<T> {
        self.map_err(|e| AdeError::persistence(operation, e))
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

#[derive(Debug, Clone, FromRow)]
struct StateRow {
    student_id: String,
    topic_id: String,
    difficulty: i16,
    mastery: f64,
    correct_streak: i32,
    wrong_streak: i32,
    total_attempts: i32,
    correct_answers: i32,
    wrong_answers: i32,
    current_representation: String,
    last_action: Option<String>,
    exploration_count: i32,
    exploitation_count: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StateRow> for LearnerTopicState {
    type Error = AdeError;

    fn try_from(row: StateRow) -> Result<Self> {
        let last_action = row
            .last_action
            .as_deref()
            .map(str::parse::<Action>)
            .transpose()
            .context("decode last_action")?;
        Ok(LearnerTopicState {
            student_id: StudentId::from(row.student_id),
            topic_id: TopicId::from(row.topic_id),
            difficulty: Difficulty::new(u8::try_from(row.difficulty).unwrap_or(Difficulty::MIN.level())),
            mastery: Mastery::new(row.mastery),
            correct_streak: to_u32(row.correct_streak),
            wrong_streak: to_u32(row.wrong_streak),
            total_attempts: to_u32(row.total_attempts),
            correct_answers: to_u32(row.correct_answers),
            wrong_answers: to_u32(row.wrong_answers),
            current_representation: row
                .current_representation
                .parse()
                .context("decode representation")?,
            last_action,
            exploration_count: to_u32(row.exploration_count),
            exploitation_count: to_u32(row.exploitation_count),
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct AttemptRow {
    was_correct: bool,
    difficulty: i16,
    representation: String,
    hint_used: bool,
    elapsed_seconds: f64,
    submitted_at: DateTime<Utc>,
}

impl TryFrom<AttemptRow> for AttemptRecord {
    type Error = AdeError;

    fn try_from(row: AttemptRow) -> Result<Self> {
        let representation: Representation = row.representation.parse().context("decode representation")?;
        Ok(AttemptRecord {
            was_correct: row.was_correct,
            difficulty: Difficulty::new(u8::try_from(row.difficulty).unwrap_or(Difficulty::MIN.level())),
            representation,
            hint_used: row.hint_used,
            elapsed_seconds: row.elapsed_seconds,
            submitted_at: row.submitted_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct TopicRow {
    id: String,
    name: String,
    next_unit_id: Option<String>,
    next_unit_name: Option<String>,
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new connection pool
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        info!("Connecting to PostgreSQL (max connections: {})", config.max_connections);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .context("connect to PostgreSQL")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("test query")?;

        info!("PostgreSQL connection established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Register or update a student and their cohort
    pub async fn upsert_student(&self, student: &StudentId, cohort: CohortMode) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO students (id, cohort) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET cohort = EXCLUDED.cohort
            ",
        )
        .bind(student.as_str())
        .bind(cohort.as_str())
        .execute(&self.pool)
        .await
        .context("upsert student")?;
        Ok(())
    }

    /// Register or update a topic
    pub async fn upsert_topic(&self, topic: &TopicInfo) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO topics (id, name, next_unit_id, next_unit_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                next_unit_id = EXCLUDED.next_unit_id,
                next_unit_name = EXCLUDED.next_unit_name
            ",
        )
        .bind(topic.id.as_str())
        .bind(&topic.name)
        .bind(topic.next_unit.as_ref().map(|u| u.id.as_str()))
        .bind(topic.next_unit.as_ref().map(|u| u.display_name.as_str()))
        .execute(&self.pool)
        .await
        .context("upsert topic")?;
        Ok(())
    }
}

/// Create-or-refresh an unlock; `xmax = 0` only for a freshly inserted row
const UNLOCK_SQL: &str = r"
    INSERT INTO unit_unlocks (student_id, unit_id)
    VALUES ($1, $2)
    ON CONFLICT (student_id, unit_id) DO UPDATE SET updated_at = NOW()
    RETURNING (xmax = 0)
";

#[async_trait]
impl LearnerRepository for PgStore {
    async fn load_state(&self, student: &StudentId, topic: &TopicId) -> Result<LearnerTopicState> {
        let row = sqlx::query_as::<_, StateRow>(
            r"
            SELECT student_id, topic_id, difficulty, mastery, correct_streak, wrong_streak,
                   total_attempts, correct_answers, wrong_answers, current_representation,
                   last_action, exploration_count, exploitation_count, updated_at
            FROM learner_topic_states
            WHERE student_id = $1 AND topic_id = $2
            ",
        )
        .bind(student.as_str())
        .bind(topic.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("load learner state")?;

        match row {
            Some(row) => row.try_into(),
            None => Ok(LearnerTopicState::new(student.clone(), topic.clone())),
        }
    }

    async fn recent_attempts(
        &self,
        student: &StudentId,
        topic: &TopicId,
        limit: usize,
    ) -> Result<Vec<AttemptRecord>> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            r"
            SELECT was_correct, difficulty, representation, hint_used, elapsed_seconds, submitted_at
            FROM attempts
            WHERE student_id = $1 AND topic_id = $2
            ORDER BY id DESC
            LIMIT $3
            ",
        )
        .bind(student.as_str())
        .bind(topic.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("load recent attempts")?;

        // Newest first from the query; callers expect most recent last
        rows.into_iter().rev().map(AttemptRecord::try_from).collect()
    }

    async fn load_q_values(&self, student: &StudentId, key: &StateKey) -> Result<QValues> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            r"
            SELECT action, value FROM q_values
            WHERE student_id = $1 AND state_key = $2
            ",
        )
        .bind(student.as_str())
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await
        .context("load q-values")?;

        rows.into_iter()
            .map(|(action, value)| -> Result<(Action, f64)> { Ok((action.parse()?, value)) })
            .collect()
    }

    async fn find_submission(
        &self,
        student: &StudentId,
        topic: &TopicId,
        token: &SubmissionToken,
    ) -> Result<Option<SubmissionRecord>> {
        let row: Option<(Option<serde_json::Value>, DateTime<Utc>)> = sqlx::query_as(
            r"
            SELECT outcome, recorded_at FROM submissions
            WHERE student_id = $1 AND topic_id = $2 AND token = $3
            ",
        )
        .bind(student.as_str())
        .bind(topic.as_str())
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("find submission")?;

        Ok(row.map(|(outcome, recorded_at)| SubmissionRecord {
            token: token.clone(),
            outcome,
            recorded_at,
        }))
    }

    async fn commit_answer(&self, commit: AnswerCommit) -> Result<CommitReceipt> {
        let state = &commit.state;
        let mut tx = self.pool.begin().await.context("begin answer commit")?;

        sqlx::query(
            r"
            INSERT INTO learner_topic_states (
                student_id, topic_id, difficulty, mastery, correct_streak, wrong_streak,
                total_attempts, correct_answers, wrong_answers, current_representation,
                last_action, exploration_count, exploitation_count, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (student_id, topic_id) DO UPDATE SET
                difficulty = EXCLUDED.difficulty,
                mastery = EXCLUDED.mastery,
                correct_streak = EXCLUDED.correct_streak,
                wrong_streak = EXCLUDED.wrong_streak,
                total_attempts = EXCLUDED.total_attempts,
                correct_answers = EXCLUDED.correct_answers,
                wrong_answers = EXCLUDED.wrong_answers,
                current_representation = EXCLUDED.current_representation,
                last_action = EXCLUDED.last_action,
                exploration_count = EXCLUDED.exploration_count,
                exploitation_count = EXCLUDED.exploitation_count,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(state.student_id.as_str())
        .bind(state.topic_id.as_str())
        .bind(i16::from(state.difficulty.level()))
        .bind(state.mastery.value())
        .bind(to_i32(state.correct_streak))
        .bind(to_i32(state.wrong_streak))
        .bind(to_i32(state.total_attempts))
        .bind(to_i32(state.correct_answers))
        .bind(to_i32(state.wrong_answers))
        .bind(state.current_representation.as_str())
        .bind(state.last_action.map(Action::as_str))
        .bind(to_i32(state.exploration_count))
        .bind(to_i32(state.exploitation_count))
        .bind(state.updated_at)
        .execute(&mut *tx)
        .await
        .context("save learner state")?;

        if let Some(update) = &commit.q_update {
            sqlx::query(
                r"
                INSERT INTO q_values (student_id, state_key, action, value, updated_at)
                VALUES ($1, $2, $3, $4, NOW())
                ON CONFLICT (student_id, state_key, action)
                DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
                ",
            )
            .bind(state.student_id.as_str())
            .bind(update.state_key.as_str())
            .bind(update.action.as_str())
            .bind(update.value)
            .execute(&mut *tx)
            .await
            .context("save q-value")?;
        }

        let attempt = &commit.attempt;
        sqlx::query(
            r"
            INSERT INTO attempts (
                student_id, topic_id, was_correct, difficulty, representation,
                hint_used, elapsed_seconds, submitted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(state.student_id.as_str())
        .bind(state.topic_id.as_str())
        .bind(attempt.was_correct)
        .bind(i16::from(attempt.difficulty.level()))
        .bind(attempt.representation.as_str())
        .bind(attempt.hint_used)
        .bind(attempt.elapsed_seconds)
        .bind(attempt.submitted_at)
        .execute(&mut *tx)
        .await
        .context("record attempt")?;

        // A concurrent duplicate violates the primary key and rolls everything back
        sqlx::query(
            r"
            INSERT INTO submissions (student_id, topic_id, token, outcome)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(state.student_id.as_str())
        .bind(state.topic_id.as_str())
        .bind(commit.token.as_str())
        .bind(&commit.outcome)
        .execute(&mut *tx)
        .await
        .context("record submission")?;

        let newly_unlocked = match &commit.unlock {
            Some(unit) => sqlx::query_scalar::<_, bool>(UNLOCK_SQL)
                .bind(state.student_id.as_str())
                .bind(unit.as_str())
                .fetch_one(&mut *tx)
                .await
                .context("unlock unit")?,
            None => false,
        };

        tx.commit().await.context("commit answer")?;

        debug!(
            student = %state.student_id,
            topic = %state.topic_id,
            token = %commit.token,
            newly_unlocked,
            "Answer committed"
        );
        Ok(CommitReceipt { newly_unlocked })
    }

    async fn append_transition(&self, record: TransitionRecord) -> Result<()> {
        let prev_state = serde_json::to_value(&record.prev_state)?;
        let next_state = serde_json::to_value(&record.next_state)?;

        sqlx::query(
            r"
            INSERT INTO transitions (
                id, student_id, topic_id, prev_state, action, reward, next_state,
                was_correct, elapsed_seconds, explored, epsilon, cohort, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(record.id)
        .bind(record.prev_state.student_id.as_str())
        .bind(record.prev_state.topic_id.as_str())
        .bind(&prev_state)
        .bind(record.action.as_str())
        .bind(record.reward)
        .bind(&next_state)
        .bind(record.was_correct)
        .bind(record.elapsed_seconds)
        .bind(record.explored)
        .bind(record.epsilon)
        .bind(record.cohort.as_str())
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .context("append transition")?;
        Ok(())
    }

    async fn cohort_mode(&self, student: &StudentId) -> Result<CohortMode> {
        let cohort: Option<String> = sqlx::query_scalar("SELECT cohort FROM students WHERE id = $1")
            .bind(student.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("load cohort")?;

        cohort.map_or(Ok(CohortMode::default()), |c| c.parse())
    }
}

#[async_trait]
impl ProgressionRepository for PgStore {
    async fn is_unlocked(&self, student: &StudentId, unit: &UnitId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM unit_unlocks WHERE student_id = $1 AND unit_id = $2)",
        )
        .bind(student.as_str())
        .bind(unit.as_str())
        .fetch_one(&self.pool)
        .await
        .context("check unlock")?;
        Ok(exists)
    }

    async fn unlock(&self, student: &StudentId, unit: &UnitId) -> Result<bool> {
        let inserted: bool = sqlx::query_scalar(UNLOCK_SQL)
            .bind(student.as_str())
            .bind(unit.as_str())
            .fetch_one(&self.pool)
            .await
            .context("unlock unit")?;
        Ok(inserted)
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn topic(&self, topic: &TopicId) -> Result<Option<TopicInfo>> {
        let row = sqlx::query_as::<_, TopicRow>(
            "SELECT id, name, next_unit_id, next_unit_name FROM topics WHERE id = $1",
        )
        .bind(topic.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("load topic")?;

        Ok(row.map(|r| TopicInfo {
            id: TopicId::from(r.id),
            next_unit: r.next_unit_id.map(|id| UnitRef {
                display_name: r.next_unit_name.unwrap_or_else(|| id.clone()),
                id: UnitId::from(id),
            }),
            name: r.name,
        }))
    }

    async fn student_exists(&self, student: &StudentId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM students WHERE id = $1)")
            .bind(student.as_str())
            .fetch_one(&self.pool)
            .await
            .context("check student")?;
        Ok(exists)
    }
}
