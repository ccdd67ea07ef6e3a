//! Synthetic learner simulation over the in-memory store

use std::collections::BTreeMap;
use std::sync::Arc;

use ade_core::{CognitiveDomain, CohortMode, StudentId, SubmissionToken, TopicId};
use ade_engine::{metrics, AdaptiveEngine, AnswerRequest, EngineConfig, InMemoryStore};
use ade_rl::{Action, LearnerTopicState, TransitionSummary};
use anyhow::{bail, Context, Result};
use clap::Args;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinSet;
use tracing::info;

const TOPIC: &str = "fractions";

#[derive(Args, Clone)]
pub struct SimulateArgs {
    /// Number of synthetic students
    #[arg(short, long, default_value = "20")]
    pub students: usize,

    /// Answers submitted per student
    #[arg(short, long, default_value = "40")]
    pub answers: usize,

    /// Seed for learner behaviour and exploration
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Share of students placed in the control cohort
    #[arg(long, default_value = "0.0")]
    pub control_share: f64,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    pub metrics: bool,
}

/// Hidden ability that drives simulated answers
struct SyntheticLearner {
    id: StudentId,
    skill: f64,
    rng: StdRng,
}

impl SyntheticLearner {
    fn new(id: StudentId, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let skill = rng.gen_range(0.3..0.8);
        Self { id, skill, rng }
    }

    /// Logistic in the gap between ability and difficulty, helped by a preceding hint
    fn answer_probability(&self, state: &LearnerTopicState) -> f64 {
        let gap = self.skill * 5.0 - f64::from(state.difficulty.level());
        let mut p = 1.0 / (1.0 + (-1.5 * gap).exp());
        if state.last_action == Some(Action::HintThenRetry) {
            p += 0.15;
        }
        p.clamp(0.05, 0.97)
    }

    fn answer(&mut self, state: &LearnerTopicState) -> (bool, f64, CognitiveDomain) {
        let was_correct = self.rng.gen_bool(self.answer_probability(state));
        let elapsed = 15.0 * f64::from(state.difficulty.level()) + self.rng.gen_range(-10.0..40.0);
        let domain = CognitiveDomain::ALL[self.rng.gen_range(0..CognitiveDomain::ALL.len())];

        self.skill = (self.skill + if was_correct { 0.012 } else { 0.004 }).min(1.0);
        (was_correct, elapsed.max(1.0), domain)
    }
}

/// Final figures for one simulated student
#[derive(Debug, Clone)]
pub struct StudentReport {
    pub cohort: CohortMode,
    pub state: LearnerTopicState,
    pub unlocked: bool,
}

#[derive(Debug)]
pub struct SimulationReport {
    pub students: Vec<StudentReport>,
    pub transitions: TransitionSummary,
    pub actions: BTreeMap<Action, usize>,
    pub unlocks: usize,
}

pub async fn run(config: &EngineConfig, args: SimulateArgs) -> Result<()> {
    let report = simulate(config, &args).await?;
    print_report(&args, &report);

    if args.metrics {
        println!();
        print!("{}", metrics::gather());
    }
    Ok(())
}

/// Drive every synthetic student through the engine, one task per student
pub async fn simulate(config: &EngineConfig, args: &SimulateArgs) -> Result<SimulationReport> {
    if !(0.0..=1.0).contains(&args.control_share) {
        bail!("control share must be within [0, 1], got {}", args.control_share);
    }

    let store = Arc::new(InMemoryStore::new());
    store
        .add_topic(TOPIC, "Fractions", Some(("decimals", "Decimals")))
        .await;

    let mut assign = StdRng::seed_from_u64(args.seed);
    let mut learners = Vec::with_capacity(args.students);
    for index in 0..args.students {
        let id = format!("student-{index:03}");
        store.add_student(&id).await;
        let student = StudentId::new(id);
        let cohort = if assign.gen_bool(args.control_share) {
            CohortMode::Control
        } else {
            CohortMode::Adaptive
        };
        store.set_cohort(&student, cohort).await;
        learners.push((
            cohort,
            SyntheticLearner::new(student, args.seed.wrapping_add(index as u64 + 1)),
        ));
    }

    let engine = Arc::new(AdaptiveEngine::with_store(config, store.clone()).with_seed(args.seed));
    let topic = TopicId::new(TOPIC);
    info!(
        students = args.students,
        answers = args.answers,
        seed = args.seed,
        "Starting simulation"
    );

    let mut tasks = JoinSet::new();
    for (cohort, mut learner) in learners {
        let engine = engine.clone();
        let topic = topic.clone();
        let answers = args.answers;
        tasks.spawn(async move {
            let mut unlocked = false;
            for n in 0..answers {
                let state = engine.state(&learner.id, &topic).await?;
                let (was_correct, elapsed_seconds, domain) = learner.answer(&state);
                let outcome = engine
                    .process_answer(AnswerRequest {
                        student_id: learner.id.clone(),
                        topic_id: topic.clone(),
                        token: SubmissionToken::new(format!("{}-{n}", learner.id)),
                        was_correct,
                        elapsed_seconds,
                        domain,
                    })
                    .await?;
                if outcome.outcome().is_some_and(|o| o.unlock.is_some()) {
                    unlocked = true;
                }
            }
            let state = engine.state(&learner.id, &topic).await?;
            Ok::<_, ade_core::AdeError>(StudentReport {
                cohort,
                state,
                unlocked,
            })
        });
    }

    let mut students = Vec::with_capacity(args.students);
    while let Some(joined) = tasks.join_next().await {
        students.push(joined.context("simulation task panicked")??);
    }
    students.sort_by(|a, b| a.state.student_id.cmp(&b.state.student_id));

    let mut actions = BTreeMap::new();
    for record in store.transitions().await {
        *actions.entry(record.action).or_insert(0) += 1;
    }

    let cache = engine.cache_stats().await;
    info!(hits = cache.hits, misses = cache.misses, "Simulation finished");

    Ok(SimulationReport {
        students,
        transitions: store.transition_summary().await,
        actions,
        unlocks: store.unlock_count().await,
    })
}

fn print_report(args: &SimulateArgs, report: &SimulationReport) {
    println!(
        "Simulation: {} students x {} answers (seed {})",
        args.students, args.answers, args.seed
    );
    println!("{}", "-".repeat(72));
    println!(
        "{:<10} {:>8} {:>10} {:>10} {:>11} {:>10}",
        "COHORT", "STUDENTS", "MASTERY", "ACCURACY", "DIFFICULTY", "UNLOCKED"
    );
    for cohort in [CohortMode::Adaptive, CohortMode::Control] {
        let group: Vec<&StudentReport> =
            report.students.iter().filter(|s| s.cohort == cohort).collect();
        if group.is_empty() {
            continue;
        }
        let n = group.len() as f64;
        let mean = |f: &dyn Fn(&StudentReport) -> f64| group.iter().map(|s| f(s)).sum::<f64>() / n;
        println!(
            "{:<10} {:>8} {:>10.2} {:>9.0}% {:>11.2} {:>10}",
            cohort.as_str(),
            group.len(),
            mean(&|s: &StudentReport| s.state.mastery.value()),
            mean(&|s: &StudentReport| s.state.accuracy()) * 100.0,
            mean(&|s: &StudentReport| f64::from(s.state.difficulty.level())),
            group.iter().filter(|s| s.unlocked).count()
        );
    }
    println!("{}", "-".repeat(72));

    let summary = &report.transitions;
    println!(
        "Transitions: {}   mean reward {:+.2}   accuracy {:.0}%   explored {:.0}%",
        summary.count,
        summary.mean_reward,
        summary.accuracy * 100.0,
        summary.exploration_ratio * 100.0
    );
    println!("Units unlocked: {}", report.unlocks);
    println!();
    println!("{:<26} {:>8}", "ACTION", "COUNT");
    for (action, count) in &report.actions {
        println!("{:<26} {:>8}", action.as_str(), count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ade_core::Difficulty;

    fn args(students: usize, answers: usize, control_share: f64) -> SimulateArgs {
        SimulateArgs {
            students,
            answers,
            seed: 11,
            control_share,
            metrics: false,
        }
    }

    #[tokio::test]
    async fn test_every_answer_is_recorded() {
        let report = simulate(&EngineConfig::default(), &args(4, 12, 0.0))
            .await
            .unwrap();

        assert_eq!(report.students.len(), 4);
        assert_eq!(report.transitions.count, 48);
        assert_eq!(report.actions.values().sum::<usize>(), 48);
        for student in &report.students {
            assert_eq!(student.state.total_attempts, 12);
            assert!((0.0..=100.0).contains(&student.state.mastery.value()));
        }
    }

    #[tokio::test]
    async fn test_control_cohort_keeps_difficulty() {
        let report = simulate(&EngineConfig::default(), &args(3, 10, 1.0))
            .await
            .unwrap();

        assert!(report
            .students
            .iter()
            .all(|s| s.cohort == CohortMode::Control && s.state.difficulty == Difficulty::default()));
        assert_eq!(
            report.actions.get(&Action::MaintainDifficulty).copied(),
            Some(30)
        );
    }

    #[tokio::test]
    async fn test_rejects_invalid_control_share() {
        assert!(simulate(&EngineConfig::default(), &args(1, 1, 1.5))
            .await
            .is_err());
    }

    #[test]
    fn test_hint_raises_answer_probability() {
        let learner = SyntheticLearner::new(StudentId::new("s"), 3);
        let mut state = LearnerTopicState::new(StudentId::new("s"), TopicId::new(TOPIC));
        let base = learner.answer_probability(&state);
        state.last_action = Some(Action::HintThenRetry);
        assert!(learner.answer_probability(&state) > base);
    }
}
