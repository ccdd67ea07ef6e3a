//! Policy and reward benchmarks
//!
//! The hot path runs once per submitted answer:
//! 1. StateEncoder::encode() - twice per answer (previous and next state)
//! 2. QPolicy::select() - epsilon-greedy over the valid actions
//! 3. RewardCalculator::calculate() - every reward rule
//! 4. QPolicy::updated_value() - the Bellman step
//!
//! ## Performance Targets
//! - Encoding: < 1µs per state
//! - Selection: < 5µs per decision
//! - Reward: < 5µs per transition

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use ade_core::{Difficulty, Mastery, StudentId, TopicId};
use ade_rl::{
    Action, LearnerTopicState, PolicyParams, QPolicy, QValues, RewardCalculator, RewardContext,
    StateEncoder,
};

fn create_state(mastery: f64, correct_streak: u32, wrong_streak: u32) -> LearnerTopicState {
    let mut state = LearnerTopicState::new(StudentId::from("bench"), TopicId::from("algebra"));
    state.mastery = Mastery::new(mastery);
    state.difficulty = Difficulty::new(3);
    state.correct_streak = correct_streak;
    state.wrong_streak = wrong_streak;
    state.total_attempts = correct_streak + wrong_streak + 5;
    state
}

fn create_q_values(filled: usize) -> QValues {
    Action::ALL
        .iter()
        .take(filled)
        .enumerate()
        .map(|(i, a)| (*a, i as f64 * 0.37 - 1.0))
        .collect()
}

fn bench_encoding(c: &mut Criterion) {
    let encoder = StateEncoder::new();
    let state = create_state(63.4, 5, 0);

    c.bench_function("state_encode", |b| {
        b.iter(|| encoder.encode(black_box(&state)));
    });
}

fn bench_selection(c: &mut Criterion) {
    let policy = QPolicy::new(PolicyParams::default());
    let mut group = c.benchmark_group("epsilon_greedy_select");

    for filled in [0usize, 5, 10] {
        let q = create_q_values(filled);
        group.bench_with_input(BenchmarkId::from_parameter(filled), &q, |b, q| {
            let mut rng = StdRng::seed_from_u64(1);
            b.iter(|| policy.select(black_box(q), &Action::ALL, 0.1, &mut rng));
        });
    }

    group.finish();
}

fn bench_epsilon(c: &mut Criterion) {
    let policy = QPolicy::new(PolicyParams::default());
    c.bench_function("epsilon_schedule", |b| {
        b.iter(|| policy.epsilon(black_box(750)));
    });
}

fn bench_reward(c: &mut Criterion) {
    let calculator = RewardCalculator::default();
    let prev = create_state(68.0, 2, 0);
    let next = create_state(74.5, 3, 0);

    c.bench_function("reward_calculate", |b| {
        b.iter(|| {
            calculator.calculate(black_box(&RewardContext {
                prev: &prev,
                next: &next,
                action: Action::MaintainDifficulty,
                was_correct: true,
                elapsed_seconds: 41.0,
            }))
        });
    });
}

fn bench_bellman(c: &mut Criterion) {
    let policy = QPolicy::new(PolicyParams::default());
    let next = create_q_values(10);

    c.bench_function("bellman_update", |b| {
        b.iter(|| policy.updated_value(black_box(1.25), black_box(6.0), &next));
    });
}

criterion_group!(
    benches,
    bench_encoding,
    bench_selection,
    bench_epsilon,
    bench_reward,
    bench_bellman
);
criterion_main!(benches);
