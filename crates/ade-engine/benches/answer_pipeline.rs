//! Answer Pipeline Benchmarks
//!
//! Full process_answer round trips over the in-memory store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ade_core::{CognitiveDomain, StudentId, SubmissionToken, TopicId};
use ade_engine::{AdaptiveEngine, AnswerRequest, EngineConfig, InMemoryStore};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn build_engine(rt: &tokio::runtime::Runtime) -> AdaptiveEngine {
    let store = Arc::new(InMemoryStore::new());
    rt.block_on(store.add_topic("fractions", "Fractions", Some(("decimals", "Decimals"))));
    AdaptiveEngine::with_store(&EngineConfig::default(), store).with_seed(1)
}

fn benchmark_process_answer(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("process_answer");

    for students in [1usize, 100] {
        let engine = build_engine(&rt);
        let topic = TopicId::new("fractions");
        let counter = AtomicU64::new(0);

        group.bench_with_input(BenchmarkId::from_parameter(students), &students, |b, &students| {
            b.iter(|| {
                let n = counter.fetch_add(1, Ordering::Relaxed);
                let request = AnswerRequest {
                    student_id: StudentId::new(format!("s{}", n % students as u64)),
                    topic_id: topic.clone(),
                    token: SubmissionToken::new(format!("t{n}")),
                    was_correct: n % 3 != 0,
                    elapsed_seconds: 40.0,
                    domain: CognitiveDomain::Application,
                };
                black_box(rt.block_on(engine.process_answer(request)).unwrap())
            });
        });
    }

    group.finish();
}

fn benchmark_policy_snapshot(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = build_engine(&rt);
    let student = StudentId::new("s0");
    let topic = TopicId::new("fractions");
    let state = rt.block_on(engine.state(&student, &topic)).unwrap();

    c.bench_function("policy_snapshot_cached", |b| {
        b.iter(|| black_box(rt.block_on(engine.policy_snapshot(&student, &state)).unwrap()));
    });
}

criterion_group!(benches, benchmark_process_answer, benchmark_policy_snapshot);
criterion_main!(benches);
