//! Per-learner commands against PostgreSQL

use ade_core::{CognitiveDomain, StudentId, SubmissionToken, TopicId};
use ade_engine::{AnswerOutcome, AnswerRequest, EngineConfig, ProcessOutcome};
use anyhow::{Context, Result};
use clap::Args;
use uuid::Uuid;

use super::{connect, pg_engine};

#[derive(Args)]
pub struct AnswerArgs {
    /// Student id
    pub student: String,
    /// Topic id
    pub topic: String,
    /// The answer was wrong (default: correct)
    #[arg(long)]
    pub wrong: bool,
    /// Seconds spent on the question
    #[arg(short, long, default_value = "30")]
    pub elapsed: f64,
    /// Cognitive domain of the question (knowledge_recall, comprehension, application,
    /// analysis, evaluation, higher_order_thinking)
    #[arg(short, long, default_value = "knowledge_recall")]
    pub domain: String,
    /// Submission token; a fresh one is generated when omitted
    #[arg(short, long)]
    pub token: Option<String>,
    /// Print the full outcome as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn answer(config: &EngineConfig, args: AnswerArgs) -> Result<()> {
    let domain: CognitiveDomain = args.domain.parse()?;
    let token = args.token.unwrap_or_else(|| Uuid::new_v4().to_string());
    let engine = pg_engine(config).await?;

    let request = AnswerRequest {
        student_id: StudentId::new(args.student),
        topic_id: TopicId::new(args.topic),
        token: SubmissionToken::new(token.clone()),
        was_correct: !args.wrong,
        elapsed_seconds: args.elapsed,
        domain,
    };

    let result = engine
        .process_answer(request)
        .await
        .context("failed to process answer")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.outcome())?);
        return Ok(());
    }

    match result {
        ProcessOutcome::Processed(outcome) => print_outcome(&token, &outcome),
        ProcessOutcome::Duplicate { previous } => {
            println!("Token {token} was already processed; nothing changed.");
            if let Some(outcome) = previous {
                print_outcome(&token, &outcome);
            }
        }
    }
    Ok(())
}

fn print_outcome(token: &str, outcome: &AnswerOutcome) {
    println!("Answer {token}");
    println!("{}", "-".repeat(60));
    println!(
        "Action:     {} ({}{})",
        outcome.action.as_str(),
        outcome.strategy.as_str(),
        if outcome.used_exploration { ", explored" } else { "" }
    );
    println!("Reason:     {}", outcome.reason);
    println!("Difficulty: {}", outcome.new_difficulty.level());
    println!(
        "Mastery:    {:.2} ({:+.2}, {})",
        outcome.new_mastery.value(),
        outcome.mastery_delta,
        outcome.new_mastery.level().as_str()
    );
    println!("Reward:     {:+.2}", outcome.reward);
    for rule in &outcome.reward_rules {
        println!("  {:<28} {:+.2}", rule.name, rule.delta);
    }
    println!("Epsilon:    {:.3}", outcome.epsilon);
    println!(
        "Stable:     {} ({})",
        if outcome.stability.meets { "yes" } else { "no" },
        outcome.stability.reason
    );
    if let Some(unlock) = &outcome.unlock {
        println!();
        println!("{}", unlock.message);
    }
}

pub async fn show_state(config: &EngineConfig, student: &str, topic: &str) -> Result<()> {
    let engine = pg_engine(config).await?;
    let student = StudentId::new(student);
    let topic = TopicId::new(topic);

    let state = engine.state(&student, &topic).await?;
    let snapshot = engine.policy_snapshot(&student, &state).await?;

    println!("Learner {} on {}", student.as_str(), topic.as_str());
    println!("{}", "-".repeat(60));
    println!("Difficulty:      {}", state.difficulty.level());
    println!(
        "Mastery:         {:.2} ({})",
        state.mastery.value(),
        state.mastery.level().as_str()
    );
    println!(
        "Attempts:        {} ({} correct, {} wrong, {:.0}% accuracy)",
        state.total_attempts,
        state.correct_answers,
        state.wrong_answers,
        state.accuracy() * 100.0
    );
    println!(
        "Streaks:         {} correct / {} wrong",
        state.correct_streak, state.wrong_streak
    );
    println!("Representation:  {}", state.current_representation.as_str());
    println!(
        "Last action:     {}",
        state.last_action.map_or("-", |a| a.as_str())
    );
    println!();
    println!("State key: {}   epsilon {:.3}", snapshot.state_key.as_str(), snapshot.epsilon);
    println!("{:<26} {:>10}", "ACTION", "Q");
    for (action, value) in &snapshot.q_values {
        let marker = if snapshot.best == Some(*action) { " *" } else { "" };
        println!("{:<26} {:>10.4}{marker}", action.as_str(), value);
    }
    Ok(())
}

pub async fn migrate(config: &EngineConfig) -> Result<()> {
    let store = connect(config).await?;
    store.migrate().await.context("migration failed")?;
    println!("Migrations applied.");
    Ok(())
}
