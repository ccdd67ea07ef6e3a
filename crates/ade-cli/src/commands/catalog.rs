//! Reference data registration

use ade_core::{CohortMode, StudentId, TopicId, UnitId};
use ade_engine::{EngineConfig, TopicInfo, UnitRef};
use anyhow::{bail, Result};
use clap::Subcommand;

use super::connect;

#[derive(Subcommand)]
pub enum CatalogCommands {
    /// Create or update a topic
    AddTopic {
        /// Topic id
        id: String,
        /// Human-readable name
        name: String,
        /// Unit unlocked once the topic is stably mastered
        #[arg(long)]
        next_unit: Option<String>,
        /// Display name of the next unit (defaults to its id)
        #[arg(long, requires = "next_unit")]
        next_unit_name: Option<String>,
    },
    /// Create or update a student
    AddStudent {
        /// Student id
        id: String,
        /// Experiment cohort (adaptive or control)
        #[arg(long, default_value = "adaptive")]
        cohort: String,
    },
}

pub async fn run(config: &EngineConfig, cmd: CatalogCommands) -> Result<()> {
    match cmd {
        CatalogCommands::AddTopic {
            id,
            name,
            next_unit,
            next_unit_name,
        } => {
            if name.trim().is_empty() {
                bail!("topic name must not be empty");
            }
            let next_unit = next_unit.map(|unit| UnitRef {
                display_name: next_unit_name.unwrap_or_else(|| unit.clone()),
                id: UnitId::new(unit),
            });
            let topic = TopicInfo {
                id: TopicId::new(id),
                name,
                next_unit,
            };
            let store = connect(config).await?;
            store.upsert_topic(&topic).await?;
            println!("Topic {} saved.", topic.id.as_str());
        }
        CatalogCommands::AddStudent { id, cohort } => {
            let cohort: CohortMode = cohort.parse()?;
            let student = StudentId::new(id);
            let store = connect(config).await?;
            store.upsert_student(&student, cohort).await?;
            println!("Student {} saved ({}).", student.as_str(), cohort.as_str());
        }
    }
    Ok(())
}
