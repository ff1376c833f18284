//! Phase-grouped schedules and their conversion to flat analytics input.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::DomainResult;
use crate::models::Task;
use crate::schedule::ScheduleTask;

const BUNDLED: &str = include_str!("../assets/construction_schedule.json");

/// Phase name used for tasks with no recoverable root
const UNPHASED: &str = "Unphased";

/// A task as listed under its phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTask {
    pub id: String,
    pub name: String,
    pub start: String,
    pub end: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crew_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePhase {
    pub name: String,
    pub tasks: Vec<PhaseTask>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructionSchedule {
    pub project: String,
    pub baseline_start: String,
    pub baseline_end: String,
    pub timezone: String,
    pub phases: Vec<SchedulePhase>,
}

impl ConstructionSchedule {
    /// The sample schedule shipped with the binary
    pub fn bundled() -> DomainResult<Self> {
        Ok(serde_json::from_str(BUNDLED)?)
    }

    /// Load a schedule from a JSON file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schedule file {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse schedule file")
    }

    /// Bundled schedule unless a file is given
    pub fn resolve(source: Option<&Path>) -> Result<Self> {
        match source {
            Some(path) => Self::load_from(path),
            None => Self::bundled().context("Bundled schedule is malformed"),
        }
    }
}

/// Flatten phases into analytics tasks, tagging each with its phase name.
pub fn flatten_schedule(schedule: &ConstructionSchedule) -> Vec<ScheduleTask> {
    schedule
        .phases
        .iter()
        .flat_map(|phase| {
            phase.tasks.iter().map(|task| ScheduleTask {
                id: task.id.clone(),
                phase: phase.name.clone(),
                name: task.name.clone(),
                start: task.start.clone(),
                end: task.end.clone(),
                dependencies: task.dependencies.clone(),
                resources: task.resources.clone(),
                crew_size: task.crew_size,
                percent_complete: task.percent_complete,
                notes: task.notes.clone(),
            })
        })
        .collect()
}

/// Project tasks as analytics input.
///
/// The phase is the title of the task's top-level ancestor, the window runs
/// to the final end date, the owner is the resource and the parent is the
/// dependency.
pub fn project_schedule(tasks: &[Task]) -> Vec<ScheduleTask> {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    tasks
        .iter()
        .map(|task| ScheduleTask {
            id: task.id.clone(),
            phase: root_title(task, &by_id).to_string(),
            name: task.title.clone(),
            start: task.start_date.to_string(),
            end: task.end_date_final.to_string(),
            dependencies: task.parent_task_id.iter().cloned().collect(),
            resources: task.owner_id.iter().cloned().collect(),
            crew_size: None,
            percent_complete: Some(u32::from(task.progress)),
            notes: task.description.clone(),
        })
        .collect()
}

fn root_title<'a>(task: &'a Task, by_id: &HashMap<&str, &'a Task>) -> &'a str {
    let mut current = task;
    // Bounded walk; stored hierarchies are acyclic but may be deep
    for _ in 0..=by_id.len() {
        match current
            .parent_task_id
            .as_deref()
            .and_then(|id| by_id.get(id).copied())
        {
            Some(parent) => current = parent,
            None => return &current.title,
        }
    }
    UNPHASED
}
