//! Schedule analytics over flat task lists.
//!
//! Everything here is a pure function of its input. Dates are ISO calendar
//! strings and are parsed on use, so a malformed date surfaces as
//! [`DomainError::InvalidDate`].

use std::ops::Index;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::dates::{inclusive_day_count, inclusive_days, parse_calendar_date, utc_day};
use crate::error::DomainResult;

pub const CSV_HEADER: &str =
    "id,phase,name,start,end,dependencies,resources,crewSize,percentComplete,notes";

/// One bar of an analytics schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTask {
    pub id: String,
    pub phase: String,
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

impl ScheduleTask {
    fn span(&self) -> DomainResult<(NaiveDate, NaiveDate)> {
        Ok((parse_calendar_date(&self.start)?, parse_calendar_date(&self.end)?))
    }

    fn duration_days(&self) -> DomainResult<i64> {
        inclusive_day_count(&self.start, &self.end)
    }

    fn uses(&self, resource: &str) -> bool {
        self.resources.iter().any(|r| r == resource)
    }
}

/// Per-phase values, kept in the order phases first appear in the schedule.
/// Serializes as a JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for PhaseMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> PhaseMap<V> {
    pub fn get(&self, phase: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(name, _)| name == phase)
            .map(|(_, value)| value)
    }

    fn entry_or_insert_with(&mut self, phase: &str, make: impl FnOnce() -> V) -> &mut V {
        let index = match self.entries.iter().position(|(name, _)| name == phase) {
            Some(index) => index,
            None => {
                self.entries.push((phase.to_string(), make()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[index].1
    }

    fn map_values<W>(self, mut f: impl FnMut(V) -> W) -> PhaseMap<W> {
        PhaseMap {
            entries: self
                .entries
                .into_iter()
                .map(|(name, value)| (name, f(value)))
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn phases(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl<V> Index<&str> for PhaseMap<V> {
    type Output = V;

    fn index(&self, phase: &str) -> &V {
        match self.get(phase) {
            Some(value) => value,
            None => panic!("no phase named {phase:?}"),
        }
    }
}

impl<V: Serialize> Serialize for PhaseMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(name, value)| (name, value)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSummary {
    pub start: String,
    pub end: String,
    pub duration_days: i64,
    pub task_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSummary {
    pub project_start: Option<String>,
    pub project_end: Option<String>,
    pub total_duration_days: i64,
    pub phase_summaries: PhaseMap<PhaseSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlap {
    pub task_a: ScheduleTask,
    pub task_b: ScheduleTask,
    pub overlap_days: i64,
    pub shared_resources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub overall: i64,
    pub by_phase: PhaseMap<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Start,
    Deadline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleAlert {
    pub task_id: String,
    pub task_name: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub due_in_days: i64,
}

/// Row for a Gantt chart widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GanttDatasetItem {
    pub id: String,
    pub name: String,
    pub start: String,
    pub end: String,
    pub progress: u32,
    pub dependencies: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecommendation {
    pub resource: String,
    pub tasks: [String; 2],
    pub overlap_days: i64,
    pub recommendation: String,
}

struct PhaseSpan {
    start: (NaiveDate, String),
    end: (NaiveDate, String),
    task_count: usize,
}

/// Overall window plus a per-phase window and task count.
pub fn build_timeline(tasks: &[ScheduleTask]) -> DomainResult<TimelineSummary> {
    let mut project: Option<((NaiveDate, &str), (NaiveDate, &str))> = None;
    let mut phases: PhaseMap<PhaseSpan> = PhaseMap::default();

    for task in tasks {
        let (start, end) = task.span()?;

        project = Some(match project {
            None => ((start, task.start.as_str()), (end, task.end.as_str())),
            Some((first, last)) => (
                if start < first.0 {
                    (start, task.start.as_str())
                } else {
                    first
                },
                if end > last.0 {
                    (end, task.end.as_str())
                } else {
                    last
                },
            ),
        });

        let span = phases.entry_or_insert_with(&task.phase, || PhaseSpan {
            start: (start, task.start.clone()),
            end: (end, task.end.clone()),
            task_count: 0,
        });
        if start < span.start.0 {
            span.start = (start, task.start.clone());
        }
        if end > span.end.0 {
            span.end = (end, task.end.clone());
        }
        span.task_count += 1;
    }

    let Some(((first, first_raw), (last, last_raw))) = project else {
        return Ok(TimelineSummary::default());
    };

    let phase_summaries = phases.map_values(|span| PhaseSummary {
        duration_days: inclusive_days(span.start.0, span.end.0),
        start: span.start.1,
        end: span.end.1,
        task_count: span.task_count,
    });

    Ok(TimelineSummary {
        project_start: Some(first_raw.to_string()),
        project_end: Some(last_raw.to_string()),
        total_duration_days: inclusive_days(first, last),
        phase_summaries,
    })
}

/// Every pair of tasks whose date ranges intersect.
///
/// With a `resource_filter`, pairs where neither task uses that resource are
/// skipped. Shared resources keep the first task's order.
pub fn find_overlaps(
    tasks: &[ScheduleTask],
    resource_filter: Option<&str>,
) -> DomainResult<Vec<Overlap>> {
    let spans = tasks
        .iter()
        .map(ScheduleTask::span)
        .collect::<DomainResult<Vec<_>>>()?;

    let mut overlaps = Vec::new();
    for i in 0..tasks.len() {
        for j in (i + 1)..tasks.len() {
            let (a, b) = (&tasks[i], &tasks[j]);
            if let Some(resource) = resource_filter
                && !a.uses(resource)
                && !b.uses(resource)
            {
                continue;
            }

            let latest_start = spans[i].0.max(spans[j].0);
            let earliest_end = spans[i].1.min(spans[j].1);
            if earliest_end < latest_start {
                continue;
            }

            let shared_resources = a
                .resources
                .iter()
                .filter(|r| b.uses(r))
                .cloned()
                .collect();
            overlaps.push(Overlap {
                task_a: a.clone(),
                task_b: b.clone(),
                overlap_days: inclusive_days(latest_start, earliest_end),
                shared_resources,
            });
        }
    }
    Ok(overlaps)
}

/// Completion weighted by duration times crew size, overall and per phase.
pub fn calculate_progress(tasks: &[ScheduleTask]) -> DomainResult<ProgressSnapshot> {
    #[derive(Default)]
    struct Totals {
        weighted: f64,
        completed: f64,
    }

    impl Totals {
        fn add(&mut self, weight: f64, ratio: f64) {
            self.weighted += weight;
            self.completed += weight * ratio;
        }

        fn percent(&self) -> i64 {
            if self.weighted == 0.0 {
                0
            } else {
                (self.completed / self.weighted * 100.0).round() as i64
            }
        }
    }

    let mut overall = Totals::default();
    let mut by_phase: PhaseMap<Totals> = PhaseMap::default();

    for task in tasks {
        let weight = (task.duration_days()? * i64::from(task.crew_size.unwrap_or(1))) as f64;
        let ratio = f64::from(task.percent_complete.unwrap_or(0)) / 100.0;
        overall.add(weight, ratio);
        by_phase
            .entry_or_insert_with(&task.phase, Totals::default)
            .add(weight, ratio);
    }

    Ok(ProgressSnapshot {
        overall: overall.percent(),
        by_phase: by_phase.map_values(|totals| totals.percent()),
    })
}

/// Starts and deadlines falling within `horizon_days` of the reference day.
pub fn generate_alerts(
    tasks: &[ScheduleTask],
    reference: DateTime<Utc>,
    horizon_days: u32,
) -> DomainResult<Vec<ScheduleAlert>> {
    let today = utc_day(reference);
    let horizon = i64::from(horizon_days);
    let mut alerts = Vec::new();

    for task in tasks {
        let (start, end) = task.span()?;
        for (kind, day) in [(AlertKind::Start, start), (AlertKind::Deadline, end)] {
            let delta = (day - today).num_days();
            if (0..=horizon).contains(&delta) {
                alerts.push(ScheduleAlert {
                    task_id: task.id.clone(),
                    task_name: task.name.clone(),
                    kind,
                    due_in_days: delta,
                });
            }
        }
    }
    Ok(alerts)
}

// JSON string literal rules: wrapped in double quotes, inner quotes escaped.
fn quote(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// CSV export consumed by downstream tooling; the layout is fixed.
pub fn to_csv(tasks: &[ScheduleTask]) -> String {
    let mut lines = Vec::with_capacity(tasks.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for task in tasks {
        let fields = [
            task.id.clone(),
            task.phase.clone(),
            quote(&task.name),
            task.start.clone(),
            task.end.clone(),
            task.dependencies.join("|"),
            task.resources.join("|"),
            task.crew_size.map(|n| n.to_string()).unwrap_or_default(),
            task.percent_complete
                .map(|n| n.to_string())
                .unwrap_or_default(),
            task.notes
                .as_deref()
                .filter(|notes| !notes.is_empty())
                .map(quote)
                .unwrap_or_default(),
        ];
        lines.push(fields.join(","));
    }
    lines.join("\n")
}

pub fn to_gantt_dataset(tasks: &[ScheduleTask]) -> Vec<GanttDatasetItem> {
    tasks
        .iter()
        .map(|task| GanttDatasetItem {
            id: task.id.clone(),
            name: format!("{}: {}", task.phase, task.name),
            start: task.start.clone(),
            end: task.end.clone(),
            progress: task.percent_complete.unwrap_or(0),
            dependencies: task.dependencies.join(","),
        })
        .collect()
}

/// Advice for overlapping tasks that compete for a resource. Nothing is
/// rescheduled.
pub fn suggest_resource_leveling(
    tasks: &[ScheduleTask],
    resource_filter: Option<&str>,
) -> DomainResult<Vec<ResourceRecommendation>> {
    Ok(find_overlaps(tasks, resource_filter)?
        .into_iter()
        .filter(|overlap| !overlap.shared_resources.is_empty())
        .map(|overlap| {
            let resource = overlap.shared_resources.join(", ");
            ResourceRecommendation {
                recommendation: format!(
                    "Shift {} by {} day(s) or split crew for resource {}",
                    overlap.task_b.id, overlap.overlap_days, resource
                ),
                tasks: [overlap.task_a.id, overlap.task_b.id],
                overlap_days: overlap.overlap_days,
                resource,
            }
        })
        .collect())
}

/// Options for a full analytics report
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub reference: DateTime<Utc>,
    pub horizon_days: u32,
    pub resource: Option<String>,
}

/// Every analytic for one task list, as served by the schedule endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleReport {
    pub tasks: Vec<ScheduleTask>,
    pub timeline: TimelineSummary,
    pub overlaps: Vec<Overlap>,
    pub progress: ProgressSnapshot,
    pub alerts: Vec<ScheduleAlert>,
    pub csv: String,
    pub gantt: Vec<GanttDatasetItem>,
    pub resource_recommendations: Vec<ResourceRecommendation>,
}

impl ScheduleReport {
    pub fn build(tasks: Vec<ScheduleTask>, options: &ReportOptions) -> DomainResult<Self> {
        let resource = options.resource.as_deref();
        Ok(Self {
            timeline: build_timeline(&tasks)?,
            overlaps: find_overlaps(&tasks, resource)?,
            progress: calculate_progress(&tasks)?,
            alerts: generate_alerts(&tasks, options.reference, options.horizon_days)?,
            csv: to_csv(&tasks),
            gantt: to_gantt_dataset(&tasks),
            resource_recommendations: suggest_resource_leveling(&tasks, resource)?,
            tasks,
        })
    }
}
