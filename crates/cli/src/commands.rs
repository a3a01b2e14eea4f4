// Command implementations
// Each works against the CheckpointStore port so it can be tested with the
// in-memory store; main.rs owns printing.

use anyhow::{bail, Context, Result};
use std::net::IpAddr;
use std::time::Duration;
use tabled::Tabled;
use vdcmig_core::application::{AsyncTaskPoller, ResumePlan};
use vdcmig_core::domain::ip::split_excluding;
use vdcmig_core::domain::{AsyncTask, CheckpointRecord, IpRange, TaskHandle};
use vdcmig_core::port::{CheckpointStore, TimeProvider};

#[derive(Debug, Tabled)]
pub struct StatusRow {
    #[tabled(rename = "Unit")]
    pub unit_id: String,
    #[tabled(rename = "Name")]
    pub unit_name: String,
    #[tabled(rename = "Done")]
    pub completed: usize,
    #[tabled(rename = "Completed steps")]
    pub steps: String,
    #[tabled(rename = "Partial batches")]
    pub batches: String,
    #[tabled(rename = "Next step")]
    pub next: String,
    #[tabled(rename = "Updated (UTC)")]
    pub updated: String,
}

impl StatusRow {
    /// `pipeline` lists the run's step names in order; empty when unknown
    fn from_record(record: &CheckpointRecord, pipeline: &[&str]) -> Self {
        let steps = record.completed.completed();
        let next = if pipeline.is_empty() {
            "-".to_string()
        } else {
            let plan = ResumePlan::from_step_names(pipeline, &record.completed);
            plan.next_step().unwrap_or("(finished)").to_string()
        };
        let batches = record
            .batch_progress
            .iter()
            .map(|(step, items)| format!("{} ({} items)", step, items.len()))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            unit_id: record.unit_id.clone(),
            unit_name: record.unit_name.clone(),
            completed: steps.len(),
            steps: if steps.is_empty() { "-".to_string() } else { steps.join(", ") },
            batches: if batches.is_empty() { "-".to_string() } else { batches },
            next,
            updated: format_millis(record.updated_at),
        }
    }
}

pub fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

pub async fn status(
    store: &dyn CheckpointStore,
    unit: Option<&str>,
    pipeline: &[String],
) -> Result<Vec<StatusRow>> {
    let pipeline: Vec<&str> = pipeline
        .iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let records = match unit {
        Some(id) => match store.load(id).await? {
            Some(record) => vec![record],
            None => bail!("No checkpoint for unit {}", id),
        },
        None => store.list().await?,
    };
    Ok(records
        .iter()
        .map(|r| StatusRow::from_record(r, &pipeline))
        .collect())
}

pub async fn show(store: &dyn CheckpointStore, unit: &str) -> Result<String> {
    let record = store
        .load(unit)
        .await?
        .with_context(|| format!("No checkpoint for unit {}", unit))?;
    serde_json::to_string_pretty(&record).context("Failed to render record")
}

/// Clear one completion flag so the step runs again. Returns false if the flag
/// was not set.
pub async fn reset(
    store: &dyn CheckpointStore,
    time_provider: &dyn TimeProvider,
    unit: &str,
    step: &str,
) -> Result<bool> {
    let mut record = store
        .load(unit)
        .await?
        .with_context(|| format!("No checkpoint for unit {}", unit))?;
    if !record.is_done(step) {
        return Ok(false);
    }
    record.completed.clear(step);
    record.batch_progress.remove(step);
    record.updated_at = time_provider.now_millis();
    store.save(&record).await?;
    tracing::info!(unit_id = %unit, step = %step, "Completion flag cleared by operator");
    Ok(true)
}

pub async fn forget(store: &dyn CheckpointStore, unit: &str) -> Result<bool> {
    let removed = store.delete(unit).await?;
    if removed {
        tracing::info!(unit_id = %unit, "Checkpoint deleted by operator");
    }
    Ok(removed)
}

/// Sub-ranges of `range` left after removing `exclude` (comma-separated
/// addresses or a list of them)
pub fn split_range(range: &str, exclude: &[String]) -> Result<Vec<IpRange>> {
    let range: IpRange = range
        .parse()
        .with_context(|| format!("Invalid range {}", range))?;
    let excluded = exclude
        .iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<IpAddr>()
                .with_context(|| format!("Invalid address {}", s))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(split_excluding(&range, &excluded))
}

pub async fn wait_task(poller: &AsyncTaskPoller, href: &str, timeout: Duration) -> Result<AsyncTask> {
    poller
        .await_task(&TaskHandle::new(href), timeout)
        .await
        .with_context(|| format!("Task {} did not succeed", href))
}
