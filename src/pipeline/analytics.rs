use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::domain::{
    ApplicationId, DateRange, Stage, StageHistoryEntry, StageId, StageKind, WorkflowId,
};
use super::repository::{LedgerError, PipelineStore, StageHistoryStore, StoreError};

/// Default cut-off applied when the caller does not specify one.
pub const DEFAULT_MIN_BOTTLENECK_SCORE: f64 = 25.0;

/// Weights composing the 0-100 bottleneck score, plus the sample floor used
/// to down-weight stages with too little traffic to score reliably.
#[derive(Debug, Clone, PartialEq)]
pub struct BottleneckWeights {
    pub conversion_deficit: f64,
    pub dwell_excess: f64,
    pub stuck: f64,
    pub min_sample_size: usize,
}

impl Default for BottleneckWeights {
    fn default() -> Self {
        Self {
            conversion_deficit: 0.45,
            dwell_excess: 0.35,
            stuck: 0.20,
            min_sample_size: 10,
        }
    }
}

/// Per-stage funnel metrics derived from the stage-history ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageMetrics {
    pub stage_id: StageId,
    pub stage_name: String,
    pub order: u32,
    pub kind: StageKind,
    pub applications: usize,
    /// Fraction of entrants that later advanced to a later-order,
    /// non-FAIL stage.
    pub conversion_rate: f64,
    /// Fraction of entrants whose immediate next ledger row is a FAIL stage.
    pub dropout_rate: f64,
    pub mean_dwell_hours: Option<f64>,
    pub median_dwell_hours: Option<f64>,
    /// Open rows that have outstayed the stage's deadline or duration
    /// estimate.
    pub stuck: usize,
}

/// Which factor pushed a stage's bottleneck score up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckDriver {
    LowConversion,
    ExcessiveDwell,
    StuckApplications,
}

/// A stage flagged as impeding pipeline flow, scored 0-100.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageBottleneck {
    pub stage_id: StageId,
    pub stage_name: String,
    pub order: u32,
    pub score: f64,
    pub applications: usize,
    pub conversion_rate: f64,
    pub workflow_conversion_rate: f64,
    pub mean_dwell_hours: Option<f64>,
    pub workflow_mean_dwell_hours: Option<f64>,
    pub stuck: usize,
    pub drivers: Vec<BottleneckDriver>,
}

/// Dwell/conversion extremes surfaced on the workflow summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageHighlight {
    pub stage_id: StageId,
    pub stage_name: String,
    pub value: f64,
}

/// Full analytics result for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowAnalytics {
    pub workflow_id: WorkflowId,
    pub total_applications: usize,
    pub active_applications: usize,
    pub completed_applications: usize,
    pub rejected_applications: usize,
    pub stages: Vec<StageMetrics>,
    /// Lowest median dwell, in hours.
    pub fastest_stage: Option<StageHighlight>,
    /// Highest median dwell, in hours.
    pub slowest_stage: Option<StageHighlight>,
    pub highest_converting_stage: Option<StageHighlight>,
    pub lowest_converting_stage: Option<StageHighlight>,
    pub bottlenecks: Vec<StageBottleneck>,
    pub recommendations: Vec<String>,
}

/// Read-only consumer of the ledger; computes funnel health per workflow.
pub struct AnalyticsEngine<P, L> {
    pipeline: Arc<P>,
    ledger: Arc<L>,
    weights: BottleneckWeights,
    min_score: f64,
}

impl<P, L> AnalyticsEngine<P, L>
where
    P: PipelineStore,
    L: StageHistoryStore,
{
    pub fn new(pipeline: Arc<P>, ledger: Arc<L>) -> Self {
        Self::with_weights(pipeline, ledger, BottleneckWeights::default())
    }

    pub fn with_weights(pipeline: Arc<P>, ledger: Arc<L>, weights: BottleneckWeights) -> Self {
        Self {
            pipeline,
            ledger,
            weights,
            min_score: DEFAULT_MIN_BOTTLENECK_SCORE,
        }
    }

    /// Override the cut-off used when a caller does not supply one
    /// (`APP_MIN_BOTTLENECK_SCORE` in the server wiring).
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn default_min_score(&self) -> f64 {
        self.min_score
    }

    /// Compute the full per-stage and workflow-level picture. Deterministic
    /// for a fixed ledger snapshot and `now`.
    pub fn workflow_analytics(
        &self,
        workflow_id: &WorkflowId,
        range: Option<&DateRange>,
        now: DateTime<Utc>,
    ) -> Result<WorkflowAnalytics, AnalyticsError> {
        let stages = self.workflow_stages(workflow_id)?;
        let entries = self.ledger.entries_for_workflow(workflow_id, range)?;
        let metrics = compute_stage_metrics(&stages, &entries, now);

        let journeys = journeys_by_application(&entries);
        let stage_kinds: HashMap<&StageId, StageKind> =
            stages.iter().map(|stage| (&stage.id, stage.kind)).collect();

        let total_applications = journeys.len();
        let mut active_applications = 0;
        let mut completed_applications = 0;
        let mut rejected_applications = 0;
        for journey in journeys.values() {
            // Open rows on terminal stages are settled, not in flight.
            let in_flight = journey.iter().any(|entry| {
                entry.is_open()
                    && stage_kinds
                        .get(&entry.stage_id)
                        .map(|kind| !kind.is_terminal())
                        .unwrap_or(true)
            });
            if in_flight {
                active_applications += 1;
            }
            let reached = |kind: StageKind| {
                journey
                    .iter()
                    .any(|entry| stage_kinds.get(&entry.stage_id) == Some(&kind))
            };
            if reached(StageKind::Success) {
                completed_applications += 1;
            }
            if reached(StageKind::Fail) {
                rejected_applications += 1;
            }
        }

        let bottlenecks = self.score_bottlenecks(&metrics, self.min_score);
        let recommendations = build_recommendations(&bottlenecks);

        let dwell_ranked = |pick_max: bool| {
            metrics
                .iter()
                .filter_map(|m| m.median_dwell_hours.map(|median| (m, median)))
                .fold(None::<(&StageMetrics, f64)>, |best, (m, median)| match best {
                    Some((_, value)) if (median > value) != pick_max => best,
                    _ => Some((m, median)),
                })
                .map(|(m, median)| StageHighlight {
                    stage_id: m.stage_id.clone(),
                    stage_name: m.stage_name.clone(),
                    value: median,
                })
        };
        let conversion_ranked = |pick_max: bool| {
            metrics
                .iter()
                .filter(|m| !m.kind.is_terminal() && m.applications > 0)
                .fold(None::<(&StageMetrics, f64)>, |best, m| match best {
                    Some((_, value)) if (m.conversion_rate > value) != pick_max => best,
                    _ => Some((m, m.conversion_rate)),
                })
                .map(|(m, rate)| StageHighlight {
                    stage_id: m.stage_id.clone(),
                    stage_name: m.stage_name.clone(),
                    value: rate,
                })
        };

        Ok(WorkflowAnalytics {
            workflow_id: workflow_id.clone(),
            total_applications,
            active_applications,
            completed_applications,
            rejected_applications,
            fastest_stage: dwell_ranked(false),
            slowest_stage: dwell_ranked(true),
            highest_converting_stage: conversion_ranked(true),
            lowest_converting_stage: conversion_ranked(false),
            bottlenecks,
            recommendations,
            stages: metrics,
        })
    }

    /// Stages ranked by bottleneck score, filtered to `score >= min_score`.
    pub fn bottlenecks(
        &self,
        workflow_id: &WorkflowId,
        range: Option<&DateRange>,
        min_score: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<StageBottleneck>, AnalyticsError> {
        let stages = self.workflow_stages(workflow_id)?;
        let entries = self.ledger.entries_for_workflow(workflow_id, range)?;
        let metrics = compute_stage_metrics(&stages, &entries, now);
        Ok(self.score_bottlenecks(&metrics, min_score))
    }

    fn workflow_stages(&self, workflow_id: &WorkflowId) -> Result<Vec<Stage>, AnalyticsError> {
        self.pipeline
            .workflow(workflow_id)?
            .ok_or_else(|| AnalyticsError::WorkflowNotFound(workflow_id.clone()))?;
        Ok(self.pipeline.stages_for_workflow(workflow_id)?)
    }

    fn score_bottlenecks(
        &self,
        metrics: &[StageMetrics],
        min_score: f64,
    ) -> Vec<StageBottleneck> {
        // Terminal stages have no onward conversion by construction and are
        // excluded from scoring.
        let scorable: Vec<&StageMetrics> = metrics
            .iter()
            .filter(|m| !m.kind.is_terminal() && m.applications > 0)
            .collect();

        let workflow_conversion = mean(scorable.iter().map(|m| m.conversion_rate));
        let workflow_dwell = mean(scorable.iter().filter_map(|m| m.mean_dwell_hours));

        let mut flagged = Vec::new();
        for m in scorable {
            let conversion_deficit = match workflow_conversion {
                Some(avg) if avg > 0.0 => ((avg - m.conversion_rate) / avg).max(0.0).min(1.0),
                _ => 0.0,
            };
            let dwell_excess = match (m.mean_dwell_hours, workflow_dwell) {
                (Some(dwell), Some(avg)) if avg > 0.0 => ((dwell - avg) / avg).max(0.0).min(1.0),
                _ => 0.0,
            };
            let stuck_ratio = m.stuck as f64 / m.applications as f64;
            let volume_weight =
                (m.applications as f64 / self.weights.min_sample_size as f64).min(1.0);

            let score = 100.0
                * volume_weight
                * (self.weights.conversion_deficit * conversion_deficit
                    + self.weights.dwell_excess * dwell_excess
                    + self.weights.stuck * stuck_ratio.min(1.0));

            if score < min_score {
                continue;
            }

            let mut drivers = Vec::new();
            if conversion_deficit >= 0.25 {
                drivers.push(BottleneckDriver::LowConversion);
            }
            if dwell_excess >= 0.25 {
                drivers.push(BottleneckDriver::ExcessiveDwell);
            }
            if stuck_ratio >= 0.1 {
                drivers.push(BottleneckDriver::StuckApplications);
            }

            flagged.push(StageBottleneck {
                stage_id: m.stage_id.clone(),
                stage_name: m.stage_name.clone(),
                order: m.order,
                score,
                applications: m.applications,
                conversion_rate: m.conversion_rate,
                workflow_conversion_rate: workflow_conversion.unwrap_or(0.0),
                mean_dwell_hours: m.mean_dwell_hours,
                workflow_mean_dwell_hours: workflow_dwell,
                stuck: m.stuck,
                drivers,
            });
        }

        flagged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.order.cmp(&b.order))
        });
        flagged
    }
}

/// Error raised by analytics queries.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("workflow {} not found", .0 .0)]
    WorkflowNotFound(WorkflowId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

fn journeys_by_application(
    entries: &[StageHistoryEntry],
) -> BTreeMap<&ApplicationId, Vec<&StageHistoryEntry>> {
    let mut journeys: BTreeMap<&ApplicationId, Vec<&StageHistoryEntry>> = BTreeMap::new();
    for entry in entries {
        journeys.entry(&entry.application_id).or_default().push(entry);
    }
    journeys
}

fn compute_stage_metrics(
    stages: &[Stage],
    entries: &[StageHistoryEntry],
    now: DateTime<Utc>,
) -> Vec<StageMetrics> {
    let order_of: HashMap<&StageId, u32> =
        stages.iter().map(|stage| (&stage.id, stage.order)).collect();
    let kind_of: HashMap<&StageId, StageKind> =
        stages.iter().map(|stage| (&stage.id, stage.kind)).collect();

    let journeys = journeys_by_application(entries);

    let mut metrics = Vec::with_capacity(stages.len());
    for stage in stages {
        let mut entered: HashSet<&ApplicationId> = HashSet::new();
        let mut converted: HashSet<&ApplicationId> = HashSet::new();
        let mut dropped: HashSet<&ApplicationId> = HashSet::new();
        let mut dwell_samples: Vec<f64> = Vec::new();
        let mut stuck = 0usize;

        for (application, journey) in &journeys {
            for (index, entry) in journey.iter().enumerate() {
                if entry.stage_id != stage.id {
                    continue;
                }
                entered.insert(application);

                if let Some(dwell) = entry.dwell() {
                    dwell_samples.push(duration_hours(dwell));
                } else if let Some(threshold) = stage.stuck_threshold_days() {
                    if now - entry.entered_at > Duration::days(i64::from(threshold)) {
                        stuck += 1;
                    }
                }

                let advanced = journey.iter().skip(index + 1).any(|later| {
                    let later_order = order_of.get(&later.stage_id).copied();
                    let later_kind = kind_of.get(&later.stage_id).copied();
                    later_order.map(|o| o > stage.order).unwrap_or(false)
                        && later_kind != Some(StageKind::Fail)
                });
                if advanced {
                    converted.insert(application);
                }
                if let Some(next) = journey.get(index + 1) {
                    if kind_of.get(&next.stage_id) == Some(&StageKind::Fail) {
                        dropped.insert(application);
                    }
                }
            }
        }

        let applications = entered.len();
        let rate = |hits: usize| {
            if applications == 0 {
                0.0
            } else {
                hits as f64 / applications as f64
            }
        };

        metrics.push(StageMetrics {
            stage_id: stage.id.clone(),
            stage_name: stage.name.clone(),
            order: stage.order,
            kind: stage.kind,
            applications,
            conversion_rate: rate(converted.len()),
            dropout_rate: rate(dropped.len()),
            mean_dwell_hours: mean(dwell_samples.iter().copied()),
            median_dwell_hours: median(&mut dwell_samples),
            stuck,
        });
    }
    metrics
}

fn build_recommendations(bottlenecks: &[StageBottleneck]) -> Vec<String> {
    let mut recommendations = Vec::new();
    for bottleneck in bottlenecks {
        for driver in &bottleneck.drivers {
            let text = match driver {
                BottleneckDriver::LowConversion => format!(
                    "stage '{}' converts at {:.0}% against a workflow average of {:.0}%; revisit pass criteria or screening calibration",
                    bottleneck.stage_name,
                    bottleneck.conversion_rate * 100.0,
                    bottleneck.workflow_conversion_rate * 100.0,
                ),
                BottleneckDriver::ExcessiveDwell => format!(
                    "stage '{}' holds candidates for {:.1}h on average versus {:.1}h workflow-wide; add reviewer capacity or tighten SLAs",
                    bottleneck.stage_name,
                    bottleneck.mean_dwell_hours.unwrap_or(0.0),
                    bottleneck.workflow_mean_dwell_hours.unwrap_or(0.0),
                ),
                BottleneckDriver::StuckApplications => format!(
                    "stage '{}' has {} application(s) past its deadline; nudge the assigned reviewers",
                    bottleneck.stage_name, bottleneck.stuck,
                ),
            };
            recommendations.push(text);
        }
    }
    recommendations
}

fn duration_hours(duration: Duration) -> f64 {
    duration.num_seconds() as f64 / 3600.0
}

fn mean(samples: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for sample in samples {
        sum += sample;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

fn median(samples: &mut [f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        Some((samples[mid - 1] + samples[mid]) / 2.0)
    } else {
        Some(samples[mid])
    }
}
