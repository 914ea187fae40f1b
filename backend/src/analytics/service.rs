use std::collections::HashMap;

use aws_config::meta::region::RegionProviderChain;
use aws_sdk_dynamodb::{Client, Error as AwsError};
use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use super::model::InferenceRun;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("AWS SDK error: {0}")]
    SdkError(AwsError),
    #[error("Malformed analytics record: {0}")]
    MalformedRecord(String),
}

/// Append-only sink for inference runs, backed by a DynamoDB table.
///
/// Writes are fire-and-forget from the caller's perspective: route handlers
/// spawn them and drop the result, and a delivery failure is logged at debug
/// level only.
#[derive(Clone)]
pub struct AnalyticsService {
    client: Client,
    table_name: String,
}

/// Aggregated snapshot for the stats endpoint.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct AnalyticsStats {
    pub total_runs: u64,
    pub success_rate: f64,
    pub avg_fps: f64,
    pub avg_inference_time_ms: f64,
    pub task_counts: HashMap<String, u64>,
}

impl AnalyticsService {
    pub async fn new(table_name: String) -> Self {
        info!("Initializing analytics sink with table: {}", table_name);
        let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
        let config = aws_config::from_env().region(region_provider).load().await;
        let client = Client::new(&config);
        Self { client, table_name }
    }

    /// Appends one run. Callers spawn this and ignore the result.
    pub async fn log_run(&self, run: &InferenceRun) -> Result<(), AnalyticsError> {
        debug!("Appending analytics record {} for task {}", run.id, run.task);
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(run.to_attributes()))
            .send()
            .await
            .map_err(|e| AnalyticsError::SdkError(e.into()))?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<AnalyticsStats, AnalyticsError> {
        let response = self
            .client
            .scan()
            .table_name(&self.table_name)
            .send()
            .await
            .map_err(|e| AnalyticsError::SdkError(e.into()))?;

        let runs: Vec<InferenceRun> = response
            .items()
            .iter()
            .filter_map(|item| InferenceRun::from_attributes(item).ok())
            .collect();
        Ok(aggregate(&runs))
    }
}

/// Pure aggregation over a batch of runs; averages cover successful runs
/// only, and fps averages skip runs that never reached inference.
pub fn aggregate(runs: &[InferenceRun]) -> AnalyticsStats {
    let total_runs = runs.len() as u64;
    let successes: Vec<&InferenceRun> = runs.iter().filter(|r| r.success).collect();

    let success_rate = if total_runs > 0 {
        round2(successes.len() as f64 / total_runs as f64 * 100.0)
    } else {
        0.0
    };

    let fps_values: Vec<f64> = successes
        .iter()
        .map(|r| r.timing.fps)
        .filter(|&fps| fps > 0.0)
        .collect();
    let avg_fps = if fps_values.is_empty() {
        0.0
    } else {
        round2(fps_values.iter().sum::<f64>() / fps_values.len() as f64)
    };

    let avg_inference_time_ms = if successes.is_empty() {
        0.0
    } else {
        round2(
            successes.iter().map(|r| r.timing.inference_ms).sum::<f64>()
                / successes.len() as f64,
        )
    };

    let mut task_counts = HashMap::new();
    for run in runs {
        *task_counts.entry(run.task.to_string()).or_insert(0) += 1;
    }

    AnalyticsStats {
        total_runs,
        success_rate,
        avg_fps,
        avg_inference_time_ms,
        task_counts,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Task, TimingBlock};

    fn run(task: Task, success: bool, inference_ms: f64) -> InferenceRun {
        InferenceRun::server(
            task,
            String::new(),
            TimingBlock::new(0.0, inference_ms, 0.0, inference_ms),
            success,
            None,
            0,
        )
    }

    #[test]
    fn empty_store_aggregates_to_zeroes() {
        let stats = aggregate(&[]);
        assert_eq!(stats.total_runs, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.avg_fps, 0.0);
        assert!(stats.task_counts.is_empty());
    }

    #[test]
    fn averages_cover_successful_runs_only() {
        let runs = vec![
            run(Task::Detect, true, 20.0),  // fps 50
            run(Task::Detect, true, 10.0),  // fps 100
            run(Task::Segment, false, 0.0), // validation failure, no inference
        ];
        let stats = aggregate(&runs);
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.success_rate, 66.67);
        assert_eq!(stats.avg_fps, 75.0);
        assert_eq!(stats.avg_inference_time_ms, 15.0);
        assert_eq!(stats.task_counts["detect"], 2);
        assert_eq!(stats.task_counts["segment"], 1);
    }
}
