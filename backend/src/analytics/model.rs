use std::collections::HashMap;
use std::str::FromStr;

use aws_sdk_dynamodb::types::AttributeValue;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::{AnalyticsReport, Task, TimingBlock};
use uuid::Uuid;

use super::AnalyticsError;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum RunSource {
    Server,
    Client,
}

impl RunSource {
    fn as_str(&self) -> &'static str {
        match self {
            RunSource::Server => "server",
            RunSource::Client => "client",
        }
    }
}

/// One inference run as persisted in the analytics table. Records are
/// append-only; nothing ever mutates them after creation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InferenceRun {
    pub id: String,
    pub timestamp: String,
    pub source: RunSource,
    pub task: Task,
    pub model_path: String,
    pub timing: TimingBlock,
    pub success: bool,
    pub error_message: Option<String>,
    pub image_size_bytes: i64,
}

impl InferenceRun {
    pub fn server(
        task: Task,
        model_path: String,
        timing: TimingBlock,
        success: bool,
        error_message: Option<String>,
        image_size_bytes: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            source: RunSource::Server,
            task,
            model_path,
            timing,
            success,
            error_message,
            image_size_bytes,
        }
    }

    pub fn from_report(report: &AnalyticsReport, model_path: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            source: RunSource::Client,
            task: report.task,
            model_path,
            timing: report.timing,
            success: report.success,
            error_message: None,
            image_size_bytes: 0,
        }
    }

    pub fn to_attributes(&self) -> HashMap<String, AttributeValue> {
        let mut attributes = HashMap::new();
        attributes.insert("id".to_string(), AttributeValue::S(self.id.clone()));
        attributes.insert(
            "timestamp".to_string(),
            AttributeValue::S(self.timestamp.clone()),
        );
        attributes.insert(
            "source".to_string(),
            AttributeValue::S(self.source.as_str().to_string()),
        );
        attributes.insert(
            "task".to_string(),
            AttributeValue::S(self.task.to_string()),
        );
        attributes.insert(
            "model_path".to_string(),
            AttributeValue::S(self.model_path.clone()),
        );
        attributes.insert(
            "inference_time_ms".to_string(),
            AttributeValue::N(self.timing.inference_ms.to_string()),
        );
        attributes.insert(
            "total_time_ms".to_string(),
            AttributeValue::N(self.timing.total_ms.to_string()),
        );
        attributes.insert(
            "fps".to_string(),
            AttributeValue::N(self.timing.fps.to_string()),
        );
        attributes.insert("success".to_string(), AttributeValue::Bool(self.success));
        attributes.insert(
            "image_size_bytes".to_string(),
            AttributeValue::N(self.image_size_bytes.to_string()),
        );
        if let Some(error) = &self.error_message {
            attributes.insert("error_message".to_string(), AttributeValue::S(error.clone()));
        }
        attributes
    }

    pub fn from_attributes(
        attributes: &HashMap<String, AttributeValue>,
    ) -> Result<Self, AnalyticsError> {
        let get_s = |key: &str| -> Result<String, AnalyticsError> {
            attributes
                .get(key)
                .and_then(|av| av.as_s().ok())
                .map(|s| s.to_string())
                .ok_or_else(|| AnalyticsError::MalformedRecord(format!("missing {key}")))
        };
        let get_n = |key: &str| -> f64 {
            attributes
                .get(key)
                .and_then(|av| av.as_n().ok())
                .and_then(|n| n.parse().ok())
                .unwrap_or(0.0)
        };

        let task_str = get_s("task")?;
        let task = Task::from_str(&task_str)
            .map_err(|_| AnalyticsError::MalformedRecord(format!("unknown task {task_str}")))?;
        let source = match get_s("source")?.as_str() {
            "client" => RunSource::Client,
            _ => RunSource::Server,
        };

        Ok(Self {
            id: get_s("id")?,
            timestamp: get_s("timestamp")?,
            source,
            task,
            model_path: get_s("model_path").unwrap_or_default(),
            timing: TimingBlock {
                decode_ms: 0.0,
                inference_ms: get_n("inference_time_ms"),
                process_ms: 0.0,
                total_ms: get_n("total_time_ms"),
                fps: get_n("fps"),
            },
            success: attributes
                .get("success")
                .and_then(|av| av.as_bool().ok())
                .copied()
                .unwrap_or(false),
            error_message: attributes
                .get("error_message")
                .and_then(|av| av.as_s().ok())
                .map(|s| s.to_string()),
            image_size_bytes: get_n("image_size_bytes") as i64,
        })
    }
}
