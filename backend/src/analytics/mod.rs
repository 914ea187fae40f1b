pub mod model;
pub mod service;

pub use model::{InferenceRun, RunSource};
pub use service::{AnalyticsError, AnalyticsService, AnalyticsStats};
