//! Per-model work items and their outcomes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::{ClassifiedError, ErrorCategory};

/// One model call to make. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelJob {
    pub name: String,
    pub index: usize,
    pub prompt: String,
}

impl ModelJob {
    pub fn new(name: impl Into<String>, index: usize, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index,
            prompt: prompt.into(),
        }
    }

    /// One job per model, indexed in request order, all sharing `prompt`.
    pub fn fan_out(models: &[String], prompt: &str) -> Vec<ModelJob> {
        models
            .iter()
            .enumerate()
            .map(|(index, name)| ModelJob::new(name.clone(), index, prompt))
            .collect()
    }
}

/// Result of one job: either output text or a classified error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOutcome {
    pub job: ModelJob,
    pub output: String,
    pub error: Option<ClassifiedError>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ModelOutcome {
    pub fn success(job: ModelJob, output: String, duration: Duration) -> Self {
        Self {
            job,
            output,
            error: None,
            duration,
        }
    }

    pub fn failure(job: ModelJob, error: ClassifiedError, duration: Duration) -> Self {
        Self {
            job,
            output: String::new(),
            error: Some(error),
            duration,
        }
    }

    /// Outcome for a job that never finished before the run was cancelled.
    pub fn cancelled(job: ModelJob, duration: Duration) -> Self {
        Self::failure(
            job,
            ClassifiedError::new(ErrorCategory::Cancelled, "run cancelled before the call completed"),
            duration,
        )
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        self.error.as_ref().map(|e| e.category)
    }

    pub fn model(&self) -> &str {
        &self.job.name
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_assigns_indices_in_order() {
        let models = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let jobs = ModelJob::fan_out(&models, "prompt");
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[2].name, "c");
        assert_eq!(jobs[2].index, 2);
        assert!(jobs.iter().all(|j| j.prompt == "prompt"));
    }

    #[test]
    fn cancelled_outcome_is_failure() {
        let outcome = ModelOutcome::cancelled(ModelJob::new("m", 0, "p"), Duration::ZERO);
        assert!(!outcome.is_success());
        assert_eq!(outcome.category(), Some(ErrorCategory::Cancelled));
        assert!(outcome.output.is_empty());
    }

    #[test]
    fn outcome_serializes_duration_as_millis() {
        let outcome = ModelOutcome::success(
            ModelJob::new("m", 0, "p"),
            "hi".into(),
            Duration::from_millis(1500),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["duration"], 1500);
        let back: ModelOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
    }
}
