//! Run tracing for language-model calls.
//!
//! Every call opens a [`TraceRun`], which is closed with its outputs or error.
//! Sampled runs go to a [`TraceSink`]. Feedback (human edits, explicit
//! ratings) can then be attached to a run by id. A small in-memory ring keeps
//! the most recent runs for inspection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::config::ObservabilityConfig;

const RECENT_RUN_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    InProgress,
    Ok,
    Error,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::InProgress
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRun {
    pub id: Uuid,
    pub name: String,
    pub run_type: String,
    pub inputs: Value,
    pub outputs: Option<Value>,
    pub error: Option<String>,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub sampled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFeedback {
    pub id: Uuid,
    pub run_id: Uuid,
    pub key: String,
    pub score: Option<f64>,
    pub comment: Option<String>,
    pub correction: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceSinkError {
    #[error("trace transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("trace service answered HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn submit_run(&self, run: &TraceRun) -> Result<(), TraceSinkError>;
    async fn submit_feedback(&self, feedback: &TraceFeedback) -> Result<(), TraceSinkError>;
}

/// Drops everything. Used when observability is disabled.
pub struct NullTraceSink;

#[async_trait]
impl TraceSink for NullTraceSink {
    async fn submit_run(&self, _run: &TraceRun) -> Result<(), TraceSinkError> {
        Ok(())
    }

    async fn submit_feedback(&self, _feedback: &TraceFeedback) -> Result<(), TraceSinkError> {
        Ok(())
    }
}

/// Posts runs and feedback to a LangSmith-compatible HTTP API.
pub struct HttpTraceSink {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    project: String,
}

impl HttpTraceSink {
    pub fn new(endpoint: &str, api_key: &str, project: &str) -> Result<Self, TraceSinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            project: project.to_string(),
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<(), TraceSinkError> {
        let response = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TraceSinkError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl TraceSink for HttpTraceSink {
    async fn submit_run(&self, run: &TraceRun) -> Result<(), TraceSinkError> {
        self.post(
            "/runs",
            json!({
                "id": run.id,
                "name": run.name,
                "run_type": run.run_type,
                "inputs": run.inputs,
                "outputs": run.outputs,
                "error": run.error,
                "start_time": run.start_time,
                "end_time": run.end_time,
                "session_name": self.project,
            }),
        )
        .await
    }

    async fn submit_feedback(&self, feedback: &TraceFeedback) -> Result<(), TraceSinkError> {
        self.post(
            "/feedback",
            json!({
                "id": feedback.id,
                "run_id": feedback.run_id,
                "key": feedback.key,
                "score": feedback.score,
                "comment": feedback.comment,
                "correction": feedback.correction,
            }),
        )
        .await
    }
}

pub struct Tracer {
    sink: Arc<dyn TraceSink>,
    sample_rate: f64,
    recent: RwLock<VecDeque<TraceRun>>,
}

impl Tracer {
    pub fn new(sink: Arc<dyn TraceSink>, sample_rate: f64) -> Self {
        Self {
            sink,
            sample_rate: sample_rate.clamp(0.0, 1.0),
            recent: RwLock::new(VecDeque::with_capacity(RECENT_RUN_CAPACITY)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullTraceSink), 0.0)
    }

    pub fn from_config(config: &ObservabilityConfig) -> Result<Self, TraceSinkError> {
        if !config.enabled || config.api_key.trim().is_empty() {
            return Ok(Self::disabled());
        }
        let sink = HttpTraceSink::new(&config.endpoint, &config.api_key, &config.project)?;
        Ok(Self::new(Arc::new(sink), config.sample_rate))
    }

    pub fn start_run(&self, name: &str, run_type: &str, inputs: Value) -> TraceRun {
        let sampled = if self.sample_rate >= 1.0 {
            true
        } else {
            let sample: f64 = rand::random();
            sample < self.sample_rate
        };
        TraceRun {
            id: Uuid::new_v4(),
            name: name.to_string(),
            run_type: run_type.to_string(),
            inputs,
            outputs: None,
            error: None,
            status: RunStatus::InProgress,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            sampled,
        }
    }

    /// Closes the run, keeps it in the recent ring and submits it when sampled.
    pub async fn end_run(&self, mut run: TraceRun, outcome: Result<Value, String>) -> TraceRun {
        let end_time = Utc::now();
        run.end_time = Some(end_time);
        run.duration_ms = Some((end_time - run.start_time).num_milliseconds().max(0) as u64);
        match outcome {
            Ok(outputs) => {
                run.status = RunStatus::Ok;
                run.outputs = Some(outputs);
            }
            Err(error) => {
                run.status = RunStatus::Error;
                run.error = Some(error);
            }
        }

        {
            let mut recent = self.recent.write().await;
            if recent.len() >= RECENT_RUN_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(run.clone());
        }

        if run.sampled {
            if let Err(e) = self.sink.submit_run(&run).await {
                warn!("Failed to submit trace run {}: {e}", run.id);
            } else {
                debug!("Submitted trace run {} ({})", run.id, run.name);
            }
        }
        run
    }

    pub async fn record_feedback(
        &self,
        run_id: Uuid,
        key: &str,
        score: Option<f64>,
        comment: Option<String>,
        correction: Option<Value>,
    ) -> TraceFeedback {
        let feedback = TraceFeedback {
            id: Uuid::new_v4(),
            run_id,
            key: key.to_string(),
            score,
            comment,
            correction,
            created_at: Utc::now(),
        };
        if let Err(e) = self.sink.submit_feedback(&feedback).await {
            warn!("Failed to submit feedback for run {run_id}: {e}");
        }
        feedback
    }

    pub async fn recent_runs(&self, limit: usize) -> Vec<TraceRun> {
        let recent = self.recent.read().await;
        recent.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_run(&self, run_id: Uuid) -> Option<TraceRun> {
        let recent = self.recent.read().await;
        recent.iter().find(|r| r.id == run_id).cloned()
    }
}
