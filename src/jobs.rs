//! Background job queue for chat commands and scheduled exports.
//!
//! Jobs run one at a time on a single worker. Each job runs in its own task
//! so a panic is reported as `Failed` instead of killing the worker, and the
//! executor is told about it through [`JobExecutor::on_panic`].

use crate::commands::ExportRequest;
use crate::models::CanonicalId;
use crate::periods::ReportKind;
use async_trait::async_trait;
use moka::future::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How long finished job statuses stay queryable.
const STATUS_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// What started a job. Chat-triggered failures are reported back to the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Trigger {
    ChatCommand { chat_id: CanonicalId },
    Schedule,
    Cli,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// A text report for one client, or every client when `client_id` is `None`.
    Report {
        kind: ReportKind,
        client_id: Option<String>,
        trigger: Trigger,
    },
    Export {
        client_id: String,
        chat_id: CanonicalId,
        request: ExportRequest,
    },
    /// Fortnightly delivery of the last 15 days to every client.
    ExportAllClients,
}

impl Job {
    pub fn describe(&self) -> String {
        match self {
            Job::Report { kind, client_id, .. } => format!(
                "report {} for {}",
                kind.as_str(),
                client_id.as_deref().unwrap_or("all clients")
            ),
            Job::Export { client_id, request, .. } => format!(
                "export {} for {}",
                crate::commands::export_command_text(request),
                client_id
            ),
            Job::ExportAllClients => "scheduled export for all clients".to_string(),
        }
    }

    /// Chat that asked for this job, if any.
    pub fn requesting_chat(&self) -> Option<&CanonicalId> {
        match self {
            Job::Report {
                trigger: Trigger::ChatCommand { chat_id },
                ..
            } => Some(chat_id),
            Job::Export { chat_id, .. } => Some(chat_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed { detail: String },
    Failed { error: String },
}

/// Runs jobs taken off the queue. Returns a short summary on success.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(&self, job: Job) -> Result<String, String>;

    /// Called after `execute` panicked on `job`.
    async fn on_panic(&self, _job: &Job, _error: &str) {}
}

#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<(Uuid, Job)>,
    statuses: Cache<Uuid, JobStatus>,
}

impl JobQueue {
    /// Spawns the worker and returns a handle for submitting jobs.
    pub fn start(capacity: usize, executor: Arc<dyn JobExecutor>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<(Uuid, Job)>(capacity.max(1));
        let statuses: Cache<Uuid, JobStatus> = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(STATUS_TTL)
            .build();

        let worker_statuses = statuses.clone();
        tokio::spawn(async move {
            while let Some((id, job)) = receiver.recv().await {
                let description = job.describe();
                tracing::info!("▶️ Job {} started: {}", id, description);
                worker_statuses.insert(id, JobStatus::Running).await;

                let exec = executor.clone();
                let attempt = job.clone();
                let outcome = tokio::spawn(async move { exec.execute(attempt).await }).await;

                let status = match outcome {
                    Ok(Ok(detail)) => {
                        tracing::info!("✅ Job {} completed: {}", id, detail);
                        JobStatus::Completed { detail }
                    }
                    Ok(Err(error)) => {
                        tracing::error!("❌ Job {} failed: {}", id, error);
                        JobStatus::Failed { error }
                    }
                    Err(join_error) => {
                        tracing::error!("💥 Job {} panicked: {}", id, join_error);
                        let error = format!("job panicked: {}", join_error);
                        executor.on_panic(&job, &error).await;
                        JobStatus::Failed { error }
                    }
                };
                worker_statuses.insert(id, status).await;
            }
            tracing::info!("Job worker stopped");
        });

        Self { sender, statuses }
    }

    /// Enqueues a job without waiting. Fails when the queue is full or closed.
    pub async fn submit(&self, job: Job) -> Result<Uuid, String> {
        let id = Uuid::new_v4();
        self.statuses.insert(id, JobStatus::Queued).await;
        let description = job.describe();
        match self.sender.try_send((id, job)) {
            Ok(()) => {
                tracing::debug!("📥 Job {} queued: {}", id, description);
                Ok(id)
            }
            Err(e) => {
                self.statuses.invalidate(&id).await;
                tracing::warn!("Job queue rejected {}: {}", description, e);
                Err(format!("job queue unavailable: {}", e))
            }
        }
    }

    pub async fn status(&self, id: &Uuid) -> Option<JobStatus> {
        self.statuses.get(id).await
    }
}
