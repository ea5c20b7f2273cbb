//! Asynchronous bulk job orchestration.
//!
//! Lifecycle: `Open → UploadComplete → InProgress → JobComplete`, with
//! `Aborted` reachable from any non-terminal state and `Failed` reported by
//! the provider. States only ever come from provider responses.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectorError;
use crate::http::{RequestPipeline, RequestSpec};

pub const DEFAULT_BASE_PATH: &str = "/jobs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Open,
    UploadComplete,
    InProgress,
    JobComplete,
    Aborted,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Open => "Open",
            JobState::UploadComplete => "UploadComplete",
            JobState::InProgress => "InProgress",
            JobState::JobComplete => "JobComplete",
            JobState::Aborted => "Aborted",
            JobState::Failed => "Failed",
            JobState::Unknown => "Unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::JobComplete | JobState::Aborted | JobState::Failed
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOperation {
    Insert,
    Update,
    Upsert,
    Delete,
    Query,
}

impl FromStr for BulkOperation {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(BulkOperation::Insert),
            "update" => Ok(BulkOperation::Update),
            "upsert" => Ok(BulkOperation::Upsert),
            "delete" => Ok(BulkOperation::Delete),
            "query" => Ok(BulkOperation::Query),
            other => Err(ConnectorError::Validation(format!(
                "Unknown bulk operation '{other}'. Expected insert, update, upsert, delete or query"
            ))),
        }
    }
}

/// Which result set of a completed job to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    SuccessfulResults,
    FailedResults,
    UnprocessedRecords,
}

impl ResultKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            ResultKind::SuccessfulResults => "successfulResults",
            ResultKind::FailedResults => "failedResults",
            ResultKind::UnprocessedRecords => "unprocessedRecords",
        }
    }
}

impl FromStr for ResultKind {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "successfulResults" | "successful" | "success" => Ok(ResultKind::SuccessfulResults),
            "failedResults" | "failed" => Ok(ResultKind::FailedResults),
            "unprocessedRecords" | "unprocessed" => Ok(ResultKind::UnprocessedRecords),
            other => Err(ConnectorError::Validation(format!(
                "Unknown result kind '{other}'. Expected successful, failed or unprocessed"
            ))),
        }
    }
}

/// Line terminator used in uploaded CSV data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LineEnding {
    #[default]
    Lf,
    Crlf,
}

impl FromStr for LineEnding {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LF" => Ok(LineEnding::Lf),
            "CRLF" => Ok(LineEnding::Crlf),
            other => Err(ConnectorError::Validation(format!(
                "Unknown line ending '{other}'. Expected LF or CRLF"
            ))),
        }
    }
}

pub const DEFAULT_CONTENT_TYPE: &str = "CSV";

#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Required for upsert.
    pub external_id_field: Option<String>,
    /// Required for query jobs.
    pub query: Option<String>,
    pub content_type: String,
    pub line_ending: LineEnding,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            external_id_field: None,
            query: None,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            line_ending: LineEnding::default(),
        }
    }
}

/// Job descriptor as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkJob {
    pub id: String,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub operation: Option<BulkOperation>,
    pub state: JobState,
    #[serde(default)]
    pub number_records_processed: u64,
    #[serde(default)]
    pub number_records_failed: u64,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobRequest<'a> {
    object: &'a str,
    operation: BulkOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id_field_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    content_type: &'a str,
    line_ending: LineEnding,
}

/// Poll interval schedule for [`BulkJobOrchestrator::poll_until_terminal`].
#[derive(Debug, Clone)]
pub struct PollBackoff {
    pub initial: Duration,
    pub max: Duration,
    /// Give up after this long; `None` polls until a terminal state.
    pub deadline: Option<Duration>,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            deadline: None,
        }
    }
}

impl PollBackoff {
    pub fn interval(&self, poll: u32) -> Duration {
        let factor = 2u32.checked_pow(poll).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

pub struct BulkJobOrchestrator {
    pipeline: Arc<RequestPipeline>,
    base_path: String,
    /// Last provider-reported state per job.
    observed: Mutex<HashMap<String, JobState>>,
}

impl std::fmt::Debug for BulkJobOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkJobOrchestrator")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

impl BulkJobOrchestrator {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self {
            pipeline,
            base_path: DEFAULT_BASE_PATH.to_string(),
            observed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = format!("/{}", base_path.trim_matches('/'));
        self
    }

    /// Last state the provider reported for `job_id`, if any.
    pub fn observed_state(&self, job_id: &str) -> Option<JobState> {
        let observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
        observed.get(job_id).copied()
    }

    /// Drop the tracked state for `job_id` once the caller is done with it.
    /// Later calls treat the job as unseen and ask the provider again.
    pub fn forget(&self, job_id: &str) -> Option<JobState> {
        let mut observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
        observed.remove(job_id)
    }

    /// Number of jobs whose state is currently tracked.
    pub fn tracked_jobs(&self) -> usize {
        let observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
        observed.len()
    }

    pub async fn create(
        &self,
        object: &str,
        operation: BulkOperation,
        options: &JobOptions,
    ) -> Result<BulkJob, ConnectorError> {
        validate_create(object, operation, options)?;
        let body = CreateJobRequest {
            object,
            operation,
            external_id_field_name: options.external_id_field.as_deref(),
            query: options.query.as_deref(),
            content_type: &options.content_type,
            line_ending: options.line_ending,
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| ConnectorError::Validation(format!("Cannot encode job request: {e}")))?;
        let job: BulkJob = self
            .pipeline
            .execute_json(&RequestSpec::post(self.base_path.clone()).json(body))
            .await?;
        tracing::info!(job_id = %job.id, object, state = %job.state, "Created bulk job");
        self.record(&job);
        Ok(job)
    }

    /// Upload one CSV chunk. May be repeated while the job is `Open`.
    pub async fn upload(&self, job_id: &str, csv: impl Into<Vec<u8>>) -> Result<(), ConnectorError> {
        self.require_known(job_id, "upload data to", |s| s == JobState::Open)?;
        let spec = RequestSpec::put(format!("{}/data", self.job_path(job_id)?))
            .bytes("text/csv", csv);
        self.pipeline.execute(&spec).await?;
        tracing::debug!(job_id, "Uploaded bulk job data");
        Ok(())
    }

    /// Mark upload complete so the provider starts processing.
    pub async fn close(&self, job_id: &str) -> Result<BulkJob, ConnectorError> {
        self.require_known(job_id, "close", |s| s == JobState::Open)?;
        self.set_state(job_id, JobState::UploadComplete).await
    }

    pub async fn poll(&self, job_id: &str) -> Result<BulkJob, ConnectorError> {
        let job: BulkJob = self
            .pipeline
            .execute_json(&RequestSpec::get(self.job_path(job_id)?))
            .await?;
        self.record(&job);
        Ok(job)
    }

    /// Request cancellation. Rejected once the job is known to be terminal.
    pub async fn abort(&self, job_id: &str) -> Result<BulkJob, ConnectorError> {
        self.require_known(job_id, "abort", |s| !s.is_terminal())?;
        self.set_state(job_id, JobState::Aborted).await
    }

    /// Download a result set as raw CSV. Only valid once the provider has
    /// reported `JobComplete`.
    pub async fn fetch_results(
        &self,
        job_id: &str,
        kind: ResultKind,
    ) -> Result<String, ConnectorError> {
        let state = match self.observed_state(job_id) {
            Some(state) => state,
            None => self.poll(job_id).await?.state,
        };
        if state != JobState::JobComplete {
            return Err(invalid_state(job_id, "fetch results for", state));
        }
        let spec = RequestSpec::get(format!("{}/{}", self.job_path(job_id)?, kind.path_segment()))
            .header("Accept", "text/csv");
        let resp = self.pipeline.execute(&spec).await?;
        Ok(resp.text())
    }

    /// Poll with exponential intervals until the provider reports a terminal
    /// state, the deadline passes, or `cancel` fires.
    pub async fn poll_until_terminal(
        &self,
        job_id: &str,
        backoff: &PollBackoff,
        cancel: &CancellationToken,
    ) -> Result<BulkJob, ConnectorError> {
        let started = tokio::time::Instant::now();
        let mut polls = 0u32;
        loop {
            let job = self.poll(job_id).await?;
            if job.state.is_terminal() {
                return Ok(job);
            }
            if let Some(deadline) = backoff.deadline {
                if started.elapsed() >= deadline {
                    return Err(ConnectorError::Transient {
                        reason: crate::error::TransientReason::Timeout,
                        status: None,
                        message: format!(
                            "Job {job_id} still {} after {}s",
                            job.state,
                            deadline.as_secs()
                        ),
                        retry_after: None,
                    });
                }
            }
            let wait = backoff.interval(polls);
            polls += 1;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn set_state(&self, job_id: &str, state: JobState) -> Result<BulkJob, ConnectorError> {
        let spec = RequestSpec::patch(self.job_path(job_id)?).json(json!({ "state": state }));
        let job: BulkJob = self.pipeline.execute_json(&spec).await?;
        self.record(&job);
        Ok(job)
    }

    fn record(&self, job: &BulkJob) {
        let mut observed = self.observed.lock().unwrap_or_else(|e| e.into_inner());
        let previous = observed.insert(job.id.clone(), job.state);
        if previous != Some(job.state) {
            tracing::info!(
                job_id = %job.id,
                state = %job.state,
                processed = job.number_records_processed,
                failed = job.number_records_failed,
                "Bulk job state changed"
            );
        }
    }

    /// Jobs never observed pass; the provider is left to reject them.
    fn require_known(
        &self,
        job_id: &str,
        operation: &'static str,
        allowed: impl Fn(JobState) -> bool,
    ) -> Result<(), ConnectorError> {
        match self.observed_state(job_id) {
            Some(state) if !allowed(state) => Err(invalid_state(job_id, operation, state)),
            _ => Ok(()),
        }
    }

    fn job_path(&self, job_id: &str) -> Result<String, ConnectorError> {
        if job_id.trim().is_empty() {
            return Err(ConnectorError::Validation("Job id must not be empty".into()));
        }
        Ok(format!("{}/{}", self.base_path, urlencoding::encode(job_id)))
    }
}

fn invalid_state(job_id: &str, operation: &'static str, state: JobState) -> ConnectorError {
    ConnectorError::InvalidState {
        job_id: job_id.to_string(),
        operation,
        state: state.to_string(),
    }
}

fn validate_create(
    object: &str,
    operation: BulkOperation,
    options: &JobOptions,
) -> Result<(), ConnectorError> {
    if object.trim().is_empty() {
        return Err(ConnectorError::Validation(
            "Bulk job object type must not be empty".into(),
        ));
    }
    let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
    if operation == BulkOperation::Upsert && blank(&options.external_id_field) {
        return Err(ConnectorError::Validation(
            "Upsert jobs require an external id field".into(),
        ));
    }
    if options.content_type.trim().is_empty() {
        return Err(ConnectorError::Validation(
            "Bulk job content type must not be empty".into(),
        ));
    }
    if operation == BulkOperation::Query && blank(&options.query) {
        return Err(ConnectorError::Validation(
            "Query jobs require query text".into(),
        ));
    }
    Ok(())
}
