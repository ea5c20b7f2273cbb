use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::bulk::{
    BulkJob, BulkOperation, JobOptions, LineEnding, PollBackoff, ResultKind, DEFAULT_CONTENT_TYPE,
};
use crate::config::load_config;
use crate::connector::Connector;
use crate::error::ConnectorError;

use super::connection::{open_connector_at, persist_token};
use super::output::{is_tty, print_job, resolve_output_mode, OutputMode};

pub struct RunOptions<'a> {
    pub object: &'a str,
    pub operation: &'a str,
    /// CSV payload for ingest jobs.
    pub file: Option<&'a Path>,
    pub external_id_field: Option<String>,
    pub query: Option<String>,
    /// Provider content type; CSV when unset.
    pub content_type: Option<String>,
    /// `LF` or `CRLF`; LF when unset.
    pub line_ending: Option<&'a str>,
    /// Poll until the job reaches a terminal state.
    pub wait: bool,
    /// Give up waiting after this long.
    pub wait_timeout: Option<Duration>,
    pub base_path: Option<&'a str>,
    pub json: bool,
}

fn connect(
    connection: &str,
    base_path: Option<&str>,
    config_path: Option<&str>,
) -> Result<Connector, ConnectorError> {
    let config = load_config(config_path)?;
    open_connector_at(connection, &config, base_path)
}

/// Create a job, upload the CSV file and close it; with `wait`, poll until
/// the provider reports a terminal state. Ctrl-C stops waiting.
pub async fn run_bulk_job(
    connection: &str,
    opts: RunOptions<'_>,
    config_path: Option<&str>,
) -> Result<(), ConnectorError> {
    let operation: BulkOperation = opts.operation.parse()?;
    let line_ending = opts
        .line_ending
        .map(str::parse::<LineEnding>)
        .transpose()?
        .unwrap_or_default();
    let mode = resolve_output_mode(false, opts.json);

    let csv = match (operation, opts.file) {
        (BulkOperation::Query, _) => None,
        (_, Some(path)) => Some(std::fs::read(path)?),
        (_, None) => {
            return Err(ConnectorError::Validation(format!(
                "A CSV --file is required for {} jobs",
                opts.operation
            )))
        }
    };

    let connector = connect(connection, opts.base_path, config_path)?;
    let bulk = connector.bulk();
    let job_options = JobOptions {
        external_id_field: opts.external_id_field,
        query: opts.query,
        content_type: opts
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        line_ending,
    };

    let result: Result<BulkJob, ConnectorError> = async {
        let mut job = bulk.create(opts.object, operation, &job_options).await?;
        if let Some(csv) = csv {
            bulk.upload(&job.id, csv).await?;
            job = bulk.close(&job.id).await?;
        }
        if !opts.wait {
            return Ok(job);
        }

        let cancel = CancellationToken::new();
        let on_ctrl_c = cancel.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_ctrl_c.cancel();
            }
        });
        let backoff = PollBackoff {
            deadline: opts.wait_timeout,
            ..PollBackoff::default()
        };
        let outcome = bulk.poll_until_terminal(&job.id, &backoff, &cancel).await;
        watcher.abort();
        outcome
    }
    .await;
    persist_token(&connector);

    print_job(&result?, mode, is_tty());
    Ok(())
}

pub async fn run_bulk_status(
    connection: &str,
    job_id: &str,
    json: bool,
    config_path: Option<&str>,
) -> Result<(), ConnectorError> {
    let connector = connect(connection, None, config_path)?;
    let job = connector.bulk().poll(job_id).await;
    persist_token(&connector);
    print_job(&job?, resolve_output_mode(false, json), is_tty());
    Ok(())
}

/// Print a result set of a completed job as CSV.
pub async fn run_bulk_results(
    connection: &str,
    job_id: &str,
    kind: &str,
    config_path: Option<&str>,
) -> Result<(), ConnectorError> {
    let kind: ResultKind = kind.parse()?;
    let connector = connect(connection, None, config_path)?;
    let csv = connector.bulk().fetch_results(job_id, kind).await;
    persist_token(&connector);
    print!("{}", csv?);
    Ok(())
}

/// Abort a job. The job is polled first so a terminal job is refused
/// without sending the abort.
pub async fn run_bulk_abort(
    connection: &str,
    job_id: &str,
    json: bool,
    config_path: Option<&str>,
) -> Result<(), ConnectorError> {
    let connector = connect(connection, None, config_path)?;
    let bulk = connector.bulk();
    let result: Result<BulkJob, ConnectorError> = async {
        bulk.poll(job_id).await?;
        bulk.abort(job_id).await
    }
    .await;
    persist_token(&connector);

    let mode = resolve_output_mode(false, json);
    let job = result?;
    if mode == OutputMode::Pretty {
        println!("Abort requested for job {}", job.id);
    }
    print_job(&job, mode, is_tty());
    Ok(())
}
