use colored::Colorize;
use serde_json::Value;

use crate::bulk::{BulkJob, JobState};
use crate::error::ConnectorError;
use crate::http::HttpResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Pretty,
    Raw,
    Json,
}

/// Determine the output mode from CLI flags. `--json` wins over `--raw`.
pub fn resolve_output_mode(raw: bool, json: bool) -> OutputMode {
    if json {
        OutputMode::Json
    } else if raw {
        OutputMode::Raw
    } else {
        OutputMode::Pretty
    }
}

pub fn is_tty() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stdout())
}

pub fn print_response(resp: &HttpResponse, mode: OutputMode, is_tty: bool) {
    match mode {
        OutputMode::Json => {
            let body = resp
                .json::<Value>()
                .unwrap_or_else(|_| Value::String(resp.text()));
            let json = serde_json::json!({ "status": resp.status, "body": body });
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        OutputMode::Raw => {
            print!("{}", resp.text());
        }
        OutputMode::Pretty => {
            let status = format!("HTTP {}", resp.status);
            if is_tty {
                println!("{}", status.green().bold());
            } else {
                println!("{status}");
            }
            match resp.json::<Value>() {
                Ok(Value::Null) => {}
                Ok(value) => print_value(&value, OutputMode::Pretty),
                Err(_) => println!("{}", resp.text()),
            }
        }
    }
}

/// Print one JSON value: pretty-printed, or on a single line in raw/json mode
/// so streamed items stay one per line.
pub fn print_value(value: &Value, mode: OutputMode) {
    let text = match mode {
        OutputMode::Pretty => serde_json::to_string_pretty(value),
        OutputMode::Raw | OutputMode::Json => serde_json::to_string(value),
    };
    println!("{}", text.unwrap_or_default());
}

pub fn print_job(job: &BulkJob, mode: OutputMode, is_tty: bool) {
    if mode != OutputMode::Pretty {
        let value = serde_json::to_value(job).unwrap_or(Value::Null);
        print_value(&value, mode);
        return;
    }

    let state = job.state.to_string();
    let state = if !is_tty {
        state
    } else {
        match job.state {
            JobState::JobComplete => state.green().bold().to_string(),
            JobState::Failed | JobState::Aborted => state.red().bold().to_string(),
            _ => state.yellow().to_string(),
        }
    };
    println!("Job {}: {}", job.id, state);
    if let Some(ref object) = job.object {
        println!("  object: {object}");
    }
    println!(
        "  processed: {}, failed: {}",
        job.number_records_processed, job.number_records_failed
    );
    if let Some(ref message) = job.error_message {
        println!("  error: {message}");
    }
}

/// Report a failed command: a JSON error object on stdout in json mode,
/// otherwise `Error: ...` on stderr.
pub fn print_error(err: &ConnectorError, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&err.to_json()).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
    }
}
