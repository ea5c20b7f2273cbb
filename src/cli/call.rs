use reqwest::Method;
use serde_json::Value;

use crate::args::{parse_args, parse_method, to_query_pairs};
use crate::config::load_config;
use crate::error::ConnectorError;
use crate::http::RequestSpec;

use super::connection::{open_connector, persist_token};
use super::output::{is_tty, print_response, resolve_output_mode};

/// Build the request for `call`. Arguments become query parameters for GET
/// and DELETE, and a JSON body otherwise; `--body` replaces the argument
/// body with literal JSON.
pub fn build_request(
    method: Method,
    path: &str,
    args: &[String],
    body: Option<&str>,
) -> Result<RequestSpec, ConnectorError> {
    let parsed = parse_args(args)?;
    let mut spec = RequestSpec::new(method.clone(), path);

    let sends_body = !matches!(method, Method::GET | Method::DELETE);
    if let Some(raw) = body {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ConnectorError::Validation(format!("--body is not valid JSON: {e}")))?;
        for (key, value) in to_query_pairs(&parsed) {
            spec = spec.query(key, value);
        }
        return Ok(spec.json(value));
    }

    if sends_body {
        if parsed.as_object().is_some_and(|m| !m.is_empty()) {
            spec = spec.json(parsed);
        }
    } else {
        for (key, value) in to_query_pairs(&parsed) {
            spec = spec.query(key, value);
        }
    }
    Ok(spec)
}

/// Run the call command.
#[allow(clippy::too_many_arguments)]
pub async fn run_call(
    connection: &str,
    method: &str,
    path: &str,
    args: &[String],
    body: Option<&str>,
    raw: bool,
    json: bool,
    config_path: Option<&str>,
) -> Result<(), ConnectorError> {
    let config = load_config(config_path)?;
    let mode = resolve_output_mode(raw, json);
    let spec = build_request(parse_method(method)?, path, args, body)?;

    let connector = open_connector(connection, &config)?;
    let result = connector.execute(&spec).await;
    persist_token(&connector);

    print_response(&result?, mode, is_tty());
    Ok(())
}
