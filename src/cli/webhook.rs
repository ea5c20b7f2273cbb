use std::io::Read;
use std::path::Path;

use crate::config::load_config;
use crate::error::ConnectorError;
use crate::webhook::{sign, WebhookVerifier};

use super::connection::resolve_connection;

/// Where the shared secret comes from: given directly, or a connection's
/// `webhookSecret`.
pub enum SecretSource<'a> {
    Literal(&'a str),
    Connection(&'a str),
}

fn resolve_secret(
    source: SecretSource<'_>,
    config_path: Option<&str>,
) -> Result<String, ConnectorError> {
    match source {
        SecretSource::Literal(secret) => Ok(secret.to_string()),
        SecretSource::Connection(name) => {
            let config = load_config(config_path)?;
            let conn = resolve_connection(name, &config)?;
            conn.webhook_secret.ok_or_else(|| {
                ConnectorError::Validation(format!(
                    "Connection '{name}' has no webhookSecret configured"
                ))
            })
        }
    }
}

/// Read the payload from `file`, or stdin when absent or `-`.
fn read_payload(file: Option<&Path>) -> Result<Vec<u8>, ConnectorError> {
    match file {
        Some(path) if path != Path::new("-") => Ok(std::fs::read(path)?),
        _ => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

pub fn run_webhook_sign(
    secret: SecretSource<'_>,
    file: Option<&Path>,
    timestamp: Option<i64>,
    config_path: Option<&str>,
) -> Result<(), ConnectorError> {
    let secret = resolve_secret(secret, config_path)?;
    let payload = read_payload(file)?;
    let t = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
    println!("{}", sign(&payload, &secret, t)?);
    Ok(())
}

pub fn run_webhook_verify(
    secret: SecretSource<'_>,
    file: Option<&Path>,
    signature: &str,
    config_path: Option<&str>,
) -> Result<(), ConnectorError> {
    let secret = resolve_secret(secret, config_path)?;
    let payload = read_payload(file)?;
    let envelope = WebhookVerifier::new(secret).open(payload, signature)?;
    match envelope.event_type {
        Some(event) => println!("Signature valid ({event})"),
        None => println!("Signature valid"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_secret_needs_no_config() {
        let secret = resolve_secret(SecretSource::Literal("whsec"), None).unwrap();
        assert_eq!(secret, "whsec");
    }

    #[test]
    fn payload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(&path, b"{}").unwrap();
        assert_eq!(read_payload(Some(&path)).unwrap(), b"{}");
    }

    #[test]
    fn missing_payload_file_is_io_error() {
        let err = read_payload(Some(Path::new("/nonexistent/event.json"))).unwrap_err();
        assert!(matches!(err, ConnectorError::IoError(_)));
    }
}
