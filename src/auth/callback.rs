use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::error::ConnectorError;

/// Wait for the authorization server to redirect the browser back to
/// `127.0.0.1:<port>` and return the authorization code.
///
/// The `state` query parameter must equal `expected_state`.
pub async fn listen_for_callback(
    port: u16,
    expected_state: &str,
    timeout: Duration,
) -> Result<String, ConnectorError> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;

    let accept_future = async {
        let (mut stream, _) = listener.accept().await?;

        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);

        let outcome = parse_callback(&request, expected_state);
        let (status, heading) = match outcome {
            Ok(_) => ("200 OK", "Authentication successful!"),
            Err(_) => ("400 Bad Request", "Authentication failed."),
        };
        let body = format!(
            "<!DOCTYPE html><html><body><h1>{heading}</h1>\
             <p>You can close this window and return to the terminal.</p></body></html>"
        );
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await?;

        outcome
    };

    tokio::time::timeout(timeout, accept_future)
        .await
        .map_err(|_| {
            ConnectorError::auth(format!(
                "Timed out waiting for OAuth callback after {}s",
                timeout.as_secs()
            ))
        })?
}

fn parse_callback(request: &str, expected_state: &str) -> Result<String, ConnectorError> {
    let params = parse_query(request);
    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    if let Some(error) = param("error") {
        let detail = param("error_description").unwrap_or(error);
        return Err(ConnectorError::auth(format!(
            "Authorization denied ({error}): {detail}"
        )));
    }
    if param("state") != Some(expected_state) {
        return Err(ConnectorError::auth(
            "OAuth callback state does not match the request",
        ));
    }
    match param("code") {
        Some(code) if !code.is_empty() => Ok(code.to_string()),
        _ => Err(ConnectorError::auth(
            "No authorization code found in callback request",
        )),
    }
}

/// Query parameters of "GET /callback?code=... HTTP/1.1".
fn parse_query(request: &str) -> Vec<(String, String)> {
    let Some(query) = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|path| path.split_once('?'))
        .map(|(_, q)| q)
    else {
        return Vec::new();
    };

    query
        .split('&')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let v = v.replace('+', " ");
            let v = urlencoding::decode(&v).ok()?.into_owned();
            Some((k.to_string(), v))
        })
        .collect()
}
