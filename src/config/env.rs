use std::path::PathBuf;

use crate::error::ConnectorError;

use super::types::{ConnectionConfig, CredentialsConfig};

/// Expand environment variable references in a string.
///
/// Supported syntaxes:
/// - `${VAR}` - replaced with env var value; error if unset
/// - `${VAR:-fallback}` - replaced with env var value, or fallback if unset or empty
/// - `$env:VAR` - same as `${VAR}`
pub fn expand_env_vars(input: &str) -> Result<String, ConnectorError> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(body) = after.strip_prefix('{') {
            let close = body.find('}').ok_or_else(|| {
                env_error(&format!("Unclosed variable reference: ${{{body}"))
            })?;
            let expr = &body[..close];
            match expr.split_once(":-") {
                Some((name, fallback)) => match std::env::var(name) {
                    Ok(val) if !val.is_empty() => result.push_str(&val),
                    _ => result.push_str(fallback),
                },
                None => result.push_str(&lookup(expr)?),
            }
            rest = &body[close + 1..];
            continue;
        }

        if let Some(body) = after.strip_prefix("env:") {
            let end = body
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(body.len());
            if end == 0 {
                return Err(env_error("Empty variable name in $env: reference"));
            }
            result.push_str(&lookup(&body[..end])?);
            rest = &body[end..];
            continue;
        }

        // Not a recognized pattern, keep the '$' literally
        result.push('$');
        rest = after;
    }

    result.push_str(rest);
    Ok(result)
}

fn lookup(name: &str) -> Result<String, ConnectorError> {
    std::env::var(name)
        .map_err(|_| env_error(&format!("Environment variable '{name}' is not set")))
}

fn env_error(detail: &str) -> ConnectorError {
    ConnectorError::ConfigError {
        path: PathBuf::from("<env>"),
        detail: detail.to_string(),
    }
}

fn expand_in_place(value: &mut String) -> Result<(), ConnectorError> {
    *value = expand_env_vars(value)?;
    Ok(())
}

fn expand_optional(value: &mut Option<String>) -> Result<(), ConnectorError> {
    if let Some(v) = value {
        expand_in_place(v)?;
    }
    Ok(())
}

/// Expand environment variables in every string field of a connection,
/// including the credential material.
pub fn expand_connection_config(config: &mut ConnectionConfig) -> Result<(), ConnectorError> {
    expand_in_place(&mut config.base_url)?;
    expand_optional(&mut config.token_url)?;
    expand_optional(&mut config.authorize_url)?;
    expand_optional(&mut config.webhook_secret)?;
    for value in config.headers.values_mut() {
        expand_in_place(value)?;
    }

    match &mut config.credentials {
        CredentialsConfig::ApiKey { key, .. } => expand_in_place(key)?,
        CredentialsConfig::Oauth {
            client_id,
            client_secret,
            redirect_uri,
            authorization_code,
            code_verifier,
            refresh_token,
            ..
        } => {
            expand_in_place(client_id)?;
            expand_optional(client_secret)?;
            expand_in_place(redirect_uri)?;
            expand_optional(authorization_code)?;
            expand_optional(code_verifier)?;
            expand_optional(refresh_token)?;
        }
        CredentialsConfig::Password {
            username,
            password,
            security_token,
            client_id,
            client_secret,
        } => {
            expand_in_place(username)?;
            expand_in_place(password)?;
            expand_optional(security_token)?;
            expand_in_place(client_id)?;
            expand_optional(client_secret)?;
        }
        CredentialsConfig::Jwt {
            private_key,
            subject,
            client_id,
            audience,
        } => {
            expand_in_place(private_key)?;
            expand_in_place(subject)?;
            expand_in_place(client_id)?;
            expand_optional(audience)?;
        }
    }
    Ok(())
}
