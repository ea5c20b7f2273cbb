use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConnectorError;

use super::env::expand_connection_config;
use super::types::{ConnectionConfig, ConnkitConfig};

#[derive(Clone, Copy)]
enum Scan {
    Code,
    Str,
    StrEscape,
    LineComment,
    BlockComment,
    BlockStar,
}

/// Remove `//` and `/* */` comments outside string literals. Newlines inside
/// comments are kept so serde error positions still point at the right line.
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut state = Scan::Code;

    while let Some(ch) = chars.next() {
        state = match (state, ch) {
            (Scan::Code, '/') if chars.peek() == Some(&'/') => {
                chars.next();
                Scan::LineComment
            }
            (Scan::Code, '/') if chars.peek() == Some(&'*') => {
                chars.next();
                Scan::BlockComment
            }
            (Scan::Code, c) => {
                out.push(c);
                if c == '"' {
                    Scan::Str
                } else {
                    Scan::Code
                }
            }
            (Scan::Str, c) => {
                out.push(c);
                match c {
                    '\\' => Scan::StrEscape,
                    '"' => Scan::Code,
                    _ => Scan::Str,
                }
            }
            (Scan::StrEscape, c) => {
                out.push(c);
                Scan::Str
            }
            (Scan::LineComment, '\n') => {
                out.push('\n');
                Scan::Code
            }
            (Scan::LineComment, _) => Scan::LineComment,
            (Scan::BlockComment | Scan::BlockStar, '\n') => {
                out.push('\n');
                Scan::BlockComment
            }
            (Scan::BlockComment | Scan::BlockStar, '*') => Scan::BlockStar,
            (Scan::BlockStar, '/') => Scan::Code,
            (Scan::BlockComment | Scan::BlockStar, _) => Scan::BlockComment,
        };
    }

    out
}

/// Discover config files in precedence order (highest first).
///
/// Precedence:
/// 1. `--config` CLI flag
/// 2. `CONNKIT_CONFIG` env var
/// 3. `./config/connkit.json` (project-level)
/// 4. `~/.connkit/connkit.json` or `~/.connkit/connkit.jsonc` (home-level)
pub fn discover_config_files(cli_config: Option<&str>) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut push = |p: PathBuf| {
        if p.exists() && !files.contains(&p) {
            files.push(p);
        }
    };

    if let Some(path) = cli_config {
        push(PathBuf::from(path));
    }
    if let Ok(env_path) = std::env::var("CONNKIT_CONFIG") {
        push(PathBuf::from(env_path));
    }
    push(PathBuf::from("./config/connkit.json"));

    if let Some(home) = dirs::home_dir() {
        let home_json = home.join(".connkit").join("connkit.json");
        if home_json.exists() {
            push(home_json);
        } else {
            push(home.join(".connkit").join("connkit.jsonc"));
        }
    }

    files
}

/// Load a single config file, stripping JSONC comments before parsing.
pub(crate) fn load_config_file(path: &Path) -> Result<ConnkitConfig, ConnectorError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConnectorError::ConfigError {
        path: path.to_path_buf(),
        detail: format!("Cannot read file: {e}"),
    })?;

    let stripped = strip_jsonc_comments(&content);
    serde_json::from_str::<ConnkitConfig>(&stripped).map_err(|e| ConnectorError::ConfigError {
        path: path.to_path_buf(),
        detail: format!("Invalid JSON: {e}"),
    })
}

/// Merge connections from `source` into `target`.
/// Connections already present in `target` are NOT overridden (earlier sources win).
fn merge_connections(
    target: &mut HashMap<String, ConnectionConfig>,
    source: HashMap<String, ConnectionConfig>,
) {
    for (name, config) in source {
        target.entry(name).or_insert(config);
    }
}

/// Load, merge, and expand all configuration.
pub fn load_config(cli_config: Option<&str>) -> Result<ConnkitConfig, ConnectorError> {
    let mut merged: HashMap<String, ConnectionConfig> = HashMap::new();

    for path in discover_config_files(cli_config) {
        let cfg = load_config_file(&path)?;
        merge_connections(&mut merged, cfg.connections);
    }

    for (name, config) in merged.iter_mut() {
        expand_connection_config(config).map_err(|e| match e {
            ConnectorError::ConfigError { detail, .. } => ConnectorError::ConfigError {
                path: PathBuf::from(format!("<connection:{name}>")),
                detail,
            },
            other => other,
        })?;
    }

    tracing::debug!(connections = merged.len(), "Loaded connkit configuration");
    Ok(ConnkitConfig { connections: merged })
}
