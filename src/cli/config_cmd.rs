use std::collections::HashMap;
use std::path::PathBuf;

use colored::Colorize;

use crate::config::loader::{discover_config_files, load_config, strip_jsonc_comments};
use crate::config::{AnnotatedConnectionConfig, ConnkitConfig};
use crate::error::ConnectorError;

use super::output::is_tty;

/// Load configs with source annotations.
///
/// Walks the discovered config files in precedence order and records, for each
/// connection name, the first file it appeared in. The merged config from
/// `load_config` is authoritative for the values (env expansion), but the
/// per-file walk is needed to map connection -> source.
pub fn load_annotated(
    cli_config: Option<&str>,
) -> Result<Vec<AnnotatedConnectionConfig>, ConnectorError> {
    let mut source_map: HashMap<String, PathBuf> = HashMap::new();
    for path in discover_config_files(cli_config) {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(cfg) = serde_json::from_str::<ConnkitConfig>(&strip_jsonc_comments(&content))
        else {
            continue;
        };
        for name in cfg.connections.into_keys() {
            source_map.entry(name).or_insert_with(|| path.clone());
        }
    }

    let merged = load_config(cli_config)?;

    let mut entries: Vec<AnnotatedConnectionConfig> = merged
        .connections
        .into_iter()
        .map(|(name, config)| {
            let source = source_map
                .get(&name)
                .cloned()
                .unwrap_or_else(|| PathBuf::from("<unknown>"));
            AnnotatedConnectionConfig {
                name,
                config,
                source,
            }
        })
        .collect();

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Display merged configuration with source annotations. Secrets are never
/// printed.
pub async fn run_config_show(cli_config: Option<&str>) -> Result<(), ConnectorError> {
    let entries = load_annotated(cli_config)?;
    let is_tty = is_tty();

    if entries.is_empty() {
        println!("No connections configured.");
        return Ok(());
    }

    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print_entry(entry, is_tty);
    }

    Ok(())
}

fn label(text: &str, is_tty: bool) -> String {
    if is_tty {
        text.dimmed().to_string()
    } else {
        text.to_string()
    }
}

fn print_entry(entry: &AnnotatedConnectionConfig, is_tty: bool) {
    let name = if is_tty {
        entry.name.bold().cyan().to_string()
    } else {
        entry.name.clone()
    };
    println!("{}", name);

    let config = &entry.config;
    println!("  {}: {}", label("Base URL", is_tty), config.base_url);
    println!(
        "  {}: {}",
        label("Auth", is_tty),
        config.credentials.flow_name()
    );

    if let Some(ref desc) = config.description {
        println!("  {}: {}", label("Description", is_tty), desc);
    }

    let timeout = match config.timeout_ms {
        Some(ms) => format!("{ms} ms"),
        None => "30000 ms (default)".to_string(),
    };
    println!("  {}: {}", label("Timeout", is_tty), timeout);

    let retries = match config.max_retries {
        Some(n) => n.to_string(),
        None => "3 (default)".to_string(),
    };
    println!("  {}: {}", label("Max retries", is_tty), retries);

    let webhook = if config.webhook_secret.is_some() {
        "configured"
    } else {
        "none"
    };
    println!("  {}: {}", label("Webhook secret", is_tty), webhook);

    println!("  {}: {}", label("Source", is_tty), entry.source.display());
}
