use std::path::PathBuf;

use clap::{Parser, Subcommand};

use connkit::cli;
use connkit::cli::webhook::SecretSource;

#[derive(Parser)]
#[command(name = "connkit", version, about = "A resilient client for SaaS connector APIs")]
struct Cli {
    /// Config file to load before the default locations
    #[arg(long, global = true, env = "CONNKIT_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue one request through the retrying pipeline
    Call {
        /// Connection name
        connection: String,

        /// HTTP method
        method: String,

        /// Path relative to the connection's base URL
        path: String,

        /// Arguments as key:value; query parameters for GET/DELETE, JSON body otherwise
        args: Vec<String>,

        /// Literal JSON request body
        #[arg(long)]
        body: Option<String>,

        /// Raw output (no formatting)
        #[arg(long)]
        raw: bool,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Stream every item of a paged collection
    #[command(name = "fetch-all")]
    FetchAll {
        /// Connection name
        connection: String,

        /// Collection path
        path: String,

        /// Extra query parameters as key:value
        args: Vec<String>,

        /// Use offset/limit paging instead of cursors
        #[arg(long)]
        offset: bool,

        /// Items requested per page
        #[arg(long)]
        page_size: Option<u32>,

        /// Stop after this many items
        #[arg(long)]
        limit: Option<usize>,

        /// One compact JSON item per line
        #[arg(long)]
        raw: bool,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// Complete the interactive OAuth login for a connection
    Auth {
        /// Connection name
        connection: String,

        /// Login timeout in milliseconds
        #[arg(long, env = "CONNKIT_OAUTH_TIMEOUT_MS")]
        oauth_timeout: Option<u64>,
    },

    /// Run and inspect bulk jobs
    Bulk {
        #[command(subcommand)]
        action: BulkAction,
    },

    /// Sign or verify webhook payloads
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },

    /// Inspect connection configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

impl Commands {
    /// Whether the command was asked for machine-readable output.
    fn json_output(&self) -> bool {
        match self {
            Commands::Call { json, .. } | Commands::FetchAll { json, .. } => *json,
            Commands::Bulk { action } => match action {
                BulkAction::Run { json, .. }
                | BulkAction::Status { json, .. }
                | BulkAction::Abort { json, .. } => *json,
                BulkAction::Results { .. } => false,
            },
            Commands::Auth { .. } | Commands::Webhook { .. } | Commands::Config { .. } => false,
        }
    }
}

#[derive(Subcommand)]
enum BulkAction {
    /// Create a job, upload a CSV file and close it
    Run {
        connection: String,

        /// Target object type
        object: String,

        /// insert, update, upsert, delete or query
        operation: String,

        /// CSV payload
        #[arg(long)]
        file: Option<PathBuf>,

        /// External id field (upsert)
        #[arg(long)]
        external_id_field: Option<String>,

        /// Query text (query jobs)
        #[arg(long)]
        query: Option<String>,

        /// Content type of the uploaded data
        #[arg(long)]
        content_type: Option<String>,

        /// Line ending of the uploaded data (LF or CRLF)
        #[arg(long)]
        line_ending: Option<String>,

        /// Poll until the job finishes
        #[arg(long)]
        wait: bool,

        /// Stop waiting after this many seconds
        #[arg(long)]
        wait_timeout: Option<u64>,

        /// Job collection path
        #[arg(long)]
        base_path: Option<String>,

        #[arg(long)]
        json: bool,
    },
    /// Show a job's current state
    Status {
        connection: String,
        job_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Download a result set of a completed job as CSV
    Results {
        connection: String,
        job_id: String,

        /// successful, failed or unprocessed
        #[arg(long, default_value = "successful")]
        kind: String,
    },
    /// Abort a job that has not finished
    Abort {
        connection: String,
        job_id: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct SecretArgs {
    /// Shared secret
    #[arg(long, env = "CONNKIT_WEBHOOK_SECRET", conflicts_with = "connection")]
    secret: Option<String>,

    /// Take the secret from this connection's webhookSecret
    #[arg(long)]
    connection: Option<String>,
}

impl SecretArgs {
    fn source(&self) -> Result<SecretSource<'_>, connkit::ConnectorError> {
        match (&self.secret, &self.connection) {
            (Some(secret), _) => Ok(SecretSource::Literal(secret)),
            (None, Some(name)) => Ok(SecretSource::Connection(name)),
            (None, None) => Err(connkit::ConnectorError::Validation(
                "Either --secret or --connection is required".into(),
            )),
        }
    }
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Print a signature header for a payload
    Sign {
        #[command(flatten)]
        secret: SecretArgs,

        /// Payload file (stdin when omitted)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Unix timestamp to sign at (now when omitted)
        #[arg(long)]
        timestamp: Option<i64>,
    },
    /// Check a payload against a signature header
    Verify {
        #[command(flatten)]
        secret: SecretArgs,

        /// Payload file (stdin when omitted)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Signature header value (t=...,v1=...)
        #[arg(long)]
        signature: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Display merged config with source annotations
    Show,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CONNKIT_LOG_LEVEL")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = cli.command.json_output();

    let result = run(cli).await;
    if let Err(e) = result {
        cli::output::print_error(&e, json_mode);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), connkit::ConnectorError> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Call {
            connection,
            method,
            path,
            args,
            body,
            raw,
            json,
        } => {
            cli::call::run_call(
                &connection,
                &method,
                &path,
                &args,
                body.as_deref(),
                raw,
                json,
                config,
            )
            .await
        }
        Commands::FetchAll {
            connection,
            path,
            args,
            offset,
            page_size,
            limit,
            raw,
            json,
        } => {
            let opts = cli::fetch::FetchOptions {
                offset,
                page_size,
                limit,
                raw,
                json,
            };
            cli::fetch::run_fetch_all(&connection, &path, &args, &opts, config).await
        }
        Commands::Auth {
            connection,
            oauth_timeout,
        } => {
            let timeout = std::time::Duration::from_millis(oauth_timeout.unwrap_or(120_000));
            cli::auth::run_auth(&connection, timeout, config).await
        }
        Commands::Bulk { action } => match action {
            BulkAction::Run {
                connection,
                object,
                operation,
                file,
                external_id_field,
                query,
                content_type,
                line_ending,
                wait,
                wait_timeout,
                base_path,
                json,
            } => {
                let opts = cli::bulk::RunOptions {
                    object: &object,
                    operation: &operation,
                    file: file.as_deref(),
                    external_id_field,
                    query,
                    content_type,
                    line_ending: line_ending.as_deref(),
                    wait,
                    wait_timeout: wait_timeout.map(std::time::Duration::from_secs),
                    base_path: base_path.as_deref(),
                    json,
                };
                cli::bulk::run_bulk_job(&connection, opts, config).await
            }
            BulkAction::Status {
                connection,
                job_id,
                json,
            } => cli::bulk::run_bulk_status(&connection, &job_id, json, config).await,
            BulkAction::Results {
                connection,
                job_id,
                kind,
            } => cli::bulk::run_bulk_results(&connection, &job_id, &kind, config).await,
            BulkAction::Abort {
                connection,
                job_id,
                json,
            } => cli::bulk::run_bulk_abort(&connection, &job_id, json, config).await,
        },
        Commands::Webhook { action } => match action {
            WebhookAction::Sign {
                secret,
                file,
                timestamp,
            } => cli::webhook::run_webhook_sign(secret.source()?, file.as_deref(), timestamp, config),
            WebhookAction::Verify {
                secret,
                file,
                signature,
            } => cli::webhook::run_webhook_verify(
                secret.source()?,
                file.as_deref(),
                &signature,
                config,
            ),
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => cli::config_cmd::run_config_show(config).await,
        },
    }
}
