use serde_json::Value;
use tokio_stream::StreamExt;

use crate::args::{parse_args, to_query_pairs};
use crate::config::load_config;
use crate::error::ConnectorError;
use crate::http::RequestSpec;
use crate::paginate::{PageConvention, DEFAULT_PAGE_SIZE};

use super::connection::{open_connector, persist_token};
use super::output::{print_value, resolve_output_mode, OutputMode};

pub struct FetchOptions {
    pub offset: bool,
    pub page_size: Option<u32>,
    /// Stop after this many items.
    pub limit: Option<usize>,
    pub raw: bool,
    pub json: bool,
}

/// Stream every item of a paged collection, one per line in raw/json mode.
pub async fn run_fetch_all(
    connection: &str,
    path: &str,
    args: &[String],
    opts: &FetchOptions,
    config_path: Option<&str>,
) -> Result<(), ConnectorError> {
    let config = load_config(config_path)?;
    let mode = resolve_output_mode(opts.raw, opts.json);
    let convention = if opts.offset {
        PageConvention::Offset
    } else {
        PageConvention::Cursor
    };

    let mut query = RequestSpec::get(path);
    for (key, value) in to_query_pairs(&parse_args(args)?) {
        query = query.query(key, value);
    }

    let connector = open_connector(connection, &config)?;
    let paginator = connector
        .paginator(convention)
        .with_page_size(opts.page_size.unwrap_or(DEFAULT_PAGE_SIZE));

    let items = paginator
        .fetch_all::<Value>(query)
        .take(opts.limit.unwrap_or(usize::MAX));
    tokio::pin!(items);

    let mut count = 0usize;
    let mut outcome = Ok(());
    while let Some(item) = items.next().await {
        match item {
            Ok(value) => {
                print_value(&value, mode);
                count += 1;
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    persist_token(&connector);

    if mode == OutputMode::Pretty && outcome.is_ok() {
        eprintln!("{count} item(s)");
    }
    outcome
}
