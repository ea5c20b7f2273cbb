use reqwest::Method;
use serde_json::{json, Map, Value};

use crate::ConnectorError;

/// Parse an HTTP method name given on the command line (case-insensitive).
pub fn parse_method(input: &str) -> Result<Method, ConnectorError> {
    match input.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(ConnectorError::Validation(format!(
            "Unsupported HTTP method '{other}': expected GET, POST, PUT, PATCH or DELETE"
        ))),
    }
}

/// Parse CLI arguments into a JSON object.
///
/// Supports `key:value` and `key=value` formats; whichever separator appears
/// first splits the pair. Values are auto-coerced:
/// - Quoted strings have quotes stripped
/// - `true`/`false` become booleans
/// - Valid numbers become JSON numbers
/// - Everything else stays a string
pub fn parse_args(args: &[String]) -> Result<Value, ConnectorError> {
    if args.is_empty() {
        return Ok(json!({}));
    }

    let mut map = Map::new();
    for arg in args {
        let pos = arg.find(|c| c == ':' || c == '=').ok_or_else(|| {
            ConnectorError::Validation(format!(
                "Cannot parse argument '{arg}': expected 'key:value' or 'key=value'"
            ))
        })?;
        let (key, raw_value) = (&arg[..pos], &arg[pos + 1..]);

        if key.is_empty() {
            return Err(ConnectorError::Validation(format!(
                "Empty key in argument '{arg}'"
            )));
        }

        map.insert(key.to_string(), coerce_value(raw_value));
    }

    Ok(Value::Object(map))
}

/// Flatten a parsed argument object into query pairs. Strings are sent as-is,
/// everything else in its JSON form.
pub fn to_query_pairs(args: &Value) -> Vec<(String, String)> {
    let Some(map) = args.as_object() else {
        return Vec::new();
    };
    map.iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Suggest the closest known name by Levenshtein distance (max 2).
/// Returns `None` when nothing is close enough or when two candidates tie.
pub fn suggest_name(input: &str, known: &[&str]) -> Option<String> {
    let scored: Vec<(usize, &str)> = known
        .iter()
        .map(|&name| (strsim::levenshtein(input, name), name))
        .collect();
    let best = scored.iter().map(|(d, _)| *d).min().filter(|d| *d <= 2)?;

    let mut closest = scored.iter().filter(|(d, _)| *d == best);
    match (closest.next(), closest.next()) {
        (Some((_, name)), None) => Some(name.to_string()),
        _ => None,
    }
}

/// Quoted text loses its quotes; booleans, `null`, numbers and inline JSON
/// objects or arrays are typed; anything else is a string.
fn coerce_value(raw: &str) -> Value {
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|&q| raw.strip_prefix(q)?.strip_suffix(q));
    if let Some(inner) = unquoted {
        return Value::String(inner.to_string());
    }

    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if raw == "null" {
        return Value::Null;
    }

    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return Value::Number(n);
    }

    if matches!(raw.as_bytes().first(), Some(b'{' | b'[')) {
        if let Ok(v) = serde_json::from_str::<Value>(raw) {
            return v;
        }
    }

    Value::String(raw.to_string())
}
