use colored::Colorize;
use serde_json::Value;

/// Render a `{ok, data | error}` response. With `raw_json` the response
/// data is printed as compact JSON for piping.
pub fn format_response(response: &Value, raw_json: bool) -> String {
    let ok = response.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !ok {
        let error = response
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        if raw_json {
            return response.to_string();
        }
        return format!("{} {}", "Error:".red().bold(), error.red());
    }

    let Some(data) = response.get("data") else {
        return "ok".green().to_string();
    };
    if raw_json {
        return data.to_string();
    }
    format_value(data)
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Array(items) if items.is_empty() => "(empty)".dimmed().to_string(),
        // One sorted value per line.
        Value::Array(items) => items
            .iter()
            .map(|item| colorize(&item.to_string(), false))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::String(s) => s.green().to_string(),
        Value::Object(_) => {
            let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            pretty
                .lines()
                .map(|line| colorize_line(line))
                .collect::<Vec<_>>()
                .join("\n")
        }
        other => colorize(&other.to_string(), false),
    }
}

/// Colour one line of pretty-printed JSON: `"key": value,`.
fn colorize_line(line: &str) -> String {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];
    match split_key(trimmed) {
        Some((key, rest)) => format!(
            "{indent}{}{}{}",
            key.blue().bold(),
            ":".dimmed(),
            colorize(rest, true)
        ),
        None => format!("{indent}{}", colorize(trimmed, true)),
    }
}

/// Split `"key": rest` at the colon that closes the key string.
fn split_key(line: &str) -> Option<(&str, &str)> {
    let body = line.strip_prefix('"')?;
    let mut escaped = false;
    for (i, ch) in body.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => {
                let key_end = i + 2;
                let rest = line[key_end..].strip_prefix(':')?;
                return Some((&line[..key_end], rest));
            }
            _ => escaped = false,
        }
    }
    None
}

/// Colour a scalar (or structural token), keeping a trailing comma plain.
fn colorize(token: &str, keep_comma: bool) -> String {
    let (body, comma) = match token.strip_suffix(',') {
        Some(body) if keep_comma => (body, ","),
        _ => (token, ""),
    };
    let lead = &body[..body.len() - body.trim_start().len()];
    let body = body.trim_start();
    let painted = match body {
        "true" | "false" => body.yellow().to_string(),
        "null" => body.dimmed().to_string(),
        _ if body.starts_with('"') => body.green().to_string(),
        _ if body.parse::<f64>().is_ok() => body.cyan().to_string(),
        _ => body.to_string(),
    };
    format!("{lead}{painted}{comma}")
}
