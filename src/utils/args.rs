use crate::errors::ToolError;
use serde_json::Value;

pub fn read_positive_int(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    if let Some(n) = value.as_i64() {
        if n > 0 {
            return Some(n as u64);
        }
    }
    if let Some(text) = value.as_str() {
        if let Ok(parsed) = text.trim().parse::<u64>() {
            if parsed > 0 {
                return Some(parsed);
            }
        }
    }
    None
}

pub fn read_optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

pub fn read_required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    read_optional_str(args, key)
        .ok_or_else(|| ToolError::invalid_params(format!("{} must be a non-empty string", key)))
}

/// Booleans also accept the usual string spellings.
pub fn read_bool(args: &Value, key: &str, fallback: bool) -> bool {
    match args.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => true,
            "0" | "false" | "no" | "n" | "off" => false,
            _ => fallback,
        },
        _ => fallback,
    }
}

/// A single string is accepted where a list is expected. Entries keep their
/// whitespace; only empty entries are rejected.
pub fn read_string_list(args: &Value, key: &str) -> Result<Option<Vec<String>>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ToolError::invalid_params(format!("{} must contain only strings", key))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(ToolError::invalid_params(format!(
            "{} must be a string or an array of strings",
            key
        ))),
    }
}
