use crate::errors::ToolError;
use serde_json::Value;

fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Known names within a small edit distance of `input`, closest first.
pub fn closest_names(input: &str, known: &[&str], limit: usize) -> Vec<String> {
    let needle = input.trim().to_lowercase().replace('-', "_");
    if needle.is_empty() {
        return Vec::new();
    }
    let allowed = (needle.len() / 3).max(2);
    let mut scored: Vec<(usize, &str)> = known
        .iter()
        .map(|name| {
            let score = if name.contains(needle.as_str()) || needle.contains(name) {
                1
            } else {
                edit_distance(&needle, name)
            };
            (score, *name)
        })
        .filter(|(score, _)| *score <= allowed)
        .collect();
    scored.sort();
    scored.into_iter().take(limit).map(|(_, n)| n.to_string()).collect()
}

pub fn unknown_action_error(tool: &str, action: Option<&Value>, known_actions: &[&str]) -> ToolError {
    let action = action.and_then(|v| v.as_str()).unwrap_or("");
    let suggestions = closest_names(action, known_actions, 3);
    let mut hint = format!("Use one of: {}.", known_actions.join(", "));
    if !suggestions.is_empty() {
        hint = format!("Did you mean: {}? {}", suggestions.join(", "), hint);
    }
    ToolError::invalid_params(format!("Unknown {} action: {}", tool, action))
        .with_hint(hint)
        .with_details(serde_json::json!({
            "known_actions": known_actions,
            "did_you_mean": suggestions,
        }))
}
