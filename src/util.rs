use crate::error::NboError;
use serde::de::DeserializeOwned;

/// Truncate a string at a safe char boundary, appending "..." if truncated.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let end: String = s.chars().take(max_chars).collect();
        format!("{}...", end)
    }
}

/// Replace control characters with spaces and collapse whitespace, so free
/// text returned by an oracle can be parsed as single-line JSON.
pub fn sanitize_json(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse the first JSON object in an oracle response, tolerating code fences
/// and surrounding prose.
pub fn parse_json_object<T: DeserializeOwned>(response: &str) -> Result<T, NboError> {
    let sanitized = sanitize_json(response);
    let trimmed = sanitized.trim();

    let json_str = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    };

    serde_json::from_str(json_str).map_err(|e| {
        NboError::Parse(format!(
            "failed to parse JSON object: {}; response: {}",
            e,
            truncate(response, 200)
        ))
    })
}
