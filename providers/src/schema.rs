use crate::error::ProviderError;

/// Extract the first JSON object from model output. Models routinely wrap
/// JSON in markdown fences or surround it with prose; both are handled here
/// so callers can deserialize against an explicit schema.
pub fn extract_json(raw: &str) -> Result<serde_json::Value, ProviderError> {
    let stripped = strip_fences(raw);
    if let Ok(value) = serde_json::from_str(stripped) {
        return Ok(value);
    }

    let start = stripped
        .find('{')
        .ok_or_else(|| ProviderError::InvalidResponse("no JSON object in response".to_string()))?;
    let end = stripped
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| ProviderError::InvalidResponse("unterminated JSON object".to_string()))?;

    serde_json::from_str(&stripped[start..=end])
        .map_err(|e| ProviderError::InvalidResponse(format!("malformed JSON in response: {e}")))
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}
