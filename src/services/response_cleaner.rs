//! Text transforms applied to raw generation output before validation.
//!
//! Both cleaners are heuristics. A backend that wraps its answer in code
//! fences or trails it with prose is handled; anything more creative is not.

const FENCE: &str = "```";

/// Strip code-fence lines from generated SQL.
///
/// Non-fence lines are kept as written, so fenced output cleans back to the
/// exact unfenced text.
pub fn clean_sql(raw: &str) -> String {
    let kept: Vec<&str> = raw
        .lines()
        .filter(|line| !line.trim().starts_with(FENCE))
        .map(|line| line.strip_suffix(FENCE).unwrap_or(line))
        .collect();

    let first = kept.iter().position(|line| !line.trim().is_empty());
    let last = kept.iter().rposition(|line| !line.trim().is_empty());
    match (first, last) {
        (Some(first), Some(last)) => kept[first..=last].join("\n").trim().to_string(),
        _ => String::new(),
    }
}

/// Reduce generated output to the JSON envelope for a document store.
///
/// Drops fences and any preamble before the first `{`, then cuts at the
/// first line starting with "note" or "however".
pub fn clean_document(raw: &str) -> String {
    let mut text = raw.trim();
    text = text.strip_prefix("```json").unwrap_or(text);
    text = text.strip_prefix(FENCE).unwrap_or(text);
    text = text.strip_suffix(FENCE).unwrap_or(text);
    text = text.trim();

    if let Some(start) = text.find('{') {
        text = &text[start..];
    }

    let mut kept = Vec::new();
    for line in text.lines() {
        let lowered = line.trim_start().to_lowercase();
        if lowered.starts_with("note") || lowered.starts_with("however") {
            break;
        }
        kept.push(line);
    }
    kept.join("\n").trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_sql_round_trip() {
        let original = "SELECT name, age\n  FROM students\n WHERE age > 20";
        let fenced = format!("```sql\n{}\n```", original);
        assert_eq!(clean_sql(&fenced), original);

        let fenced = format!("\n\n```\n{}\n```\n\n", original);
        assert_eq!(clean_sql(&fenced), original);
    }

    #[test]
    fn test_clean_sql_unfenced_is_trimmed() {
        assert_eq!(clean_sql("  SELECT 1;  \n"), "SELECT 1;");
        assert_eq!(clean_sql("```\n```"), "");
    }

    #[test]
    fn test_clean_sql_trailing_fence_on_statement_line() {
        assert_eq!(clean_sql("```sql\nSELECT 1```"), "SELECT 1");
    }

    #[test]
    fn test_clean_document_round_trip() {
        let original = "{\"operation\":\"find\",\"collection\":\"courses\",\"filter\":{}}";
        let fenced = format!("```json\n{}\n```", original);
        assert_eq!(clean_document(&fenced), original);
    }

    #[test]
    fn test_clean_document_drops_preamble_and_commentary() {
        let raw = "Here is the query:\n{\n  \"operation\": \"find\",\n  \"collection\": \"courses\",\n  \"filter\": {}\n}\nNote: this returns every course.\nMore prose";
        let cleaned = clean_document(raw);
        assert!(cleaned.starts_with('{'));
        assert!(cleaned.ends_with('}'));
        assert!(!cleaned.contains("Note"));
        let parsed: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(parsed["collection"], "courses");
    }

    #[test]
    fn test_clean_document_however_is_case_insensitive() {
        let raw = "{\"operation\":\"find\",\"collection\":\"c\",\"filter\":{}}\n  HOWEVER you might prefer";
        assert_eq!(
            clean_document(raw),
            "{\"operation\":\"find\",\"collection\":\"c\",\"filter\":{}}"
        );
    }
}
