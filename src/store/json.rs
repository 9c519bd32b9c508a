//! Contextual JSON decoding for hand-edited state files.

use anyhow::Result;

/// Width of the excerpt shown around a decode error.
const SNIPPET_WIDTH: usize = 24;

/// Decode `body`, and on failure describe where it went wrong: the field path,
/// a short "expected X, got Y" summary, and an excerpt of the offending line.
pub fn parse_json_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let raw = inner.to_string();
        let location = format!(" at line {line} column {column}");
        let summary = summarize(raw.strip_suffix(&location).unwrap_or(&raw));
        let snippet = excerpt(body, line, column, SNIPPET_WIDTH);

        let mut message = String::new();
        if !path.is_empty() && path != "." {
            message.push_str(&format!("field '{path}': "));
        }
        message.push_str(&format!("{summary} (line {line} col {column})\n{snippet}"));
        anyhow::anyhow!(message)
    })
}

/// Rephrase serde's "invalid type: X, expected Y" as "expected Y, got X".
fn summarize(message: &str) -> String {
    if let Some(rest) = message.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {}, got {actual}", expected.trim());
    }
    message.to_string()
}

/// The characters around `column` on `line`, with a caret under the error.
fn excerpt(body: &str, line: usize, column: usize, width: usize) -> String {
    let target: Vec<char> = body
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or("")
        .chars()
        .collect();
    if target.iter().all(|c| c.is_whitespace()) {
        return "(blank line)".to_string();
    }

    let at = column.saturating_sub(1).min(target.len());
    let start = at.saturating_sub(width / 2);
    let end = (at + width / 2).min(target.len());
    let slice: String = target[start..end].iter().collect();

    format!("...{slice}...\n   {}^", " ".repeat(at - start))
}
