//! Conversion of notebook values to tool-response JSON.

use serde_json::{Map, Value as JsonValue};

use crate::notebook::{Cell, Output};

/// Characters of source shown in a cell preview.
pub const PREVIEW_CHARS: usize = 50;

/// Join a MIME value that may be a string or a list of lines.
fn mime_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(lines) => lines.iter().filter_map(|l| l.as_str()).collect(),
        other => other.to_string(),
    }
}

fn plain_text(data: &Map<String, JsonValue>) -> String {
    data.get("text/plain").map(mime_text).unwrap_or_default()
}

/// Render one output as plain text.
///
/// Streams give their text, results and displays their `text/plain`
/// payload, errors `"ename: evalue"`.
pub fn output_text(output: &Output) -> String {
    match output {
        Output::Stream { text, .. } => text.as_str().to_string(),
        Output::ExecuteResult { data, .. } | Output::DisplayData { data, .. } => plain_text(data),
        Output::Error { ename, evalue, .. } => format!("{}: {}", ename, evalue),
    }
}

/// Short output rendering used by `read_notebook`.
pub fn output_brief(output: &Output) -> JsonValue {
    match output {
        Output::Stream { text, .. } => {
            serde_json::json!({ "type": "stream", "text": text.as_str() })
        }
        Output::ExecuteResult { data, .. } => {
            serde_json::json!({ "type": "result", "text": plain_text(data) })
        }
        Output::DisplayData { data, .. } => {
            serde_json::json!({ "type": "display", "text": plain_text(data) })
        }
        Output::Error { ename, evalue, .. } => {
            serde_json::json!({ "type": "error", "ename": ename, "evalue": evalue })
        }
    }
}

/// Copy a MIME bundle, replacing images with a size placeholder.
fn redact_bundle(data: &Map<String, JsonValue>) -> JsonValue {
    let mut out = Map::new();
    for (mime, value) in data {
        let rendered = if mime.starts_with("image/") && mime != "image/svg+xml" {
            let len = mime_text(value).len();
            JsonValue::String(format!("[Base64 encoded image: {} bytes]", len))
        } else if mime == "text/plain" {
            JsonValue::String(mime_text(value))
        } else {
            value.clone()
        };
        out.insert(mime.clone(), rendered);
    }
    JsonValue::Object(out)
}

/// Full structured rendering of one output.
pub fn output_to_json(output: &Output) -> JsonValue {
    match output {
        Output::Stream { name, text } => serde_json::json!({
            "type": "stream",
            "name": name,
            "text": text.as_str(),
        }),
        Output::ExecuteResult {
            execution_count,
            data,
            ..
        } => serde_json::json!({
            "type": "execute_result",
            "execution_count": execution_count,
            "data": redact_bundle(data),
        }),
        Output::DisplayData { data, .. } => serde_json::json!({
            "type": "display_data",
            "data": redact_bundle(data),
        }),
        Output::Error {
            ename,
            evalue,
            traceback,
        } => serde_json::json!({
            "type": "error",
            "ename": ename,
            "evalue": evalue,
            "traceback": traceback,
        }),
    }
}

/// Structured rendering of a list of outputs.
pub fn outputs_to_json(outputs: &[Output]) -> JsonValue {
    JsonValue::Array(outputs.iter().map(output_to_json).collect())
}

/// First [`PREVIEW_CHARS`] characters of `source`, `...` marking a cut.
pub fn preview(source: &str) -> String {
    let mut chars = source.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// One-line summary of a cell, as listed by `list_cells`.
pub fn cell_summary(index: usize, cell: &Cell) -> JsonValue {
    serde_json::json!({
        "index": index,
        "id": cell.id(),
        "type": cell.kind().as_str(),
        "preview": preview(cell.source()),
    })
}

/// Full rendering of one cell, as returned by `read_cell`.
pub fn cell_to_json(index: usize, cell: &Cell) -> JsonValue {
    let mut obj = Map::new();
    obj.insert("index".to_string(), index.into());
    obj.insert("id".to_string(), cell.id().into());
    obj.insert("type".to_string(), cell.kind().as_str().into());
    obj.insert("source".to_string(), cell.source().into());
    if let Cell::Code(code) = cell {
        obj.insert(
            "execution_count".to_string(),
            serde_json::json!(code.execution_count),
        );
        obj.insert("outputs".to_string(), outputs_to_json(&code.outputs));
    }
    JsonValue::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_output_text_per_kind() {
        assert_eq!(output_text(&Output::stdout("hi\n")), "hi\n");
        let result = Output::ExecuteResult {
            execution_count: Some(1),
            data: bundle(json!({"text/plain": ["4", "2"]})),
            metadata: Map::new(),
        };
        assert_eq!(output_text(&result), "42");
        let err = Output::error("ZeroDivisionError", "division by zero");
        assert_eq!(output_text(&err), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_images_are_redacted() {
        let display = Output::DisplayData {
            data: bundle(json!({"image/png": "QUJD", "text/plain": "<Figure>"})),
            metadata: Map::new(),
        };
        let json = output_to_json(&display);
        assert_eq!(json["data"]["image/png"], json!("[Base64 encoded image: 4 bytes]"));
        assert_eq!(json["data"]["text/plain"], json!("<Figure>"));
    }

    #[test]
    fn test_preview_truncates() {
        let short = "print(1)";
        assert_eq!(preview(short), short);
        let exact = "x".repeat(PREVIEW_CHARS);
        assert_eq!(preview(&exact), exact);
        let long = "y".repeat(PREVIEW_CHARS + 10);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
    }

    #[test]
    fn test_preview_counts_chars_not_bytes() {
        let text = "é".repeat(PREVIEW_CHARS + 1);
        assert_eq!(preview(&text).chars().count(), PREVIEW_CHARS + 3);
    }
}
