//! nbformat v4 document model.
//!
//! Cells, outputs and the document itself deserialize from any valid v4 file
//! and serialize back the way Jupyter writes them: one-space indentation,
//! multiline strings split into lines. Fields this crate doesn't model are
//! kept in `extra` maps so a load/save round trip does not drop them.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use crate::error::{NbError, Result};

/// Major format version written by this crate.
pub const NBFORMAT: u32 = 4;
/// Minor format version written by this crate (4.5 introduced cell ids).
pub const NBFORMAT_MINOR: u32 = 5;

/// Text stored either as one string or as a list of lines.
///
/// Always serialized as a list of lines, each keeping its trailing newline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultilineText(String);

impl MultilineText {
    /// Borrow the joined text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into lines, keeping line terminators.
    pub fn lines(&self) -> Vec<&str> {
        self.0.split_inclusive('\n').collect()
    }
}

impl From<String> for MultilineText {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MultilineText {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Serialize for MultilineText {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.lines())
    }
}

impl<'de> Deserialize<'de> for MultilineText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(s) => Self(s),
            Repr::Many(lines) => Self(lines.concat()),
        })
    }
}

/// One output record of a code cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    /// Text written to stdout/stderr.
    Stream {
        /// Stream name (`stdout` or `stderr`)
        name: String,
        /// Captured text
        text: MultilineText,
    },
    /// Value of the last expression in the cell.
    ExecuteResult {
        /// Execution counter of the producing run
        execution_count: Option<u32>,
        /// MIME bundle
        data: Map<String, JsonValue>,
        /// Output metadata
        #[serde(default)]
        metadata: Map<String, JsonValue>,
    },
    /// Rich display produced while running.
    DisplayData {
        /// MIME bundle
        data: Map<String, JsonValue>,
        /// Output metadata
        #[serde(default)]
        metadata: Map<String, JsonValue>,
    },
    /// Exception raised by the cell, or a timeout/kernel failure.
    Error {
        /// Exception class name
        ename: String,
        /// Exception message
        evalue: String,
        /// Formatted traceback lines
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    /// Build a plain stdout stream output.
    pub fn stdout(text: &str) -> Self {
        Output::Stream {
            name: "stdout".to_string(),
            text: text.into(),
        }
    }

    /// Build an error output with no traceback.
    pub fn error(ename: &str, evalue: impl Into<String>) -> Self {
        Output::Error {
            ename: ename.to_string(),
            evalue: evalue.into(),
            traceback: Vec::new(),
        }
    }

    /// Whether this is an error output.
    pub fn is_error(&self) -> bool {
        matches!(self, Output::Error { .. })
    }
}

/// Kind of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    /// Executable source.
    Code,
    /// Markdown text.
    Markdown,
    /// Raw text passed through untouched.
    Raw,
}

impl CellKind {
    /// The nbformat `cell_type` string.
    pub fn as_str(self) -> &'static str {
        match self {
            CellKind::Code => "code",
            CellKind::Markdown => "markdown",
            CellKind::Raw => "raw",
        }
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A code cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCell {
    /// Cell id, unique within the document
    #[serde(default)]
    pub id: String,
    /// Cell metadata
    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
    /// Source text
    #[serde(default)]
    pub source: MultilineText,
    /// Counter of the most recent run, `null` if never run
    #[serde(default)]
    pub execution_count: Option<u32>,
    /// Outputs of the most recent run
    #[serde(default)]
    pub outputs: Vec<Output>,
    /// Fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// A markdown or raw cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCell {
    /// Cell id, unique within the document
    #[serde(default)]
    pub id: String,
    /// Cell metadata
    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
    /// Source text
    #[serde(default)]
    pub source: MultilineText,
    /// Fields not modelled above (e.g. `attachments`)
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// One notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    /// Code cell
    Code(CodeCell),
    /// Markdown cell
    Markdown(TextCell),
    /// Raw cell
    Raw(TextCell),
}

impl Cell {
    /// Create an empty-output cell of the given kind.
    pub fn new(kind: CellKind, id: String, source: &str) -> Self {
        match kind {
            CellKind::Code => Cell::Code(CodeCell {
                id,
                metadata: Map::new(),
                source: source.into(),
                execution_count: None,
                outputs: Vec::new(),
                extra: Map::new(),
            }),
            CellKind::Markdown | CellKind::Raw => {
                let body = TextCell {
                    id,
                    metadata: Map::new(),
                    source: source.into(),
                    extra: Map::new(),
                };
                if kind == CellKind::Markdown {
                    Cell::Markdown(body)
                } else {
                    Cell::Raw(body)
                }
            }
        }
    }

    /// The cell kind.
    pub fn kind(&self) -> CellKind {
        match self {
            Cell::Code(_) => CellKind::Code,
            Cell::Markdown(_) => CellKind::Markdown,
            Cell::Raw(_) => CellKind::Raw,
        }
    }

    /// The cell id.
    pub fn id(&self) -> &str {
        match self {
            Cell::Code(c) => &c.id,
            Cell::Markdown(c) | Cell::Raw(c) => &c.id,
        }
    }

    fn id_mut(&mut self) -> &mut String {
        match self {
            Cell::Code(c) => &mut c.id,
            Cell::Markdown(c) | Cell::Raw(c) => &mut c.id,
        }
    }

    /// The source text.
    pub fn source(&self) -> &str {
        match self {
            Cell::Code(c) => c.source.as_str(),
            Cell::Markdown(c) | Cell::Raw(c) => c.source.as_str(),
        }
    }

    /// Replace the source text. Outputs are left as they are.
    pub fn set_source(&mut self, source: &str) {
        let text = MultilineText::from(source);
        match self {
            Cell::Code(c) => c.source = text,
            Cell::Markdown(c) | Cell::Raw(c) => c.source = text,
        }
    }

    /// Outputs of a code cell; empty for other kinds.
    pub fn outputs(&self) -> &[Output] {
        match self {
            Cell::Code(c) => &c.outputs,
            _ => &[],
        }
    }

    /// Execution counter of a code cell.
    pub fn execution_count(&self) -> Option<u32> {
        match self {
            Cell::Code(c) => c.execution_count,
            _ => None,
        }
    }

    /// Mutable access to the code-cell body.
    pub fn as_code_mut(&mut self) -> Option<&mut CodeCell> {
        match self {
            Cell::Code(c) => Some(c),
            _ => None,
        }
    }
}

/// How a tool call points at a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellRef {
    /// By cell id
    Id(String),
    /// By position; negative values never match
    Index(i64),
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellRef::Id(id) => write!(f, "id {}", id),
            CellRef::Index(idx) => write!(f, "index {}", idx),
        }
    }
}

/// A notebook document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    /// Ordered cells
    pub cells: Vec<Cell>,
    /// Document metadata (kernelspec, language_info, ...)
    #[serde(default)]
    pub metadata: Map<String, JsonValue>,
    /// Major format version
    pub nbformat: u32,
    /// Minor format version
    pub nbformat_minor: u32,
    /// Top-level fields not modelled above
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Notebook {
    /// An empty document with default metadata for `kernel_name`.
    pub fn new(kernel_name: &str) -> Self {
        let mut metadata = Map::new();
        metadata.insert(
            "kernelspec".to_string(),
            serde_json::json!({
                "display_name": display_name_for(kernel_name),
                "language": "python",
                "name": kernel_name,
            }),
        );
        metadata.insert(
            "language_info".to_string(),
            serde_json::json!({ "name": "python" }),
        );

        Self {
            cells: Vec::new(),
            metadata,
            nbformat: NBFORMAT,
            nbformat_minor: NBFORMAT_MINOR,
            extra: Map::new(),
        }
    }

    /// Parse a v4 document, assigning ids to cells that lack one.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let mut nb: Notebook = serde_json::from_str(text)?;
        nb.ensure_cell_ids();
        Ok(nb)
    }

    /// Serialize the way Jupyter does: one-space indent, trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        buf.push(b'\n');
        String::from_utf8(buf).map_err(|e| NbError::Internal(e.to_string()))
    }

    /// Give every id-less or duplicate-id cell a fresh id.
    ///
    /// Upgrades the minor version when anything changed, since ids are a 4.5
    /// feature.
    pub fn ensure_cell_ids(&mut self) -> bool {
        let mut seen = std::collections::HashSet::new();
        let mut missing = Vec::new();
        for (idx, cell) in self.cells.iter().enumerate() {
            if cell.id().is_empty() || !seen.insert(cell.id().to_string()) {
                missing.push(idx);
            }
        }
        if missing.is_empty() {
            return false;
        }
        for idx in missing {
            let id = self.fresh_cell_id();
            *self.cells[idx].id_mut() = id;
        }
        if self.nbformat == NBFORMAT && self.nbformat_minor < NBFORMAT_MINOR {
            self.nbformat_minor = NBFORMAT_MINOR;
        }
        true
    }

    /// A random id not used by any cell of this document.
    pub fn fresh_cell_id(&self) -> String {
        loop {
            let id = uuid::Uuid::new_v4().simple().to_string();
            if !self.cells.iter().any(|c| c.id() == id) {
                return id;
            }
        }
    }

    /// Position of the referenced cell.
    pub fn find(&self, cell: &CellRef) -> Result<usize> {
        let found = match cell {
            CellRef::Id(id) => self.cells.iter().position(|c| c.id() == id),
            CellRef::Index(idx) => usize::try_from(*idx).ok().filter(|i| *i < self.cells.len()),
        };
        found.ok_or_else(|| match cell {
            CellRef::Id(id) => NbError::CellNotFound(format!("no cell with id {}", id)),
            CellRef::Index(idx) => NbError::CellNotFound(format!(
                "index {} out of range, notebook has {} cells",
                idx,
                self.cells.len()
            )),
        })
    }

    /// Insert `cell` at `position` and return its final index.
    ///
    /// Negative positions count from the end with -1 meaning append.
    /// Out-of-range positions clamp to the nearest end.
    pub fn insert_cell(&mut self, position: i64, cell: Cell) -> usize {
        let len = self.cells.len() as i64;
        let target = if position < 0 { len + position + 1 } else { position };
        let idx = target.clamp(0, len) as usize;
        self.cells.insert(idx, cell);
        idx
    }

    /// Kernel name from the kernelspec, if any.
    pub fn kernel_name(&self) -> Option<&str> {
        self.metadata
            .get("kernelspec")
            .and_then(|k| k.get("name"))
            .and_then(|n| n.as_str())
    }

    /// The `kernelspec` metadata block, or `{}`.
    pub fn kernelspec(&self) -> JsonValue {
        self.metadata_block("kernelspec")
    }

    /// The `language_info` metadata block, or `{}`.
    pub fn language_info(&self) -> JsonValue {
        self.metadata_block("language_info")
    }

    fn metadata_block(&self, key: &str) -> JsonValue {
        self.metadata
            .get(key)
            .cloned()
            .unwrap_or_else(|| JsonValue::Object(Map::new()))
    }
}

fn display_name_for(kernel_name: &str) -> String {
    match kernel_name {
        "python3" => "Python 3".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nb_with(sources: &[&str]) -> Notebook {
        let mut nb = Notebook::new("python3");
        for src in sources {
            let id = nb.fresh_cell_id();
            let cell = Cell::new(CellKind::Code, id, src);
            nb.cells.push(cell);
        }
        nb
    }

    #[test]
    fn test_new_notebook_defaults() {
        let nb = Notebook::new("python3");
        assert!(nb.cells.is_empty());
        assert_eq!(nb.nbformat, 4);
        assert_eq!(nb.nbformat_minor, 5);
        assert_eq!(nb.kernel_name(), Some("python3"));
        assert_eq!(nb.kernelspec()["display_name"], json!("Python 3"));
        assert_eq!(nb.language_info()["name"], json!("python"));
    }

    #[test]
    fn test_source_accepts_string_or_lines() {
        let text = r##"{
            "cells": [
                {"cell_type": "code", "id": "a", "metadata": {}, "source": ["x = 1\n", "y = 2"],
                 "execution_count": null, "outputs": []},
                {"cell_type": "markdown", "id": "b", "metadata": {}, "source": "# Title"}
            ],
            "metadata": {}, "nbformat": 4, "nbformat_minor": 5
        }"##;
        let nb = Notebook::from_json(text).unwrap();
        assert_eq!(nb.cells[0].source(), "x = 1\ny = 2");
        assert_eq!(nb.cells[1].source(), "# Title");
        assert_eq!(nb.cells[1].kind(), CellKind::Markdown);
    }

    #[test]
    fn test_source_serialized_as_lines() {
        let nb = nb_with(&["a = 1\nb = 2\n"]);
        let value: JsonValue = serde_json::from_str(&nb.to_json().unwrap()).unwrap();
        assert_eq!(value["cells"][0]["source"], json!(["a = 1\n", "b = 2\n"]));
        assert_eq!(value["cells"][0]["execution_count"], JsonValue::Null);
        assert_eq!(value["cells"][0]["outputs"], json!([]));
    }

    #[test]
    fn test_markdown_has_no_outputs_field() {
        let mut nb = Notebook::new("python3");
        let id = nb.fresh_cell_id();
        nb.cells.push(Cell::new(CellKind::Markdown, id, "hi"));
        let value: JsonValue = serde_json::from_str(&nb.to_json().unwrap()).unwrap();
        assert!(value["cells"][0].get("outputs").is_none());
        assert_eq!(value["cells"][0]["cell_type"], json!("markdown"));
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let text = r#"{
            "cells": [{"cell_type": "markdown", "id": "m", "metadata": {"tags": ["x"]},
                       "source": "", "attachments": {"a.png": {}}}],
            "metadata": {"custom": {"k": 1}}, "nbformat": 4, "nbformat_minor": 5
        }"#;
        let nb = Notebook::from_json(text).unwrap();
        let again = Notebook::from_json(&nb.to_json().unwrap()).unwrap();
        assert_eq!(nb, again);
        let value: JsonValue = serde_json::from_str(&again.to_json().unwrap()).unwrap();
        assert_eq!(value["cells"][0]["attachments"], json!({"a.png": {}}));
        assert_eq!(value["metadata"]["custom"], json!({"k": 1}));
    }

    #[test]
    fn test_missing_ids_are_assigned_and_minor_upgraded() {
        let text = r#"{
            "cells": [
                {"cell_type": "code", "metadata": {}, "source": "", "execution_count": null, "outputs": []},
                {"cell_type": "code", "metadata": {}, "source": "", "execution_count": null, "outputs": []}
            ],
            "metadata": {}, "nbformat": 4, "nbformat_minor": 2
        }"#;
        let nb = Notebook::from_json(text).unwrap();
        assert!(!nb.cells[0].id().is_empty());
        assert_ne!(nb.cells[0].id(), nb.cells[1].id());
        assert_eq!(nb.nbformat_minor, 5);
    }

    #[test]
    fn test_outputs_parse_every_kind() {
        let text = r#"{
            "cells": [{"cell_type": "code", "id": "c", "metadata": {}, "source": "",
                "execution_count": 3,
                "outputs": [
                    {"output_type": "stream", "name": "stdout", "text": ["hi\n"]},
                    {"output_type": "execute_result", "execution_count": 3,
                     "data": {"text/plain": "42"}, "metadata": {}},
                    {"output_type": "display_data", "data": {"image/png": "iVBO"}, "metadata": {}},
                    {"output_type": "error", "ename": "ValueError", "evalue": "bad", "traceback": []}
                ]}],
            "metadata": {}, "nbformat": 4, "nbformat_minor": 5
        }"#;
        let nb = Notebook::from_json(text).unwrap();
        let outputs = nb.cells[0].outputs();
        assert_eq!(outputs.len(), 4);
        assert_eq!(outputs[0], Output::stdout("hi\n"));
        assert!(outputs[3].is_error());
        assert_eq!(nb.cells[0].execution_count(), Some(3));
    }

    #[test]
    fn test_insert_cell_positions() {
        let mut nb = nb_with(&["a", "b", "c"]);
        let append = nb.insert_cell(-1, Cell::new(CellKind::Code, "d".into(), "d"));
        assert_eq!(append, 3);
        let before_last = nb.insert_cell(-2, Cell::new(CellKind::Code, "e".into(), "e"));
        assert_eq!(before_last, 3);
        let front = nb.insert_cell(0, Cell::new(CellKind::Code, "f".into(), "f"));
        assert_eq!(front, 0);
        let far = nb.insert_cell(100, Cell::new(CellKind::Code, "g".into(), "g"));
        assert_eq!(far, nb.cells.len() - 1);
        let very_negative = nb.insert_cell(-100, Cell::new(CellKind::Code, "h".into(), "h"));
        assert_eq!(very_negative, 0);
    }

    #[test]
    fn test_find_by_id_and_index() {
        let nb = nb_with(&["a", "b"]);
        let id = nb.cells[1].id().to_string();
        assert_eq!(nb.find(&CellRef::Id(id)).unwrap(), 1);
        assert_eq!(nb.find(&CellRef::Index(0)).unwrap(), 0);
        assert!(matches!(
            nb.find(&CellRef::Index(2)),
            Err(NbError::CellNotFound(_))
        ));
        assert!(matches!(
            nb.find(&CellRef::Index(-1)),
            Err(NbError::CellNotFound(_))
        ));
        assert!(matches!(
            nb.find(&CellRef::Id("missing".into())),
            Err(NbError::CellNotFound(_))
        ));
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        let nb = nb_with(&["a", "b", "c", "d"]);
        let mut ids: Vec<&str> = nb.cells.iter().map(|c| c.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }
}
