//! Positional comparison of two notebooks.
//!
//! Cells are compared index by index, not by id: inserting a cell near the
//! top of one document shifts every later comparison.

use serde::Serialize;

use crate::convert::output_text;
use crate::notebook::{Cell, CellKind, Notebook};

/// One difference at a cell position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "diff_type", rename_all = "snake_case")]
pub enum CellDiff {
    /// Cell kinds differ.
    CellType {
        /// Position
        index: usize,
        /// Kind in the first notebook
        a_type: CellKind,
        /// Kind in the second notebook
        b_type: CellKind,
    },
    /// Source text differs.
    Content {
        /// Position
        index: usize,
        /// Cell id in the first notebook
        a_id: String,
        /// Cell id in the second notebook
        b_id: String,
    },
    /// Rendered outputs differ (both code cells).
    Outputs {
        /// Position
        index: usize,
        /// Cell id in the first notebook
        a_id: String,
        /// Cell id in the second notebook
        b_id: String,
    },
    /// Only one notebook has a cell at this position.
    MissingCell {
        /// Position
        index: usize,
        /// Present in the first notebook
        in_a: bool,
        /// Present in the second notebook
        in_b: bool,
    },
}

/// Result of comparing two notebooks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotebookDiff {
    /// `cells(a) - cells(b)`
    pub cell_count_diff: i64,
    /// Per-position differences in index order
    pub differences: Vec<CellDiff>,
    /// Whether document metadata differs
    pub metadata_diff: bool,
}

impl NotebookDiff {
    /// True when nothing differs.
    pub fn is_empty(&self) -> bool {
        self.differences.is_empty() && !self.metadata_diff
    }
}

fn rendered_outputs(cell: &Cell) -> Vec<String> {
    cell.outputs().iter().map(output_text).collect()
}

/// Compare `a` and `b` position by position.
pub fn compare(a: &Notebook, b: &Notebook, include_outputs: bool) -> NotebookDiff {
    let len_a = a.cells.len();
    let len_b = b.cells.len();
    let mut differences = Vec::new();

    for index in 0..len_a.max(len_b) {
        let (cell_a, cell_b) = match (a.cells.get(index), b.cells.get(index)) {
            (Some(x), Some(y)) => (x, y),
            (x, y) => {
                differences.push(CellDiff::MissingCell {
                    index,
                    in_a: x.is_some(),
                    in_b: y.is_some(),
                });
                continue;
            }
        };

        if cell_a.kind() != cell_b.kind() {
            differences.push(CellDiff::CellType {
                index,
                a_type: cell_a.kind(),
                b_type: cell_b.kind(),
            });
        }
        if cell_a.source() != cell_b.source() {
            differences.push(CellDiff::Content {
                index,
                a_id: cell_a.id().to_string(),
                b_id: cell_b.id().to_string(),
            });
        }
        let both_code = cell_a.kind() == CellKind::Code && cell_b.kind() == CellKind::Code;
        if include_outputs && both_code && rendered_outputs(cell_a) != rendered_outputs(cell_b) {
            differences.push(CellDiff::Outputs {
                index,
                a_id: cell_a.id().to_string(),
                b_id: cell_b.id().to_string(),
            });
        }
    }

    NotebookDiff {
        cell_count_diff: len_a as i64 - len_b as i64,
        differences,
        metadata_diff: a.metadata != b.metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notebook::Output;

    fn nb(cells: &[(CellKind, &str)]) -> Notebook {
        let mut nb = Notebook::new("python3");
        for (kind, src) in cells {
            let id = nb.fresh_cell_id();
            nb.cells.push(Cell::new(*kind, id, src));
        }
        nb
    }

    #[test]
    fn test_self_diff_is_empty() {
        let a = nb(&[(CellKind::Code, "x = 1"), (CellKind::Markdown, "# t")]);
        let d = compare(&a, &a, true);
        assert!(d.is_empty());
        assert_eq!(d.cell_count_diff, 0);
    }

    #[test]
    fn test_content_and_type_changes() {
        let a = nb(&[(CellKind::Code, "x = 1"), (CellKind::Code, "y")]);
        let mut b = a.clone();
        b.cells[0].set_source("x = 2");
        b.cells[1] = Cell::new(CellKind::Markdown, b.cells[1].id().to_string(), "y");

        let d = compare(&a, &b, false);
        assert_eq!(d.differences.len(), 2);
        assert!(matches!(d.differences[0], CellDiff::Content { index: 0, .. }));
        assert!(matches!(
            d.differences[1],
            CellDiff::CellType {
                index: 1,
                a_type: CellKind::Code,
                b_type: CellKind::Markdown
            }
        ));
    }

    #[test]
    fn test_outputs_only_when_requested() {
        let a = nb(&[(CellKind::Code, "print(1)")]);
        let mut b = a.clone();
        b.cells[0].as_code_mut().unwrap().outputs = vec![Output::stdout("1\n")];

        assert!(compare(&a, &b, false).is_empty());
        let d = compare(&a, &b, true);
        assert!(matches!(d.differences[0], CellDiff::Outputs { index: 0, .. }));
    }

    #[test]
    fn test_insertion_shifts_positions() {
        let a = nb(&[(CellKind::Code, "a"), (CellKind::Code, "b")]);
        let mut b = a.clone();
        let id = b.fresh_cell_id();
        b.cells.insert(0, Cell::new(CellKind::Code, id, "new"));

        let d = compare(&a, &b, false);
        assert_eq!(d.cell_count_diff, -1);
        let content = d
            .differences
            .iter()
            .filter(|x| matches!(x, CellDiff::Content { .. }))
            .count();
        assert_eq!(content, 2);
        assert_eq!(
            d.differences.last(),
            Some(&CellDiff::MissingCell {
                index: 2,
                in_a: false,
                in_b: true
            })
        );
    }

    #[test]
    fn test_metadata_diff() {
        let a = Notebook::new("python3");
        let b = Notebook::new("ir");
        assert!(compare(&a, &b, false).metadata_diff);
    }

    #[test]
    fn test_serialized_shape() {
        let a = nb(&[(CellKind::Code, "a")]);
        let b = nb(&[]);
        let json = serde_json::to_value(compare(&a, &b, false)).unwrap();
        assert_eq!(json["differences"][0]["diff_type"], "missing_cell");
        assert_eq!(json["differences"][0]["in_a"], true);
    }
}
