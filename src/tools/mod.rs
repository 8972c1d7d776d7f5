//! Tool registry and typed tool calls.
//!
//! Tool names map to a closed set of [`ToolCall`] variants, each carrying its
//! own argument struct; [`ToolRegistry::dispatch`] parses the call and runs it
//! through one exhaustive match.

pub mod cells;
pub mod execution;
pub mod notebook;
pub mod workspace;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::error::{NbError, Result};
use crate::notebook::CellRef;
use crate::session::NotebookSession;

/// A tool definition for the tools/list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool name (e.g., "add_cell")
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON Schema for the input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: JsonValue,
}

impl ToolDef {
    /// Create a new tool definition.
    pub fn new(name: &str, description: &str, input_schema: JsonValue) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Arguments naming only a notebook.
#[derive(Debug, Clone, Deserialize)]
pub struct NotebookArgs {
    /// Notebook path, relative to the workspace or absolute
    pub notebook_path: String,
}

/// Arguments naming one cell of a notebook, by id or by index.
#[derive(Debug, Clone, Deserialize)]
pub struct CellTarget {
    /// Notebook path, relative to the workspace or absolute
    pub notebook_path: String,
    /// Cell id
    #[serde(default)]
    pub cell_id: Option<String>,
    /// Cell position
    #[serde(default)]
    pub cell_index: Option<i64>,
}

impl CellTarget {
    /// The cell reference; exactly one of id and index must be given.
    pub fn cell_ref(&self, tool: &str) -> Result<CellRef> {
        match (&self.cell_id, self.cell_index) {
            (Some(id), None) => Ok(CellRef::Id(id.clone())),
            (None, Some(idx)) => Ok(CellRef::Index(idx)),
            (Some(_), Some(_)) => Err(NbError::invalid_args(
                tool,
                "pass either cell_id or cell_index, not both",
            )),
            (None, None) => Err(NbError::invalid_args(tool, "cell_id or cell_index is required")),
        }
    }
}

/// A parsed tool call.
#[derive(Debug, Clone)]
pub enum ToolCall {
    /// `get_workspace`
    GetWorkspace,
    /// `set_workspace`
    SetWorkspace(workspace::SetWorkspaceArgs),
    /// `list_notebooks`
    ListNotebooks(workspace::ListNotebooksArgs),
    /// `create_notebook`
    CreateNotebook(notebook::CreateNotebookArgs),
    /// `read_notebook`
    ReadNotebook(notebook::ReadNotebookArgs),
    /// `write_notebook`
    WriteNotebook(notebook::WriteNotebookArgs),
    /// `list_cells`
    ListCells(NotebookArgs),
    /// `get_structure`
    GetStructure(NotebookArgs),
    /// `notebook_diff`
    NotebookDiff(notebook::DiffArgs),
    /// `undo_last_operation`
    UndoLastOperation(NotebookArgs),
    /// `read_cell`
    ReadCell(CellTarget),
    /// `add_cell`
    AddCell(cells::AddCellArgs),
    /// `edit_cell`
    EditCell(cells::EditCellArgs),
    /// `delete_cell`
    DeleteCell(CellTarget),
    /// `execute_cell`
    ExecuteCell(execution::ExecuteCellArgs),
    /// `run_all_cells`
    RunAllCells(execution::RunAllArgs),
    /// `read_cell_output`
    ReadCellOutput(CellTarget),
    /// `read_notebook_outputs`
    ReadNotebookOutputs(NotebookArgs),
    /// `shutdown_kernel`
    ShutdownKernel(NotebookArgs),
}

fn args_for<T: DeserializeOwned>(tool: &str, args: Map<String, JsonValue>) -> Result<T> {
    serde_json::from_value(JsonValue::Object(args)).map_err(|e| NbError::invalid_args(tool, e.to_string()))
}

impl ToolCall {
    /// Parse a tool name and its argument object.
    pub fn parse(name: &str, args: Map<String, JsonValue>) -> Result<Self> {
        let call = match name {
            "get_workspace" => ToolCall::GetWorkspace,
            "set_workspace" => ToolCall::SetWorkspace(args_for(name, args)?),
            "list_notebooks" => ToolCall::ListNotebooks(args_for(name, args)?),
            "create_notebook" => ToolCall::CreateNotebook(args_for(name, args)?),
            "read_notebook" => ToolCall::ReadNotebook(args_for(name, args)?),
            "write_notebook" => ToolCall::WriteNotebook(args_for(name, args)?),
            "list_cells" => ToolCall::ListCells(args_for(name, args)?),
            "get_structure" => ToolCall::GetStructure(args_for(name, args)?),
            "notebook_diff" => ToolCall::NotebookDiff(args_for(name, args)?),
            "undo_last_operation" => ToolCall::UndoLastOperation(args_for(name, args)?),
            "read_cell" => ToolCall::ReadCell(args_for(name, args)?),
            "add_cell" => ToolCall::AddCell(args_for(name, args)?),
            "edit_cell" => ToolCall::EditCell(args_for(name, args)?),
            "delete_cell" => ToolCall::DeleteCell(args_for(name, args)?),
            "execute_cell" => ToolCall::ExecuteCell(args_for(name, args)?),
            "run_all_cells" => ToolCall::RunAllCells(args_for(name, args)?),
            "read_cell_output" => ToolCall::ReadCellOutput(args_for(name, args)?),
            "read_notebook_outputs" => ToolCall::ReadNotebookOutputs(args_for(name, args)?),
            "shutdown_kernel" => ToolCall::ShutdownKernel(args_for(name, args)?),
            _ => return Err(NbError::UnknownTool(name.to_string())),
        };
        Ok(call)
    }

    /// Run the call against `session`.
    pub fn run(self, session: &mut NotebookSession) -> Result<JsonValue> {
        match self {
            ToolCall::GetWorkspace => workspace::get_workspace(session),
            ToolCall::SetWorkspace(args) => workspace::set_workspace(session, args),
            ToolCall::ListNotebooks(args) => workspace::list_notebooks(session, args),
            ToolCall::CreateNotebook(args) => notebook::create_notebook(session, args),
            ToolCall::ReadNotebook(args) => notebook::read_notebook(session, args),
            ToolCall::WriteNotebook(args) => notebook::write_notebook(session, args),
            ToolCall::ListCells(args) => notebook::list_cells(session, args),
            ToolCall::GetStructure(args) => notebook::get_structure(session, args),
            ToolCall::NotebookDiff(args) => notebook::notebook_diff(session, args),
            ToolCall::UndoLastOperation(args) => notebook::undo_last_operation(session, args),
            ToolCall::ReadCell(target) => cells::read_cell(session, target),
            ToolCall::AddCell(args) => cells::add_cell(session, args),
            ToolCall::EditCell(args) => cells::edit_cell(session, args),
            ToolCall::DeleteCell(target) => cells::delete_cell(session, target),
            ToolCall::ExecuteCell(args) => execution::execute_cell(session, args),
            ToolCall::RunAllCells(args) => execution::run_all_cells(session, args),
            ToolCall::ReadCellOutput(target) => execution::read_cell_output(session, target),
            ToolCall::ReadNotebookOutputs(args) => execution::read_notebook_outputs(session, args),
            ToolCall::ShutdownKernel(args) => execution::shutdown_kernel(session, args),
        }
    }
}

/// Registry of all available tools.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    /// Create a new registry with all tools registered.
    pub fn new() -> Self {
        let mut tools = Vec::new();

        tools.extend(workspace::tools());
        tools.extend(notebook::tools());
        tools.extend(cells::tools());
        tools.extend(execution::tools());

        Self { tools }
    }

    /// Get all tool definitions.
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    /// Parse and run a tool call.
    pub fn dispatch(
        &self,
        session: &mut NotebookSession,
        name: &str,
        args: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        let call = ToolCall::parse(name, args)?;
        debug!(tool = name, ?call, "dispatching tool");
        call.run(session)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper macro for creating JSON Schema for tool input parameters.
///
/// Each property is `"name": type => "description"`.
#[macro_export]
macro_rules! schema {
    // Object with required and optional properties
    (object {
        required: { $($req_name:literal : $req_type:tt => $req_doc:literal),* $(,)? },
        optional: { $($opt_name:literal : $opt_type:tt => $opt_doc:literal),* $(,)? }
    }) => {{
        #[allow(unused_mut)]
        let mut required: Vec<&str> = Vec::new();
        $(required.push($req_name);)*

        #[allow(unused_mut)]
        let mut props = serde_json::Map::new();
        $(props.insert($req_name.to_string(), $crate::schema!(@prop $req_type, $req_doc));)*
        $(props.insert($opt_name.to_string(), $crate::schema!(@prop $opt_type, $opt_doc));)*

        serde_json::json!({
            "type": "object",
            "properties": props,
            "required": required
        })
    }};

    // Object with only required properties
    (object {
        required: { $($req_name:literal : $req_type:tt => $req_doc:literal),* $(,)? }
    }) => {{
        $crate::schema!(object { required: { $($req_name : $req_type => $req_doc),* }, optional: {} })
    }};

    // Object with only optional properties
    (object {
        optional: { $($opt_name:literal : $opt_type:tt => $opt_doc:literal),* $(,)? }
    }) => {{
        $crate::schema!(object { required: {}, optional: { $($opt_name : $opt_type => $opt_doc),* } })
    }};

    // Empty object (no parameters)
    (object {}) => {{
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }};

    (@prop $ty:tt, $doc:literal) => {{
        let mut prop = $crate::schema!(@type $ty);
        if let Some(obj) = prop.as_object_mut() {
            obj.insert("description".to_string(), serde_json::json!($doc));
        }
        prop
    }};

    // Type mappings
    (@type string) => { serde_json::json!({"type": "string"}) };
    (@type integer) => { serde_json::json!({"type": "integer"}) };
    (@type boolean) => { serde_json::json!({"type": "boolean"}) };
    (@type object) => { serde_json::json!({"type": "object"}) };
    (@type cell_type) => { serde_json::json!({"type": "string", "enum": ["code", "markdown", "raw"]}) };
}
