//! Wire format between the execution loop and the reasoning service.
//!
//! Outbound, an [`Envelope`] is rendered to plain text by [`encode`].
//! Inbound, the service must answer with exactly one JSON object:
//!
//! ```text
//! {"thought": "...", "action": {"name": "<action>", "args": {...}}}
//! ```
//!
//! Prose or Markdown fences around the object are tolerated and stripped.
//! Everything else that is not exactly one well-formed action is a
//! [`DecodeError`], which carries the expected shape so the caller can send
//! a correction without re-deriving it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

pub const FINISH: &str = "finish";
pub const DELEGATE: &str = "delegate";

// ---------------------------------------------------------------------------
// Action shapes
// ---------------------------------------------------------------------------

/// Declared shape of one action: its name and required argument keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionShape {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ActionShape {
    pub fn new(name: impl Into<String>, description: impl Into<String>, required: &[&str]) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: required.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn signature(&self) -> String {
        format!("{}({})", self.name, self.required.join(", "))
    }
}

/// The set of action shapes the decoder accepts. Always contains `finish`
/// and `delegate`.
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    shapes: BTreeMap<String, ActionShape>,
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionCatalog {
    pub fn new() -> Self {
        let mut shapes = BTreeMap::new();
        for shape in [
            ActionShape::new(FINISH, "End the task and report the final output.", &["output"]),
            ActionShape::new(
                DELEGATE,
                "Hand a question to another role and wait for its answer.",
                &["role", "query"],
            ),
        ] {
            shapes.insert(shape.name.clone(), shape);
        }
        Self { shapes }
    }

    pub fn with(mut self, shape: ActionShape) -> Self {
        self.insert(shape);
        self
    }

    pub fn insert(&mut self, shape: ActionShape) {
        self.shapes.insert(shape.name.clone(), shape);
    }

    pub fn get(&self, name: &str) -> Option<&ActionShape> {
        self.shapes.get(name)
    }

    pub fn shapes(&self) -> impl Iterator<Item = &ActionShape> {
        self.shapes.values()
    }

    /// Human-readable description of a valid response, embedded in every
    /// correction.
    pub fn expected_shape(&self) -> String {
        let mut out = String::from(
            r#"exactly one JSON object: {"thought": "<your reasoning>", "action": {"name": "<action>", "args": {<arguments>}}}"#,
        );
        out.push_str("\nactions:");
        for shape in self.shapes.values() {
            out.push_str("\n- ");
            out.push_str(&shape.signature());
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Action / ActionResponse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Finish { output: String },
    Delegate { role: String, query: String },
    Invoke { name: String, args: Map<String, Value> },
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Action::Finish { .. } => FINISH,
            Action::Delegate { .. } => DELEGATE,
            Action::Invoke { name, .. } => name,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Finish { .. } => f.write_str(FINISH),
            Action::Delegate { role, .. } => write!(f, "{DELEGATE} -> {role}"),
            Action::Invoke { name, args } => {
                write!(f, "{name} {}", Value::Object(args.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionResponse {
    pub thought: String,
    pub action: Action,
}

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    NoStructuredBlock,
    InvalidJson,
    MissingField,
    MultipleActions,
    UnknownAction,
    MissingArgument,
    InvalidArgument,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecodeErrorKind::NoStructuredBlock => "no JSON object found",
            DecodeErrorKind::InvalidJson => "invalid JSON",
            DecodeErrorKind::MissingField => "missing field",
            DecodeErrorKind::MultipleActions => "expected exactly one action",
            DecodeErrorKind::UnknownAction => "unknown action",
            DecodeErrorKind::MissingArgument => "missing argument",
            DecodeErrorKind::InvalidArgument => "invalid argument",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub detail: String,
    pub expected: String,
}

impl DecodeError {
    fn new(kind: DecodeErrorKind, detail: impl Into<String>, catalog: &ActionCatalog) -> Self {
        Self {
            kind,
            detail: detail.into(),
            expected: catalog.expected_shape(),
        }
    }

    /// Follow-up text sent back to the reasoning service.
    pub fn correction_prompt(&self) -> String {
        format!(
            "Your previous response could not be used ({self}).\nRespond again with {}",
            self.expected
        )
    }
}

// ---------------------------------------------------------------------------
// Envelope / encode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Task,
    Recall,
    Memory,
    Observation,
    Correction,
}

impl ContextKind {
    fn label(self) -> &'static str {
        match self {
            ContextKind::Task => "task",
            ContextKind::Recall => "recall",
            ContextKind::Memory => "memory",
            ContextKind::Observation => "observation",
            ContextKind::Correction => "correction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub kind: ContextKind,
    pub content: String,
}

impl ContextEntry {
    pub fn new(kind: ContextKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }
}

/// One outbound request: the effective instruction, the actions on offer
/// and the ordered context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub instruction: String,
    pub actions: Vec<ActionShape>,
    pub context: Vec<ContextEntry>,
}

impl Envelope {
    pub fn new(instruction: impl Into<String>, catalog: &ActionCatalog) -> Self {
        Self {
            instruction: instruction.into(),
            actions: catalog.shapes().cloned().collect(),
            context: Vec::new(),
        }
    }

    pub fn push(&mut self, kind: ContextKind, content: impl Into<String>) {
        self.context.push(ContextEntry::new(kind, content));
    }
}

pub fn encode(envelope: &Envelope) -> String {
    let mut out = String::new();
    out.push_str(envelope.instruction.trim_end());
    out.push_str("\n\n## Actions\n");
    for shape in &envelope.actions {
        out.push_str(&format!("- {}", shape.signature()));
        if !shape.description.is_empty() {
            out.push_str(&format!(": {}", shape.description));
        }
        out.push('\n');
    }
    if !envelope.context.is_empty() {
        out.push_str("\n## Context\n");
        for entry in &envelope.context {
            out.push_str(&format!("[{}] {}\n", entry.kind.label(), entry.content.trim_end()));
        }
    }
    out.push_str("\n## Response\n");
    out.push_str(
        r#"Reply with exactly one JSON object: {"thought": "<your reasoning>", "action": {"name": "<action>", "args": {<arguments>}}}"#,
    );
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

static FENCE_RE: OnceLock<Regex> = OnceLock::new();

fn fence_re() -> &'static Regex {
    FENCE_RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").expect("fence regex is valid")
    })
}

/// Byte spans of every top-level `{...}` block, honouring JSON strings.
fn object_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    spans
}

/// Region of `text` that may hold the structured block: fenced bodies when
/// any fence is present, otherwise the whole text.
fn structured_region(text: &str) -> String {
    let bodies: Vec<&str> = fence_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if bodies.is_empty() {
        text.to_string()
    } else {
        bodies.join("\n")
    }
}

pub fn decode(text: &str, catalog: &ActionCatalog) -> Result<ActionResponse, DecodeError> {
    use DecodeErrorKind::*;

    let region = structured_region(text);
    let spans = object_spans(&region);
    if spans.is_empty() {
        return Err(DecodeError::new(
            NoStructuredBlock,
            "the response contains no JSON object",
            catalog,
        ));
    }

    let mut parse_error = None;
    let mut objects = Vec::new();
    for span in spans {
        match serde_json::from_str::<Value>(span) {
            Ok(Value::Object(map)) => objects.push(map),
            Ok(_) => {}
            Err(e) => {
                parse_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    let mut blocks: Vec<Map<String, Value>> = objects
        .into_iter()
        .filter(|o| o.contains_key("action") || o.contains_key("actions"))
        .collect();

    let mut block = match blocks.len() {
        0 => {
            return Err(match parse_error {
                Some(e) => DecodeError::new(InvalidJson, e, catalog),
                None => DecodeError::new(MissingField, "no 'action' field in the JSON object", catalog),
            })
        }
        1 => blocks.remove(0),
        n => {
            return Err(DecodeError::new(
                MultipleActions,
                format!("found {n} action objects"),
                catalog,
            ))
        }
    };

    let thought = match block.remove("thought") {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let action = match (block.remove("action"), block.remove("actions")) {
        (Some(_), Some(_)) => {
            return Err(DecodeError::new(
                MultipleActions,
                "both 'action' and 'actions' are present",
                catalog,
            ))
        }
        (Some(a), None) => a,
        (None, Some(Value::Array(mut list))) if list.len() == 1 => list.remove(0),
        (None, Some(Value::Array(list))) => {
            return Err(DecodeError::new(
                MultipleActions,
                format!("'actions' holds {} entries", list.len()),
                catalog,
            ))
        }
        (None, Some(_)) => {
            return Err(DecodeError::new(
                MultipleActions,
                "'actions' must hold exactly one action",
                catalog,
            ))
        }
        (None, None) => {
            return Err(DecodeError::new(MissingField, "no 'action' field", catalog))
        }
    };

    let (name, args) = match action {
        Value::Object(mut a) => {
            let name = match a.remove("name") {
                Some(Value::String(n)) if !n.trim().is_empty() => n.trim().to_string(),
                _ => {
                    return Err(DecodeError::new(
                        MissingField,
                        "'action.name' must be a non-empty string",
                        catalog,
                    ))
                }
            };
            let args = match a.remove("args") {
                Some(Value::Object(args)) => args,
                Some(Value::Null) | None => Map::new(),
                Some(_) => {
                    return Err(DecodeError::new(
                        InvalidArgument,
                        "'action.args' must be an object",
                        catalog,
                    ))
                }
            };
            (name, args)
        }
        Value::Array(_) => {
            return Err(DecodeError::new(
                MultipleActions,
                "'action' must be a single object, not a list",
                catalog,
            ))
        }
        _ => {
            return Err(DecodeError::new(
                MissingField,
                "'action' must be an object with a 'name'",
                catalog,
            ))
        }
    };

    let Some(shape) = catalog.get(&name) else {
        return Err(DecodeError::new(
            UnknownAction,
            format!("'{name}' is not an available action"),
            catalog,
        ));
    };
    for key in &shape.required {
        if matches!(args.get(key), None | Some(Value::Null)) {
            return Err(DecodeError::new(
                MissingArgument,
                format!("'{name}' requires argument '{key}'"),
                catalog,
            ));
        }
    }

    let action = match name.as_str() {
        FINISH => Action::Finish {
            output: text_arg(&args, "output"),
        },
        DELEGATE => {
            let role = string_arg(&args, "role")
                .ok_or_else(|| DecodeError::new(InvalidArgument, "'delegate.role' must be a string", catalog))?;
            let query = string_arg(&args, "query")
                .ok_or_else(|| DecodeError::new(InvalidArgument, "'delegate.query' must be a string", catalog))?;
            Action::Delegate { role, query }
        }
        _ => Action::Invoke { name, args },
    };

    Ok(ActionResponse { thought, action })
}

fn string_arg(args: &Map<String, Value>, key: &str) -> Option<String> {
    match args.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Strings pass through; any other JSON value is rendered compactly.
fn text_arg(args: &Map<String, Value>, key: &str) -> String {
    match args.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
