use crate::reflect::{self, ReflectValue, VariableNode};
use serde::Serialize;
use std::collections::BTreeMap;

/// A single frame as reported by the runtime, innermost first.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub file_path: Option<String>,
    pub line_number: i64,
    pub column_number: i64,
    pub args: Vec<(String, ReflectValue)>,
}

/// A processed stack frame ready for inclusion in an [`crate::capture::ExceptionRecord`]
/// or [`crate::breakpoints::BreakpointEntry`] hit payload.
#[derive(Debug, Clone, Serialize)]
pub struct StackFrame {
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub line_number: i64,
    pub column_number: i64,
    pub is_native: bool,
    pub local_variables: Option<BTreeMap<String, VariableNode>>,
}

fn basename(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}

/// Converts raw runtime frames into ordered [`StackFrame`]s.
///
/// `skip` drops the innermost `skip` frames (used by breakpoint hit walks
/// to drop the reflector's own frame and the `hit` entry point).
pub fn walk(frames: &[RawFrame], max_depth: u32, skip: usize) -> Vec<StackFrame> {
    frames
        .iter()
        .skip(skip)
        .map(|frame| {
            let is_native = frame.file_path.is_none();
            let file_name = frame.file_path.as_deref().map(basename);
            let local_variables = if !frame.args.is_empty() && max_depth > 0 {
                let mut children = BTreeMap::new();
                for (i, (key, value)) in frame.args.iter().enumerate() {
                    let name = if key.is_empty() { format!("arg{i}") } else { key.clone() };
                    children.insert(name.clone(), reflect::reflect(&name, value, 0, max_depth, false));
                }
                Some(children)
            } else {
                None
            };

            StackFrame {
                class_name: frame.class_name.clone(),
                method_name: frame.method_name.clone(),
                file_path: frame.file_path.clone(),
                file_name,
                line_number: frame.line_number,
                column_number: frame.column_number,
                is_native,
                local_variables,
            }
        })
        .collect()
}
