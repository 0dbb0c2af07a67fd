use crate::fingerprint;
use crate::reflect::{self, ReflectValue, VariableNode};
use crate::redact;
use crate::request_context::RequestContext;
use crate::stack::{self, RawFrame, StackFrame};
use std::collections::{BTreeMap, HashSet};

const MAX_FINGERPRINTS: usize = 1000;
const RESERVED_EXCEPTION_FIELDS: &[&str] = &["message", "code", "file", "line", "trace", "previous"];
const MAX_REQUEST_PARAMS: usize = 20;
const MAX_SESSION_PARAMS: usize = 10;

/// Severity classification for a captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// The host-supplied stand-in for a live exception/error value: Rust has no
/// single exception base type, so callers build one of these from whatever
/// error type they caught.
#[derive(Debug, Clone, Default)]
pub struct ExceptionInput {
    pub exception_type: String,
    pub message: Option<String>,
    pub code: Option<String>,
    pub file_path: Option<String>,
    pub line_number: i64,
    pub method_name: Option<String>,
    pub class_name: Option<String>,
    pub frames: Vec<RawFrame>,
    pub fields: Vec<(&'static str, ReflectValue)>,
    pub previous: Option<Box<ExceptionInput>>,
}

/// A fully built record ready to be handed to the transport as an
/// `exception` or `snapshot` envelope payload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExceptionRecord {
    pub exception_type: String,
    pub message: Option<String>,
    pub file_path: Option<String>,
    pub line_number: i64,
    pub method_name: Option<String>,
    pub class_name: Option<String>,
    pub severity: &'static str,
    pub runtime: &'static str,
    pub runtime_version: String,
    pub stack_trace: Vec<StackFrame>,
    pub local_variables: Option<BTreeMap<String, VariableNode>>,
    pub request_context: Option<BTreeMap<String, String>>,
}

/// Installs no interceptors itself (that is the façade's job, since only it
/// can see the process-wide singleton); owns the dedup/sampling policy and
/// record-building logic that the façade's hooks call into.
pub struct ExceptionCapture {
    fingerprints: HashSet<String>,
    max_variable_depth: u32,
}

impl ExceptionCapture {
    pub fn new(max_variable_depth: u32) -> Self {
        Self { fingerprints: HashSet::new(), max_variable_depth }
    }

    /// Builds and returns a record for an exception/manual capture. Applies
    /// fingerprint-based dedup; never sampled. Returns `None` when the
    /// fingerprint has already been seen.
    pub fn capture(&mut self, input: &ExceptionInput, context: Option<&RequestContext>) -> Option<ExceptionRecord> {
        let stack_trace = stack::walk(&input.frames, self.max_variable_depth, 0);
        let fp = fingerprint::fingerprint(&input.exception_type, &stack_trace);
        if self.fingerprints.contains(&fp) {
            return None;
        }
        if self.fingerprints.len() > MAX_FINGERPRINTS {
            self.fingerprints.clear();
        }
        self.fingerprints.insert(fp);

        Some(self.build_record(input, Severity::Error, &stack_trace, context))
    }

    /// Builds a record for an error-hook event (warning/notice/deprecated/
    /// fatal), applying `sampling_rate` before doing any work. No dedup.
    pub fn report(&mut self, severity: Severity, input: &ExceptionInput, context: Option<&RequestContext>, sampling_rate: f64) -> Option<ExceptionRecord> {
        if rand::random::<f64>() > sampling_rate {
            return None;
        }
        let stack_trace = stack::walk(&input.frames, self.max_variable_depth, 0);
        Some(self.build_record(input, severity, &stack_trace, context))
    }

    fn build_record(&self, input: &ExceptionInput, severity: Severity, stack_trace: &[StackFrame], context: Option<&RequestContext>) -> ExceptionRecord {
        let local_variables = Some(self.exception_as_variables(input, 0, context));
        let request_context = context.filter(|c| !c.is_empty()).map(RequestContext::as_map);

        ExceptionRecord {
            exception_type: input.exception_type.clone(),
            message: input.message.clone(),
            file_path: input.file_path.clone(),
            line_number: input.line_number,
            method_name: input.method_name.clone(),
            class_name: input.class_name.clone(),
            severity: severity.as_str(),
            runtime: "rust",
            runtime_version: option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown").to_string(),
            stack_trace: stack_trace.to_vec(),
            local_variables,
            request_context,
        }
    }

    fn exception_as_variables(&self, input: &ExceptionInput, depth: u32, context: Option<&RequestContext>) -> BTreeMap<String, VariableNode> {
        let mut out = BTreeMap::new();

        let message = input.message.clone().unwrap_or_default();
        out.insert(
            "message".to_string(),
            reflect::reflect("message", &ReflectValue::Str(message), depth, self.max_variable_depth, true),
        );
        out.insert(
            "code".to_string(),
            reflect::reflect(
                "code",
                &input.code.clone().map(ReflectValue::Str).unwrap_or(ReflectValue::Null),
                depth,
                self.max_variable_depth,
                false,
            ),
        );
        out.insert(
            "file".to_string(),
            reflect::reflect(
                "file",
                &input.file_path.clone().map(ReflectValue::Str).unwrap_or(ReflectValue::Null),
                depth,
                self.max_variable_depth,
                false,
            ),
        );
        out.insert(
            "line".to_string(),
            reflect::reflect("line", &ReflectValue::Int(input.line_number), depth, self.max_variable_depth, false),
        );

        for (name, value) in &input.fields {
            if RESERVED_EXCEPTION_FIELDS.contains(name) {
                continue;
            }
            let key = format!("prop:{name}");
            let redacted = redact::redact(value);
            out.insert(key.clone(), reflect::reflect(&key, &redacted, depth, self.max_variable_depth, false));
        }

        if let Some(previous) = &input.previous {
            let inner = self.exception_as_variables(previous, depth + 1, None);
            let mut node = reflect::reflect(
                "previous",
                &ReflectValue::Str(previous.message.clone().unwrap_or_default()),
                depth,
                self.max_variable_depth,
                false,
            );
            node.type_name = previous.exception_type.clone();
            node.children = Some(inner);
            out.insert("previous".to_string(), node);
        }

        if let Some(context) = context {
            if !context.query_params.is_empty() {
                out.insert("$GET".to_string(), reflect::reflect_capped_map("$GET", &redact_entries(&context.query_params), depth, self.max_variable_depth, MAX_REQUEST_PARAMS));
            }
            if !context.form_params.is_empty() {
                out.insert("$POST".to_string(), reflect::reflect_capped_map("$POST", &redact_entries(&context.form_params), depth, self.max_variable_depth, MAX_REQUEST_PARAMS));
            }
            if !context.session.is_empty() {
                out.insert("$SESSION".to_string(), reflect::reflect_capped_map("$SESSION", &redact_entries(&context.session), depth, self.max_variable_depth, MAX_SESSION_PARAMS));
            }
        }

        out
    }
}

/// Runs a keyed list of values through [`redact::redact`], returning the
/// redacted entries in the same order.
fn redact_entries(entries: &[(String, ReflectValue)]) -> Vec<(String, ReflectValue)> {
    match redact::redact(&ReflectValue::Map(entries.to_vec())) {
        ReflectValue::Map(redacted) => redacted,
        _ => unreachable!("redact() preserves the Map variant"),
    }
}
