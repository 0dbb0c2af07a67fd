use crate::breakpoints::BreakpointRegistry;
use crate::capture::{ExceptionCapture, ExceptionInput, Severity};
use crate::config::Config;
use crate::error::AgentError;
use crate::reflect::ReflectValue;
use crate::redact;
use crate::request_context::RequestContext;
use crate::stack::RawFrame;
use crate::transport::{InboundEvent, Transport};
use std::collections::BTreeMap;
use std::panic::PanicHookInfo;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

/// `id`/`email`/`username` attached to every subsequent capture.
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub id: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
}

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

struct AgentInner {
    config: Config,
    capture: ExceptionCapture,
    registry: BreakpointRegistry,
    transport: Transport,
    custom_context: BTreeMap<String, ReflectValue>,
    user: Option<UserInfo>,
    previous_panic_hook: Option<PanicHook>,
    last_connect_attempt: Option<Instant>,
}

static AGENT: OnceLock<Mutex<Option<AgentInner>>> = OnceLock::new();

fn cell() -> &'static Mutex<Option<AgentInner>> {
    AGENT.get_or_init(|| Mutex::new(None))
}

fn agent_id(hostname: &str) -> String {
    let mut suffix = [0u8; 4];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut suffix);
    let hex: String = suffix.iter().map(|b| format!("{b:02x}")).collect();
    format!("{hostname}-{hex}-{}", std::process::id())
}

/// Process-wide singleton entry points. `init`/`shutdown` are idempotent;
/// every other method is a no-op before `init` or after `shutdown`.
pub struct Agent;

impl Agent {
    /// Builds `Config` from the environment and installs the agent.
    /// Calling `init` a second time logs and returns `Ok(())` without
    /// rebuilding state.
    pub fn init() -> Result<(), AgentError> {
        let config = Config::from_env()?;
        Self::init_with_config(config)
    }

    /// Installs the agent with an explicit, already-validated `Config`.
    pub fn init_with_config(config: Config) -> Result<(), AgentError> {
        let mut guard = cell().lock().unwrap();
        if guard.is_some() {
            tracing::warn!("Agent::init called while already initialized; ignoring");
            return Ok(());
        }

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
        let id = agent_id(&hostname);

        let mut transport = Transport::new(
            &config.backend_url,
            &config.api_key,
            &config.environment,
            config.application_name.clone(),
            id,
            config.max_reconnect_attempts,
        );
        if let Err(e) = transport.connect() {
            tracing::debug!(error = %e, "initial connect failed, will retry via process_messages");
        }

        let previous_panic_hook: PanicHook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            Self::handle_panic(info);
        }));

        let capture = ExceptionCapture::new(config.max_variable_depth);
        let registry = BreakpointRegistry::new();

        *guard = Some(AgentInner {
            config,
            capture,
            registry,
            transport,
            custom_context: BTreeMap::new(),
            user: None,
            previous_panic_hook: Some(previous_panic_hook),
            last_connect_attempt: Some(Instant::now()),
        });
        Ok(())
    }

    fn handle_panic(info: &PanicHookInfo<'_>) {
        let mut guard = cell().lock().unwrap();
        if let Some(inner) = guard.as_mut() {
            let message = info.payload().downcast_ref::<&str>().map(|s| s.to_string()).or_else(|| info.payload().downcast_ref::<String>().cloned());
            let (file_path, line_number) = info
                .location()
                .map(|l| (Some(l.file().to_string()), l.line() as i64))
                .unwrap_or((None, 0));

            let input = ExceptionInput {
                exception_type: "panic".to_string(),
                message,
                file_path,
                line_number,
                ..Default::default()
            };
            if let Some(record) = inner.capture.capture(&input, None) {
                if let Ok(payload) = serde_json::to_value(&record) {
                    let _ = inner.transport.send("exception", payload);
                }
            }
            if let Some(previous) = &inner.previous_panic_hook {
                previous(info);
            }
        }
    }

    /// Captures an uncaught/manual exception. Merges `customContext`, the
    /// call-supplied `context`, and the current user into the emitted
    /// payload's `request_context`/`user` fields.
    pub fn capture_exception(input: &ExceptionInput, context: Option<RequestContext>) {
        let mut guard = cell().lock().unwrap();
        let Some(inner) = guard.as_mut() else { return };
        let ctx = context.unwrap_or_default();
        if let Some(record) = inner.capture.capture(input, Some(&ctx)) {
            Self::send_record(inner, "exception", record);
        }
    }

    /// Reports an error-hook event (warning/notice/deprecated/fatal),
    /// subject to `samplingRate`.
    pub fn report(severity: Severity, input: &ExceptionInput, context: Option<RequestContext>) {
        let mut guard = cell().lock().unwrap();
        let Some(inner) = guard.as_mut() else { return };
        let ctx = context.unwrap_or_default();
        let rate = inner.config.sampling_rate;
        if let Some(record) = inner.capture.report(severity, input, Some(&ctx), rate) {
            Self::send_record(inner, "exception", record);
        }
    }

    fn send_record(inner: &mut AgentInner, type_: &str, record: crate::capture::ExceptionRecord) {
        let mut payload = match serde_json::to_value(&record) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "failed to serialize exception record");
                return;
            }
        };
        if let Some(obj) = payload.as_object_mut() {
            if let Some(ctx_value) = redacted_custom_context_json(&inner.custom_context) {
                obj.insert("custom_context".to_string(), ctx_value);
            }
            if let Some(user) = &inner.user {
                obj.insert(
                    "user".to_string(),
                    serde_json::json!({ "id": user.id, "email": user.email, "username": user.username }),
                );
            }
        }
        if let Err(e) = inner.transport.send(type_, payload) {
            tracing::debug!(error = %e, "failed to send envelope");
        }
    }

    /// Merges `context` into the persistent custom context attached to
    /// every subsequent capture.
    pub fn set_context(context: Vec<(String, ReflectValue)>) {
        let mut guard = cell().lock().unwrap();
        let Some(inner) = guard.as_mut() else { return };
        for (key, value) in context {
            inner.custom_context.insert(key, value);
        }
    }

    /// Replaces the current user identity.
    pub fn set_user(user: UserInfo) {
        let mut guard = cell().lock().unwrap();
        let Some(inner) = guard.as_mut() else { return };
        inner.user = Some(user);
    }

    /// Fires a breakpoint hit, subject to its hit budget and the shared
    /// rate limiter.
    pub fn breakpoint(id: &str, frames: &[RawFrame], args: &[(String, ReflectValue)]) {
        let mut guard = cell().lock().unwrap();
        let Some(inner) = guard.as_mut() else { return };
        if !inner.config.enable_breakpoints {
            return;
        }
        let max_depth = inner.config.max_variable_depth;
        if let Some(hit) = inner.registry.hit(id, frames, max_depth, args) {
            let payload = serde_json::json!({
                "breakpoint_id": hit.breakpoint_id,
                "file_path": hit.file_path,
                "line_number": hit.line_number,
                "stack_trace": hit.stack_trace,
                "hit_count": hit.hit_count,
            });
            if let Err(e) = inner.transport.send("breakpoint_hit", payload) {
                tracing::debug!(error = %e, "failed to send breakpoint hit");
            }
        }
    }

    /// Drains at most one inbound frame, applies any `set_breakpoint`/
    /// `remove_breakpoint` commands, and attempts a reconnect if the
    /// backoff delay for the last attempt has elapsed. Intended to be
    /// polled by the host at whatever cadence it chooses.
    pub fn process_messages() {
        let mut guard = cell().lock().unwrap();
        let Some(inner) = guard.as_mut() else { return };

        match inner.transport.process_messages() {
            Ok(events) => {
                for event in events {
                    match event {
                        InboundEvent::SetBreakpoint { id, file_path, line_number, condition, max_hits } => {
                            inner.registry.set_breakpoint(&id, &file_path, line_number, condition, max_hits);
                        }
                        InboundEvent::RemoveBreakpoint { id } => {
                            inner.registry.remove_breakpoint(&id);
                        }
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, "inbound read failed"),
        }

        if !inner.transport.is_connected() && !inner.transport.is_latched() && inner.transport.reconnect_attempts() < inner.transport.max_reconnect_attempts() {
            let due = inner
                .last_connect_attempt
                .map(|t| t.elapsed() >= inner.transport.next_reconnect_delay())
                .unwrap_or(true);
            if due {
                inner.last_connect_attempt = Some(Instant::now());
                inner.transport.record_reconnect_attempt();
                if let Err(e) = inner.transport.connect() {
                    tracing::debug!(error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    /// Emits a heartbeat envelope. Cadence is the host's responsibility.
    pub fn heartbeat() {
        let mut guard = cell().lock().unwrap();
        let Some(inner) = guard.as_mut() else { return };
        let (memory_mb, peak_memory_mb) = process_memory_mb();
        let payload = serde_json::json!({ "metrics": { "memory_mb": memory_mb, "peak_memory_mb": peak_memory_mb } });
        if let Err(e) = inner.transport.send("heartbeat", payload) {
            tracing::debug!(error = %e, "failed to send heartbeat");
        }
    }

    pub fn is_initialized() -> bool {
        cell().lock().unwrap().is_some()
    }

    pub fn is_connected() -> bool {
        cell().lock().unwrap().as_ref().map(|inner| inner.transport.is_connected()).unwrap_or(false)
    }

    /// Uninstalls hooks, disconnects the transport, and clears the
    /// singleton. Cooperative: does not block on in-flight I/O.
    pub fn shutdown() {
        let mut guard = cell().lock().unwrap();
        if let Some(mut inner) = guard.take() {
            if let Some(previous) = inner.previous_panic_hook.take() {
                std::panic::set_hook(previous);
            } else {
                let _ = std::panic::take_hook();
            }
            inner.transport.disconnect();
        }
    }
}

/// Redacts sensitive keys out of the persistent custom context before it
/// goes on the wire. Returns `None` for an empty map so callers skip the
/// `custom_context` key entirely rather than emitting `{}`.
fn redacted_custom_context_json(custom_context: &BTreeMap<String, ReflectValue>) -> Option<serde_json::Value> {
    if custom_context.is_empty() {
        return None;
    }
    let entries: Vec<(String, ReflectValue)> = custom_context.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let ReflectValue::Map(redacted) = redact::redact(&ReflectValue::Map(entries)) else {
        unreachable!("redact() preserves the Map variant");
    };
    let map: BTreeMap<String, serde_json::Value> = redacted.into_iter().map(|(k, v)| (k, reflect_value_to_json(&v))).collect();
    serde_json::to_value(map).ok()
}

/// Current and peak resident set size in MB, read from `/proc/self/status`.
/// Linux-only; returns `(0.0, 0.0)` on any other platform or if the file
/// can't be read, since Rust's stdlib has no portable process-memory API.
#[cfg(target_os = "linux")]
fn process_memory_mb() -> (f64, f64) {
    match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => {
            let rss = parse_vm_status_kb(&status, "VmRSS:").unwrap_or(0.0);
            let peak = parse_vm_status_kb(&status, "VmHWM:").unwrap_or(rss);
            (rss / 1024.0, peak / 1024.0)
        }
        Err(e) => {
            tracing::debug!(error = %e, "could not read /proc/self/status for heartbeat metrics");
            (0.0, 0.0)
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn process_memory_mb() -> (f64, f64) {
    tracing::debug!("process memory metrics are only available on linux; reporting 0.0");
    (0.0, 0.0)
}

#[cfg(target_os = "linux")]
fn parse_vm_status_kb(status: &str, field: &str) -> Option<f64> {
    let line = status.lines().find(|l| l.starts_with(field))?;
    line.trim_start_matches(field).trim().split_whitespace().next()?.parse::<f64>().ok()
}

fn reflect_value_to_json(value: &ReflectValue) -> serde_json::Value {
    match value {
        ReflectValue::Null => serde_json::Value::Null,
        ReflectValue::Bool(b) => serde_json::Value::Bool(*b),
        ReflectValue::Int(i) => serde_json::json!(i),
        ReflectValue::Float(f) => serde_json::json!(f),
        ReflectValue::Str(s) => serde_json::Value::String(s.clone()),
        ReflectValue::Seq(items) => serde_json::Value::Array(items.iter().map(reflect_value_to_json).collect()),
        ReflectValue::Map(entries) => {
            serde_json::Value::Object(entries.iter().map(|(k, v)| (k.clone(), reflect_value_to_json(v))).collect())
        }
        ReflectValue::Object { type_name } => serde_json::Value::String(type_name.clone()),
        ReflectValue::Other(name) => serde_json::Value::String(format!("[{name}]")),
    }
}
