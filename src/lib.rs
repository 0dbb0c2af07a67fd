//! In-process exception and snapshot monitoring agent with a remote
//! breakpoint registry and a bit-exact masked-frame transport.

pub mod agent;
pub mod breakpoints;
pub mod capture;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod redact;
pub mod reflect;
pub mod request_context;
pub mod stack;
pub mod telemetry;
pub mod transport;

pub use agent::{Agent, UserInfo};
pub use capture::{ExceptionInput, ExceptionRecord, Severity};
pub use config::Config;
pub use error::AgentError;
pub use reflect::{CapturedFields, ReflectValue, VariableNode};
pub use request_context::RequestContext;
pub use stack::{RawFrame, StackFrame};
