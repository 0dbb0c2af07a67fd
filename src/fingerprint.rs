use crate::stack::StackFrame;
use sha2::{Digest, Sha256};

/// Derives a stable dedup key for an exception from its type and the top
/// three frames of its stack. Missing class/method names contribute empty
/// strings rather than shifting the remaining fields.
pub fn fingerprint(exception_type: &str, trace: &[StackFrame]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(exception_type.as_bytes());
    for frame in trace.iter().take(3) {
        hasher.update(b":");
        hasher.update(frame.class_name.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"::");
        hasher.update(frame.method_name.as_deref().unwrap_or("").as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(class: &str, method: &str) -> StackFrame {
        StackFrame {
            class_name: Some(class.to_string()),
            method_name: Some(method.to_string()),
            file_path: None,
            file_name: None,
            line_number: 1,
            column_number: 0,
            is_native: false,
            local_variables: None,
        }
    }

    #[test]
    fn identical_inputs_fingerprint_identically() {
        let trace = vec![frame("A", "m")];
        assert_eq!(fingerprint("T", &trace), fingerprint("T", &trace));
    }

    #[test]
    fn different_types_fingerprint_differently() {
        let trace = vec![frame("A", "m")];
        assert_ne!(fingerprint("T1", &trace), fingerprint("T2", &trace));
    }

    #[test]
    fn only_top_three_frames_matter() {
        let mut trace = vec![frame("A", "m"), frame("B", "n"), frame("C", "o")];
        let base = fingerprint("T", &trace);
        trace.push(frame("D", "p"));
        assert_eq!(fingerprint("T", &trace), base);
    }

    #[test]
    fn missing_frame_fields_contribute_empty_strings() {
        let trace = vec![StackFrame {
            class_name: None,
            method_name: None,
            file_path: None,
            file_name: None,
            line_number: 0,
            column_number: 0,
            is_native: true,
            local_variables: None,
        }];
        let digest = fingerprint("T", &trace);
        assert_eq!(digest.len(), 64);
    }
}
