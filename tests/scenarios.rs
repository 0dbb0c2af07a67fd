use aivory_agent::capture::ExceptionCapture;
use aivory_agent::{RawFrame, ReflectValue};
use aivory_agent::redact::redact;
use aivory_agent::reflect::reflect;
use aivory_agent::breakpoints::BreakpointRegistry;

fn frame(class: &str, method: &str, file: &str, line: i64) -> RawFrame {
    RawFrame {
        class_name: Some(class.to_string()),
        method_name: Some(method.to_string()),
        file_path: Some(file.to_string()),
        line_number: line,
        column_number: 0,
        args: Vec::new(),
    }
}

// S1 - basic capture: emits a fully populated record.
#[test]
fn s1_basic_capture() {
    let mut capture = ExceptionCapture::new(3);
    let input = aivory_agent::ExceptionInput {
        exception_type: "T".to_string(),
        message: Some("boom".to_string()),
        file_path: Some("f.x".to_string()),
        line_number: 42,
        method_name: Some("m".to_string()),
        class_name: Some("A".to_string()),
        frames: vec![frame("A", "m", "f.x", 42)],
        ..Default::default()
    };

    let record = capture.capture(&input, None).expect("first capture emits");
    assert_eq!(record.exception_type, "T");
    assert_eq!(record.message.as_deref(), Some("boom"));
    assert_eq!(record.file_path.as_deref(), Some("f.x"));
    assert_eq!(record.line_number, 42);
    assert_eq!(record.severity, "error");
    assert_eq!(record.stack_trace[0].method_name.as_deref(), Some("m"));
    assert_eq!(record.stack_trace[0].class_name.as_deref(), Some("A"));
    assert_eq!(record.stack_trace[0].line_number, 42);
}

// S2 - dedup: the same exception captured twice emits once.
#[test]
fn s2_dedup_suppresses_repeat() {
    let mut capture = ExceptionCapture::new(3);
    let input = aivory_agent::ExceptionInput {
        exception_type: "T".to_string(),
        frames: vec![frame("A", "m", "f.x", 42)],
        ..Default::default()
    };

    assert!(capture.capture(&input, None).is_some());
    assert!(capture.capture(&input, None).is_none());
}

// S3 - redaction: sensitive keys are replaced, others preserved.
#[test]
fn s3_redaction_preserves_non_sensitive_keys() {
    let context = ReflectValue::Map(vec![
        ("user".to_string(), ReflectValue::Map(vec![("id".to_string(), ReflectValue::Str("u".to_string()))])),
        ("password".to_string(), ReflectValue::Str("hunter2".to_string())),
        ("card".to_string(), ReflectValue::Map(vec![("cvv".to_string(), ReflectValue::Str("123".to_string()))])),
    ]);

    let ReflectValue::Map(redacted) = redact(&context) else { panic!("expected map") };
    let as_map: std::collections::HashMap<_, _> = redacted.into_iter().collect();

    let ReflectValue::Str(password) = &as_map["password"] else { panic!() };
    assert_eq!(password, "[REDACTED]");

    let ReflectValue::Map(card) = &as_map["card"] else { panic!() };
    let ReflectValue::Str(cvv) = &card[0].1 else { panic!() };
    assert_eq!(cvv, "[REDACTED]");

    let ReflectValue::Map(user) = &as_map["user"] else { panic!() };
    let ReflectValue::Str(id) = &user[0].1 else { panic!() };
    assert_eq!(id, "u");
}

// S4 - truncation: a 600-char string caps at 200 bytes with an ellipsis.
#[test]
fn s4_long_string_truncates_at_200() {
    let value = ReflectValue::Str("x".repeat(600));
    let node = reflect("field", &value, 0, 10, false);
    assert!(node.is_truncated);
    assert_eq!(node.value.as_ref().unwrap().len(), 203);
    assert!(node.value.as_ref().unwrap().ends_with("..."));
}

// S5 - breakpoint gated until registered, then capped at max_hits.
#[test]
fn s5_breakpoint_gated_until_set_then_capped() {
    let mut registry = BreakpointRegistry::new();
    let frames = vec![frame("A", "m", "f", 7), frame("B", "n", "f", 7), frame("C", "o", "f", 7)];

    assert!(registry.hit("X", &frames, 3, &[]).is_none(), "unset breakpoint never fires");

    registry.set_breakpoint("X", "f", 7, None, 2);

    let hit1 = registry.hit("X", &frames, 3, &[]).expect("first hit fires");
    assert_eq!(hit1.hit_count, 1);
    let hit2 = registry.hit("X", &frames, 3, &[]).expect("second hit fires");
    assert_eq!(hit2.hit_count, 2);
    assert!(registry.hit("X", &frames, 3, &[]).is_none(), "third hit exceeds max_hits");
}
