use surfkin_core::errors::{ErrorInfo, KinError};
use surfkin_core::serde::{from_json_slice, to_canonical_json_bytes};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("parameter", "x_O2")
        .with_context("reason", "example")
}

#[test]
fn dependency_error_surface() {
    let err = KinError::ParameterDependency(sample_info("param-unbound", "x_CO is not bound"));
    assert_eq!(err.info().code, "param-unbound");
    assert!(err.info().context.contains_key("parameter"));
    assert!(!err.is_engine_unavailable());
}

#[test]
fn engine_unavailable_is_distinguishable() {
    let err = KinError::EngineUnavailable(
        ErrorInfo::new("engine-missing", "executable not found").with_hint("check PATH"),
    );
    assert!(err.is_engine_unavailable());
    let rendered = err.to_string();
    assert!(rendered.contains("engine-missing"));
    assert!(rendered.contains("hint: check PATH"));
}

#[test]
fn errors_roundtrip_through_json() {
    let err = KinError::ReplicaFailure(sample_info("replica-none-succeeded", "all failed"));
    let bytes = to_canonical_json_bytes(&err).unwrap();
    let restored: KinError = from_json_slice(&bytes).unwrap();
    assert_eq!(err, restored);
}

#[test]
fn canonical_json_sorts_keys() {
    let value = serde_json::json!({"b": 1, "a": {"d": 2, "c": 3}});
    let bytes = to_canonical_json_bytes(&value).unwrap();
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        r#"{"a":{"c":3,"d":2},"b":1}"#
    );
}
