//! Fault surfacing through the facade: execution keeps going after a
//! runtime fault, and the last captured fault comes back with the partial
//! device state.

use binform::{Codec, CodecError, RuntimeFault, Schema, StructureError, Value};
use serde_json::json;

fn codec(schema: serde_json::Value) -> Codec {
    let schema: Schema = serde_json::from_value(schema).unwrap();
    Codec::new(schema).unwrap()
}

fn value(json: serde_json::Value) -> Value {
    serde_json::from_value(json).unwrap()
}

#[test]
fn test_truncated_input_surfaces_the_fault_with_partial_state() {
    let codec = codec(json!({
        "formats": {
            "simple": { "fields": [ { "name": "number", "type": "int16" } ] }
        }
    }));

    let result = codec.read("simple", &[5]);
    let fault = match result {
        Err(CodecError::Execution(fault)) => fault,
        other => panic!("expected an execution fault, got {other:?}"),
    };
    assert!(matches!(fault.fault, RuntimeFault::EndOfStream { .. }));
    // the struct was allocated and initialized before the stream ran dry
    assert_eq!(fault.structs.len(), 1);
    assert_eq!(fault.structs[0].type_name, "simple");
    assert_eq!(fault.structs[0].fields["number"], vec![0]);
}

#[test]
fn test_a_short_array_write_keeps_the_partial_bytes() {
    let codec = codec(json!({
        "formats": {
            "simple": {
                "fields": [ { "name": "nums", "type": "int8", "size": 4 } ]
            }
        }
    }));

    // two slots supplied for a four-element array: the first two bytes land,
    // the remaining iterations fault on the missing slots
    let result = codec.write("simple", &value(json!({ "nums": [1, 2] })));
    let fault = match result {
        Err(CodecError::Execution(fault)) => fault,
        other => panic!("expected an execution fault, got {other:?}"),
    };
    assert!(matches!(fault.fault, RuntimeFault::NoSuchSlot { slot: 3, .. }));
    assert_eq!(fault.bytes, vec![1, 2]);
}

#[test]
fn test_the_step_limit_bounds_execution() {
    let codec = codec(json!({
        "formats": {
            "simple": { "fields": [ { "name": "number", "type": "int8" } ] }
        }
    }))
    .with_step_limit(3);

    let result = codec.read("simple", &[1]);
    let fault = match result {
        Err(CodecError::Execution(fault)) => fault,
        other => panic!("expected an execution fault, got {other:?}"),
    };
    assert!(matches!(fault.fault, RuntimeFault::StepLimitExceeded(3)));
}

#[test]
fn test_a_missing_record_field_is_a_structure_error() {
    let codec = codec(json!({
        "formats": {
            "simple": {
                "fields": [
                    { "name": "a", "type": "int8" },
                    { "name": "b", "type": "int8" }
                ]
            }
        }
    }));

    let result = codec.write("simple", &value(json!({ "a": 1 })));
    assert!(matches!(
        result,
        Err(CodecError::Structure(StructureError::MissingField(name))) if name == "b"
    ));
}

#[test]
fn test_writing_an_unknown_format_is_a_structure_error() {
    let codec = codec(json!({
        "formats": {
            "simple": { "fields": [ { "name": "number", "type": "int8" } ] }
        }
    }));

    // destructurizing runs before the link, so the unknown name fails there
    let result = codec.write("missing", &value(json!({ "number": 1 })));
    assert!(matches!(
        result,
        Err(CodecError::Structure(StructureError::UnknownFormat(name))) if name == "missing"
    ));
}

#[test]
fn test_a_bad_schema_fails_at_construction() {
    let schema: Schema = serde_json::from_value(json!({
        "formats": {
            "simple": { "fields": [ { "name": "number", "type": "int12" } ] }
        }
    }))
    .unwrap();

    assert!(Codec::new(schema).is_err());
}
