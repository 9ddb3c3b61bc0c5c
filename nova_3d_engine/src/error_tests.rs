//! Unit tests for error.rs

use crate::error::{Error, Result};

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("vkQueueSubmit failed".to_string());
    let display = format!("{}", err);
    assert!(display.starts_with("Backend error"));
    assert!(display.contains("vkQueueSubmit failed"));
}

#[test]
fn test_out_of_memory_display() {
    assert_eq!(format!("{}", Error::OutOfMemory), "Out of GPU memory");
}

#[test]
fn test_invalid_resource_display() {
    let err = Error::InvalidResource("mesh handle is stale".to_string());
    assert_eq!(format!("{}", err), "Invalid resource: mesh handle is stale");
}

#[test]
fn test_invalid_state_display() {
    let err = Error::InvalidState("no frame in progress".to_string());
    assert_eq!(format!("{}", err), "Invalid state: no frame in progress");
}

#[test]
fn test_initialization_failed_display() {
    let err = Error::InitializationFailed("no Vulkan device".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Initialization failed"));
    assert!(display.contains("no Vulkan device"));
}

// ============================================================================
// TRAIT IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_error_is_std_error() {
    let err = Error::OutOfMemory;
    let as_dyn: &dyn std::error::Error = &err;
    assert!(as_dyn.source().is_none());
}

#[test]
fn test_error_clone_keeps_message() {
    let err = Error::BackendError("lost".to_string());
    match err.clone() {
        Error::BackendError(msg) => assert_eq!(msg, "lost"),
        other => panic!("unexpected variant {:?}", other),
    }
}

#[test]
fn test_result_question_mark_propagation() {
    fn inner() -> Result<u32> {
        Err(Error::InvalidState("closed".to_string()))
    }
    fn outer() -> Result<u32> {
        let value = inner()?;
        Ok(value + 1)
    }
    assert!(matches!(outer(), Err(Error::InvalidState(_))));
}
