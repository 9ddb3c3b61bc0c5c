//! Unit tests for debug.rs (validation message routing, no GPU required)

use super::*;
use nova_3d_engine::nova3d::log::{LogEntry, Logger};
use serial_test::serial;
use std::sync::{Arc, Mutex};

// ============================================================================
// HELPERS
// ============================================================================

struct CaptureLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn install_capture() -> Arc<Mutex<Vec<LogEntry>>> {
    let entries = Arc::new(Mutex::new(Vec::new()));
    Engine::set_logger(CaptureLogger { entries: entries.clone() });
    entries
}

fn config(severity: DebugSeverity) -> DebugConfig {
    DebugConfig {
        severity,
        output: DebugOutput::Console,
        message_filter: DebugMessageFilter::default(),
        break_on_error: false,
        panic_on_error: false,
        enable_stats: true,
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[test]
fn test_message_level_picks_highest_bit() {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    assert_eq!(message_level(S::ERROR), MessageLevel::Error);
    assert_eq!(message_level(S::WARNING), MessageLevel::Warning);
    assert_eq!(message_level(S::INFO), MessageLevel::Info);
    assert_eq!(message_level(S::VERBOSE), MessageLevel::Verbose);
    assert_eq!(message_level(S::WARNING | S::ERROR), MessageLevel::Error);
}

#[test]
fn test_message_category() {
    use vk::DebugUtilsMessageTypeFlagsEXT as T;
    assert_eq!(message_category(T::VALIDATION), MessageCategory::Validation);
    assert_eq!(message_category(T::PERFORMANCE), MessageCategory::Performance);
    assert_eq!(message_category(T::GENERAL), MessageCategory::General);
    assert_eq!(message_category(T::VALIDATION | T::PERFORMANCE), MessageCategory::Validation);
}

#[test]
fn test_severity_flags() {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    assert_eq!(severity_flags(DebugSeverity::ErrorsOnly), S::ERROR);
    assert_eq!(severity_flags(DebugSeverity::ErrorsAndWarnings), S::ERROR | S::WARNING);
    assert!(severity_flags(DebugSeverity::All).contains(S::VERBOSE | S::INFO));
}

// ============================================================================
// FILTERING
// ============================================================================

#[test]
fn test_errors_only_filter() {
    let cfg = config(DebugSeverity::ErrorsOnly);
    assert!(should_display(&cfg, MessageLevel::Error, MessageCategory::Validation));
    assert!(!should_display(&cfg, MessageLevel::Warning, MessageCategory::Validation));
    assert!(!should_display(&cfg, MessageLevel::Verbose, MessageCategory::General));
}

#[test]
fn test_errors_and_warnings_filter() {
    let cfg = config(DebugSeverity::ErrorsAndWarnings);
    assert!(should_display(&cfg, MessageLevel::Warning, MessageCategory::General));
    assert!(!should_display(&cfg, MessageLevel::Info, MessageCategory::General));
}

#[test]
fn test_category_filter() {
    let mut cfg = config(DebugSeverity::All);
    cfg.message_filter.show_performance = false;
    assert!(!should_display(&cfg, MessageLevel::Error, MessageCategory::Performance));
    assert!(should_display(&cfg, MessageLevel::Verbose, MessageCategory::General));
}

// ============================================================================
// ROUTING
// ============================================================================

#[test]
#[serial]
fn test_handle_message_logs_through_engine() {
    let entries = install_capture();
    let cfg = config(DebugSeverity::All);
    init_debug_config(cfg.clone());

    let text = handle_message(&cfg, MessageLevel::Warning, MessageCategory::Validation, "VUID-test", "bad usage");
    assert!(text.is_some());

    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].severity, LogSeverity::Warn);
        assert_eq!(captured[0].source, VALIDATION_SOURCE);
        assert!(captured[0].message.contains("VUID-test"));
        assert!(captured[0].message.contains("bad usage"));
    }

    cleanup_debug_config();
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_filtered_message_is_not_counted() {
    let entries = install_capture();
    let cfg = config(DebugSeverity::ErrorsOnly);
    init_debug_config(cfg.clone());

    assert!(handle_message(&cfg, MessageLevel::Info, MessageCategory::General, "id", "noise").is_none());
    assert_eq!(validation_stats().total(), 0);
    assert!(entries.lock().unwrap().is_empty());

    cleanup_debug_config();
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_stats_count_per_severity() {
    let _entries = install_capture();
    let cfg = config(DebugSeverity::All);
    init_debug_config(cfg.clone());

    handle_message(&cfg, MessageLevel::Error, MessageCategory::Validation, "a", "one");
    handle_message(&cfg, MessageLevel::Warning, MessageCategory::Validation, "b", "two");
    handle_message(&cfg, MessageLevel::Warning, MessageCategory::Performance, "c", "three");
    handle_message(&cfg, MessageLevel::Verbose, MessageCategory::General, "d", "four");

    let stats = validation_stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.warnings, 2);
    assert_eq!(stats.info, 0);
    assert_eq!(stats.verbose, 1);
    assert_eq!(stats.total(), 4);

    // Re-initializing resets the counters
    init_debug_config(cfg);
    assert_eq!(validation_stats().total(), 0);

    cleanup_debug_config();
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_repeated_message_is_marked() {
    let _entries = install_capture();
    let cfg = config(DebugSeverity::All);
    init_debug_config(cfg.clone());

    let first = handle_message(&cfg, MessageLevel::Warning, MessageCategory::General, "id", "same").unwrap();
    let second = handle_message(&cfg, MessageLevel::Warning, MessageCategory::General, "id", "same").unwrap();
    assert!(!first.contains("[x"));
    assert!(second.contains("[x2]"));

    cleanup_debug_config();
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_panic_on_error_records_first_error() {
    let _entries = install_capture();
    let mut cfg = config(DebugSeverity::All);
    cfg.panic_on_error = true;
    init_debug_config(cfg.clone());

    handle_message(&cfg, MessageLevel::Warning, MessageCategory::Validation, "w", "warning only");
    assert!(take_pending_error().is_none());

    handle_message(&cfg, MessageLevel::Error, MessageCategory::Validation, "e1", "first");
    handle_message(&cfg, MessageLevel::Error, MessageCategory::Validation, "e2", "second");
    let pending = take_pending_error().unwrap();
    assert!(pending.contains("first"));
    assert!(take_pending_error().is_none());

    cleanup_debug_config();
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_file_output_appends() {
    let path = std::env::temp_dir().join(format!("nova3d_validation_{}.log", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let path_str = path.to_string_lossy().to_string();

    let entries = install_capture();
    let mut cfg = config(DebugSeverity::All);
    cfg.output = DebugOutput::File(path_str);
    init_debug_config(cfg.clone());

    handle_message(&cfg, MessageLevel::Error, MessageCategory::Validation, "VUID-file", "to disk");

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("VUID-file"));
    assert!(contents.contains("to disk"));
    assert!(entries.lock().unwrap().is_empty());

    let _ = std::fs::remove_file(&path);
    cleanup_debug_config();
    Engine::reset_logger();
}
