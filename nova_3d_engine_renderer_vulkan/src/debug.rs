/// Vulkan debug messenger - validation layer messages
///
/// Messages are filtered by severity and category, counted, and forwarded to
/// the engine logger (source `nova3d::vulkan::validation`) and/or appended to
/// a file. Only compiled with the `vulkan-validation` feature.

use ash::vk;
use colored::*;
use nova_3d_engine::nova3d::Engine;
use nova_3d_engine::nova3d::log::LogSeverity;
use nova_3d_engine::nova3d::render::{DebugMessageFilter, DebugOutput, DebugSeverity, ValidationStats};
use rustc_hash::FxHashMap;
use std::ffi::CStr;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

pub(crate) const VALIDATION_SOURCE: &str = "nova3d::vulkan::validation";

/// Callback configuration, installed when the device is created
static DEBUG_CONFIG: Mutex<Option<DebugConfig>> = Mutex::new(None);

static VALIDATION_STATS: ValidationStatsTracker = ValidationStatsTracker::new();

/// Occurrence count per distinct message text
static MESSAGE_COUNTS: Mutex<Option<FxHashMap<String, u32>>> = Mutex::new(None);

/// First validation error seen while `panic_on_error` is set
static PENDING_ERROR: Mutex<Option<String>> = Mutex::new(None);

/// Debug callback configuration (taken from the device `Config`)
#[derive(Debug, Clone)]
pub(crate) struct DebugConfig {
    pub severity: DebugSeverity,
    pub output: DebugOutput,
    pub message_filter: DebugMessageFilter,
    pub break_on_error: bool,
    pub panic_on_error: bool,
    pub enable_stats: bool,
}

/// Severity of one message, as reported by the layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageLevel {
    Error,
    Warning,
    Info,
    Verbose,
}

/// Category of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageCategory {
    General,
    Validation,
    Performance,
}

struct ValidationStatsTracker {
    errors: AtomicU32,
    warnings: AtomicU32,
    info: AtomicU32,
    verbose: AtomicU32,
}

impl ValidationStatsTracker {
    const fn new() -> Self {
        Self {
            errors: AtomicU32::new(0),
            warnings: AtomicU32::new(0),
            info: AtomicU32::new(0),
            verbose: AtomicU32::new(0),
        }
    }

    fn increment(&self, level: MessageLevel) {
        let counter = match level {
            MessageLevel::Error => &self.errors,
            MessageLevel::Warning => &self.warnings,
            MessageLevel::Info => &self.info,
            MessageLevel::Verbose => &self.verbose,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ValidationStats {
        ValidationStats {
            errors: self.errors.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            info: self.info.load(Ordering::Relaxed),
            verbose: self.verbose.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.errors.store(0, Ordering::Relaxed);
        self.warnings.store(0, Ordering::Relaxed);
        self.info.store(0, Ordering::Relaxed);
        self.verbose.store(0, Ordering::Relaxed);
    }
}

/// Poison-tolerant lock: a panicking logger must not disable validation output
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Install the callback configuration and reset counters
pub(crate) fn init_debug_config(config: DebugConfig) {
    VALIDATION_STATS.reset();
    *lock(&MESSAGE_COUNTS) = Some(FxHashMap::default());
    *lock(&PENDING_ERROR) = None;
    *lock(&DEBUG_CONFIG) = Some(config);
}

/// Remove the configuration; later callbacks are ignored
pub(crate) fn cleanup_debug_config() {
    *lock(&DEBUG_CONFIG) = None;
    *lock(&MESSAGE_COUNTS) = None;
}

/// Current validation counters (all zero unless `enable_validation_stats` is set)
pub fn validation_stats() -> ValidationStats {
    VALIDATION_STATS.snapshot()
}

/// Validation error recorded under `panic_on_error`, cleared on read
pub(crate) fn take_pending_error() -> Option<String> {
    lock(&PENDING_ERROR).take()
}

/// Print the counters to stdout
pub fn print_validation_stats_report() {
    let stats = validation_stats();

    if stats.total() == 0 {
        println!("\n{}", "No validation messages".green().bold());
        return;
    }

    println!("\n{}", "=== Validation Statistics ===".bright_blue().bold());
    if stats.errors > 0 {
        println!("  {} {}", "Errors:".red().bold(), stats.errors);
    }
    if stats.warnings > 0 {
        println!("  {} {}", "Warnings:".yellow().bold(), stats.warnings);
    }
    if stats.info > 0 {
        println!("  {} {}", "Info:".cyan(), stats.info);
    }
    if stats.verbose > 0 {
        println!("  {} {}", "Verbose:".bright_black(), stats.verbose);
    }
    println!("  {} {}", "Total:".white().bold(), stats.total());

    let repeated = lock(&MESSAGE_COUNTS)
        .as_ref()
        .map_or(0, |counts| counts.values().filter(|&&count| count > 1).count());
    if repeated > 0 {
        println!("  {} message(s) appeared more than once", repeated);
    }
    println!("{}\n", "=============================".bright_blue().bold());
}

// ===== FILTERING =====

pub(crate) fn message_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> MessageLevel {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        MessageLevel::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        MessageLevel::Warning
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        MessageLevel::Info
    } else {
        MessageLevel::Verbose
    }
}

pub(crate) fn message_category(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> MessageCategory {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        MessageCategory::Validation
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        MessageCategory::Performance
    } else {
        MessageCategory::General
    }
}

/// Severity and category filter
pub(crate) fn should_display(config: &DebugConfig, level: MessageLevel, category: MessageCategory) -> bool {
    let severity_ok = match config.severity {
        DebugSeverity::ErrorsOnly => level == MessageLevel::Error,
        DebugSeverity::ErrorsAndWarnings => matches!(level, MessageLevel::Error | MessageLevel::Warning),
        DebugSeverity::All => true,
    };
    let category_ok = match category {
        MessageCategory::General => config.message_filter.show_general,
        MessageCategory::Validation => config.message_filter.show_validation,
        MessageCategory::Performance => config.message_filter.show_performance,
    };
    severity_ok && category_ok
}

/// Severity filter handed to the messenger create info
pub(crate) fn severity_flags(severity: DebugSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    let errors = vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    match severity {
        DebugSeverity::ErrorsOnly => errors,
        DebugSeverity::ErrorsAndWarnings => errors | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
        DebugSeverity::All => {
            errors
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        }
    }
}

fn log_severity(level: MessageLevel) -> LogSeverity {
    match level {
        MessageLevel::Error => LogSeverity::Error,
        MessageLevel::Warning => LogSeverity::Warn,
        MessageLevel::Info => LogSeverity::Info,
        MessageLevel::Verbose => LogSeverity::Trace,
    }
}

/// Route one message according to `config`; returns the text that was emitted
pub(crate) fn handle_message(
    config: &DebugConfig,
    level: MessageLevel,
    category: MessageCategory,
    message_id: &str,
    message: &str,
) -> Option<String> {
    if !should_display(config, level, category) {
        return None;
    }

    let occurrences = if config.enable_stats {
        VALIDATION_STATS.increment(level);
        let mut counts = lock(&MESSAGE_COUNTS);
        let count = counts.get_or_insert_with(FxHashMap::default).entry(message.to_string()).or_insert(0);
        *count += 1;
        *count
    } else {
        1
    };
    let repeat = if occurrences > 1 { format!(" [x{}]", occurrences) } else { String::new() };
    let text = format!("[{:?}] {}{}: {}", category, message_id, repeat, message);

    match &config.output {
        DebugOutput::Console => Engine::log(log_severity(level), VALIDATION_SOURCE, text.clone()),
        DebugOutput::File(path) => write_to_file(path, level, &text),
        DebugOutput::Both(path) => {
            Engine::log(log_severity(level), VALIDATION_SOURCE, text.clone());
            write_to_file(path, level, &text);
        }
    }

    if level == MessageLevel::Error {
        if config.break_on_error {
            eprintln!("{} {}", "Validation error, aborting:".red().bold(), text);
            std::process::abort();
        }
        if config.panic_on_error {
            lock(&PENDING_ERROR).get_or_insert_with(|| text.clone());
        }
    }
    Some(text)
}

fn write_to_file(path: &str, level: MessageLevel, text: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "[{:?}] {}", level, text);
    }
}

unsafe fn c_str_or<'a>(ptr: *const std::os::raw::c_char, fallback: &'a str) -> std::borrow::Cow<'a, str> {
    if ptr.is_null() {
        std::borrow::Cow::Borrowed(fallback)
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

/// Messenger callback registered with VK_EXT_debug_utils
///
/// Never unwinds: panics requested by `panic_on_error` are raised later by the
/// device, outside the driver call.
pub(crate) unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let Some(config) = lock(&DEBUG_CONFIG).clone() else {
        return vk::FALSE;
    };

    let callback_data = &*p_callback_data;
    let message_id = c_str_or(callback_data.p_message_id_name, "Unknown");
    let message = c_str_or(callback_data.p_message, "No message");

    let _ = std::panic::catch_unwind(|| {
        handle_message(
            &config,
            message_level(message_severity),
            message_category(message_type),
            &message_id,
            &message,
        )
    });

    vk::FALSE
}

#[cfg(test)]
#[path = "debug_tests.rs"]
mod tests;
