//! # Trace Sanitization
//!
//! Normalizes rendered traces so signatures are stable across machines, and
//! keeps webhook credentials out of local log output.

use std::path::Path;
use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholder substituted for the working directory in rendered traces
pub const CWD_PLACEHOLDER: &str = "CWD";

// Webhook token segment of an execute URL
static WEBHOOK_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(/webhooks/\d+/)[A-Za-z0-9_\-\.]+").unwrap()
});

/// Replaces every occurrence of the process working directory with `CWD`
pub fn normalize_trace(trace: &str) -> String {
    let cwd = std::env::current_dir().ok();
    normalize_paths(trace, cwd.as_deref())
}

/// Replaces every occurrence of `root` with `CWD`.
///
/// A missing or empty root leaves the trace untouched.
pub fn normalize_paths(trace: &str, root: Option<&Path>) -> String {
    match root.and_then(|p| p.to_str()).filter(|p| !p.is_empty()) {
        Some(root) => trace.replace(root, CWD_PLACEHOLDER),
        None => trace.to_string(),
    }
}

/// Redacts the token part of any webhook URL found in `text`
pub fn redact_webhook_token(text: &str) -> String {
    WEBHOOK_TOKEN.replace_all(text, "${1}[REDACTED]").to_string()
}
