//! # Failure Capture
//!
//! A [`Failure`] is the relay's view of one raised error: its type, message,
//! cause chain and the stack it was captured on. Rendering a failure produces
//! the trace text that, once normalized, becomes its signature.

use std::error::Error as StdError;
use std::fmt;
use std::fmt::Write as _;
use std::panic::{Location, PanicInfo};
use std::sync::Arc;

use backtrace::Backtrace;

// Frames from the capture machinery itself are noise in every report
const SKIPPED_FRAME_PREFIXES: &[&str] = &[
    "backtrace::",
    "error_relay::failure::",
    "std::panicking::",
    "core::panicking::",
];

/// A captured error, ready to be rendered into a signature
#[derive(Clone)]
pub struct Failure {
    type_name: String,
    message: String,
    causes: Vec<String>,
    location: Option<String>,
    backtrace: Option<Arc<Backtrace>>,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Failure {
    /// Captures an error together with the current stack
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let causes = source_chain(&error);
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            causes,
            location: None,
            backtrace: Some(Arc::new(Backtrace::new())),
            source: Some(Arc::new(error)),
        }
    }

    /// Captures an `anyhow::Error`, keeping its whole context chain
    pub fn from_anyhow(error: anyhow::Error) -> Self {
        let causes = error.chain().skip(1).map(|c| c.to_string()).collect();
        let message = error.to_string();
        let boxed: Box<dyn StdError + Send + Sync + 'static> = error.into();
        Self {
            type_name: "anyhow::Error".to_string(),
            message,
            causes,
            location: None,
            backtrace: Some(Arc::new(Backtrace::new())),
            source: Some(Arc::from(boxed)),
        }
    }

    /// Captures a panic from inside a panic hook
    pub fn from_panic(info: &PanicInfo<'_>) -> Self {
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        Self {
            type_name: "panic".to_string(),
            message,
            causes: Vec::new(),
            location: info.location().map(format_location),
            backtrace: Some(Arc::new(Backtrace::new())),
            source: None,
        }
    }

    /// Builds a failure from a message alone, without a captured stack
    pub fn message<S: Into<String>>(type_name: &str, message: S) -> Self {
        Self {
            type_name: type_name.to_string(),
            message: message.into(),
            causes: Vec::new(),
            location: None,
            backtrace: None,
            source: None,
        }
    }

    /// Drops the captured stack so the rendered trace is only the error chain
    pub fn without_backtrace(mut self) -> Self {
        self.backtrace = None;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn message_text(&self) -> &str {
        &self.message
    }

    pub fn causes(&self) -> &[String] {
        &self.causes
    }

    /// The original error object, if the failure was built from one
    pub fn source(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Renders the full trace text: header, cause chain, then stack frames
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}\n", self.type_name, self.message);

        if let Some(location) = &self.location {
            let _ = writeln!(out, "  panicked at {}", location);
        }

        if !self.causes.is_empty() {
            out.push_str("\nCaused by:\n");
            for (i, cause) in self.causes.iter().enumerate() {
                let _ = writeln!(out, "  {:>2}: {}", i, cause);
            }
        }

        if let Some(backtrace) = &self.backtrace {
            out.push_str("\nStack backtrace:\n");
            render_frames(&mut out, backtrace);
        }

        out
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("type_name", &self.type_name)
            .field("message", &self.message)
            .field("causes", &self.causes)
            .field("location", &self.location)
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        Self::from_anyhow(error)
    }
}

fn source_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = error.source();
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    causes
}

fn format_location(location: &Location<'_>) -> String {
    format!("{}:{}:{}", location.file(), location.line(), location.column())
}

// Symbol names plus file:line only, so identical call sites render identically
fn render_frames(out: &mut String, backtrace: &Backtrace) {
    let mut index = 0usize;
    for frame in backtrace.frames() {
        for symbol in frame.symbols() {
            let name = match symbol.name() {
                Some(name) => format!("{:#}", name),
                None => continue,
            };
            if SKIPPED_FRAME_PREFIXES.iter().any(|p| name.starts_with(p)) {
                continue;
            }

            let _ = writeln!(out, "  {:>3}: {}", index, name);
            if let (Some(file), Some(line)) = (symbol.filename(), symbol.lineno()) {
                let _ = writeln!(out, "             at {}:{}", file.display(), line);
            }
            index += 1;
        }
    }
}
