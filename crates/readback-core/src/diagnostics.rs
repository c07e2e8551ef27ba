//! Process-wide diagnostic sink.
//!
//! A host can register one sink that receives `(message, code)` pairs for
//! low-level tracing of the transfer engine, the same shape as a debug-log
//! delegate handed across an FFI boundary. Registration happens at most once
//! per process; afterwards the sink is read-only.
//!
//! Every diagnostic is also forwarded to `tracing` at `trace` level, so a sink
//! is optional.

use std::sync::OnceLock;

/// Receives low-level diagnostics.
pub trait DiagnosticSink: Send + Sync + 'static {
    fn log(&self, message: &str, code: i32);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&str, i32) + Send + Sync + 'static,
{
    fn log(&self, message: &str, code: i32) {
        self(message, code)
    }
}

/// Code attached to each diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DiagnosticCode {
    /// An operation started.
    Begin = 0,
    /// An operation finished.
    End = 1,
    /// Something was rejected or deferred.
    Warning = 2,
    /// A transfer failed.
    Fault = 3,
}

impl DiagnosticCode {
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Returned by [`register_sink`] when a sink is already installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a diagnostic sink is already registered for this process")]
pub struct SinkAlreadyRegistered;

static SINK: OnceLock<Box<dyn DiagnosticSink>> = OnceLock::new();

/// Register the process-wide sink.
///
/// Only the first registration succeeds; the sink then receives a
/// `"diagnostic sink registered"` message with [`DiagnosticCode::End`].
pub fn register_sink(sink: impl DiagnosticSink) -> Result<(), SinkAlreadyRegistered> {
    SINK.set(Box::new(sink)).map_err(|_| SinkAlreadyRegistered)?;
    emit("diagnostic sink registered", DiagnosticCode::End);
    Ok(())
}

/// Whether a sink has been registered.
pub fn has_sink() -> bool {
    SINK.get().is_some()
}

/// Send a diagnostic to the registered sink (if any) and to `tracing`.
pub fn emit(message: &str, code: DiagnosticCode) {
    tracing::trace!(code = code.as_i32(), "{}", message);
    if let Some(sink) = SINK.get() {
        sink.log(message, code.as_i32());
    }
}
