use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Trace,
    Info,
    Warn,
}

/// One message emitted by the core about a tolerated fault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub target: &'static str,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.level, self.target, self.message)
    }
}

/// Receiver for diagnostics raised by the memory bus.
///
/// Each [`crate::mmu::Mmu`] owns its own sink, so two machines in one process
/// never share logging state.
pub trait DiagnosticSink: Send {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to the `log` facade. This is the default sink.
#[derive(Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&mut self, d: Diagnostic) {
        match d.level {
            Level::Trace => log::trace!(target: d.target, "{}", d.message),
            Level::Info => log::info!(target: d.target, "{}", d.message),
            Level::Warn => log::warn!(target: d.target, "{}", d.message),
        }
    }
}

/// Keeps every diagnostic in memory. Clones share the same buffer, so a test
/// can hand one clone to the MMU and inspect the other.
#[derive(Clone, Default)]
pub struct RecordingSink {
    entries: Arc<Mutex<Vec<Diagnostic>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        match self.entries.lock() {
            Ok(mut guard) => guard.push(diagnostic),
            Err(poisoned) => poisoned.into_inner().push(diagnostic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_clones_share_entries() {
        let sink = RecordingSink::new();
        let mut writer = sink.clone();
        writer.report(Diagnostic {
            level: Level::Warn,
            target: "test",
            message: "hello".into(),
        });
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.entries()[0].message, "hello");
    }
}
