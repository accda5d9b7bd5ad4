/// Operator-facing diagnostics
///
/// Every line is `<tag> <RFC3339 timestamp> <kind>: <message>`. The sink is
/// injected so each component receives the same logger explicitly instead of
/// reaching for a process-wide singleton. Each diagnostic is mirrored to the
/// `log` facade at debug level under the `cgrun::diagnostics` target.
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Fixed program tag prefixed to each diagnostic line
pub const PROGRAM_TAG: &str = "cgrun";

/// Kinds of diagnostics the wrapper can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    SpawnFailed,
    LimitInstallFailed,
    MountpointResolutionFailed,
    StatsCollectionFailed,
    ReportWriteFailed,
    BudgetExceeded,
    SupervisionFailed,
    Usage,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::SpawnFailed => "spawn-failed",
            DiagnosticKind::LimitInstallFailed => "limit-install-failed",
            DiagnosticKind::MountpointResolutionFailed => "mountpoint-resolution-failed",
            DiagnosticKind::StatsCollectionFailed => "stats-collection-failed",
            DiagnosticKind::ReportWriteFailed => "report-write-failed",
            DiagnosticKind::BudgetExceeded => "budget-exceeded",
            DiagnosticKind::SupervisionFailed => "supervision-failed",
            DiagnosticKind::Usage => "usage",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Injected diagnostic logger
#[derive(Clone)]
pub struct Diagnostics {
    tag: &'static str,
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Diagnostics {
    /// Diagnostics on the process's standard error stream
    pub fn stderr() -> Self {
        Self::with_sink(Box::new(std::io::stderr()))
    }

    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        Self {
            tag: PROGRAM_TAG,
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Emit one diagnostic line. Write failures are swallowed: losing a
    /// diagnostic must never change the run's outcome.
    pub fn emit(&self, kind: DiagnosticKind, message: impl fmt::Display) {
        let line = format_line(self.tag, &timestamp(), kind, &message);
        log::debug!(target: "cgrun::diagnostics", "{}: {}", kind, message);

        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = writeln!(sink, "{}", line);
        let _ = sink.flush();
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics").field("tag", &self.tag).finish()
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_line(tag: &str, timestamp: &str, kind: DiagnosticKind, message: &dyn fmt::Display) -> String {
    format!("{} {} {}: {}", tag, timestamp, kind, message)
}

/// In-memory sink shared between a [`Diagnostics`] and a test
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct CaptureSink(pub Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl CaptureSink {
    pub(crate) fn diagnostics(&self) -> Diagnostics {
        Diagnostics::with_sink(Box::new(self.clone()))
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for CaptureSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
