//! TerminalSink - colored rendering for the CLI

use std::io::Write;

use colored::Colorize;
use parking_lot::Mutex;

use super::{OutputRecord, OutputSink, Severity};

/// Prints notifications to a writer (stdout by default)
pub struct TerminalSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalSink {
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn line(&self, text: String) {
        // Terminal output is best-effort
        let mut out = self.out.lock();
        let _ = writeln!(out, "{}", text);
        let _ = out.flush();
    }
}

impl OutputSink for TerminalSink {
    fn on_start(&self) {
        self.line(format!("{} Running scratch...", "→".cyan()));
    }

    fn handle(&self, record: &OutputRecord) {
        let gutter = format!("[{}]", record.range).dimmed();
        let symbol = match record.severity {
            Severity::Output => "✓".green(),
            Severity::Warning => "!".yellow(),
            Severity::Error | Severity::Fatal => "✗".red(),
        };

        let mut lines = record.text.lines();
        let first = lines.next().unwrap_or("");
        let body = match record.severity {
            Severity::Output => first.normal(),
            Severity::Warning => first.yellow(),
            Severity::Error | Severity::Fatal => first.red(),
        };
        self.line(format!("  {} {} {}", gutter, symbol, body));
        for rest in lines {
            self.line(format!("      {}", rest));
        }
    }

    fn error(&self, message: &str) {
        self.line(format!("  {} {}", "Error:".red().bold(), message));
    }

    fn on_finish(&self) {
        self.line(format!("{} Done", "✓".green()));
    }

    fn clear(&self) {
        self.line(format!("{}", "── output cleared ──".dimmed()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{Fragment, FragmentId, LineRange};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn renders_records_with_range_and_continuation_lines() {
        colored::control::set_override(false);
        let buffer = Buffer::default();
        let sink = TerminalSink::new(Box::new(buffer.clone()));
        let fragment = Fragment::new(FragmentId::next(), "ls", LineRange::new(2, 3));

        sink.on_start();
        sink.handle(&OutputRecord::output(&fragment, "a.txt\nb.txt"));
        sink.handle(&OutputRecord::fatal(&fragment, "exit status 2"));
        sink.on_finish();

        let text = String::from_utf8(buffer.0.lock().clone()).unwrap();
        assert!(text.contains("Running scratch"));
        assert!(text.contains("[3-4] ✓ a.txt"));
        assert!(text.contains("      b.txt"));
        assert!(text.contains("✗ exit status 2"));
        assert!(text.contains("Done"));
    }
}
