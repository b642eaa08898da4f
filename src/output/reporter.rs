use console::style;
use std::io::Write;
use std::sync::Mutex;

/// Channel through which the library surfaces non-fatal problems and status
/// lines to whoever is driving it.
pub trait Reporter: Send + Sync {
    /// A problem that did not stop the operation
    fn warning(&self, message: &str);

    /// A status line meant for the user. `eol` is false while a progress
    /// line is still being written.
    fn to_screen(&self, message: &str, eol: bool);

    /// Diagnostic detail, routed to tracing by default
    fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }
}

/// Reporter writing styled output to the terminal
#[derive(Debug, Default, Clone)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl Reporter for ConsoleReporter {
    fn warning(&self, message: &str) {
        eprintln!("{} {}", style("WARNING:").yellow().bold(), message);
    }

    fn to_screen(&self, message: &str, eol: bool) {
        if self.quiet {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = if eol {
            writeln!(stdout, "{}", message)
        } else {
            write!(stdout, "{}", message).and_then(|_| stdout.flush())
        };
    }
}

/// Reporter that keeps every message in memory
#[derive(Debug, Default)]
pub struct CollectingReporter {
    warnings: Mutex<Vec<String>>,
    screen: Mutex<String>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Everything written to the screen channel, line breaks included
    pub fn screen(&self) -> String {
        self.screen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Reporter for CollectingReporter {
    fn warning(&self, message: &str) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message.to_string());
        }
    }

    fn to_screen(&self, message: &str, eol: bool) {
        if let Ok(mut screen) = self.screen.lock() {
            screen.push_str(message);
            if eol {
                screen.push('\n');
            }
        }
    }
}
