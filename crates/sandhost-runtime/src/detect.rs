//! Dev-server address detection from process output.

use std::sync::LazyLock;

use regex::Regex;

/// Patterns dev servers print when they start listening, most specific first.
const PORT_PATTERNS: &[&str] = &[
    r"Local:\s+https?://[^\s:/]+:(\d{2,5})", // Vite: "Local:   http://localhost:5173/"
    r"ready - started server on [^\s]*:(\d{2,5})", // Next.js
    r"(?i)server (?:is )?running (?:on|at) (?:port )?(?:https?://[^\s:/]+:)?(\d{2,5})", // Express
    r"(?i)listening on (?:port )?(?:https?://[^\s:/]+:)?:?(\d{2,5})",
    r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{2,5})",
];

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap_or_else(|e| panic!("invalid ANSI pattern: {e}"))
});

static PORT_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    PORT_PATTERNS
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid port pattern {p}: {e}")))
        .collect()
});

/// Finds the port a dev server announces in its output.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevServerDetector;

impl DevServerDetector {
    /// Create a detector with the built-in patterns.
    pub fn new() -> Self {
        Self
    }

    /// Extract a port from one line of output.
    pub fn detect_port(&self, line: &str) -> Option<u16> {
        let line = ANSI_ESCAPE.replace_all(line, "");

        PORT_REGEXES.iter().find_map(|regex| {
            regex
                .captures(&line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u16>().ok())
                .filter(|port| *port > 0)
        })
    }
}
