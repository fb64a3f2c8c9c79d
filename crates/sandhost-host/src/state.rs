//! Session lifecycle states and the published status.

use std::fmt;

use chrono::{DateTime, Utc};

/// The stage a session or pipeline failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailedStage {
    Boot,
    Mount,
    Install,
    Serve,
}

impl fmt::Display for FailedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailedStage::Boot => "boot",
            FailedStage::Mount => "mount",
            FailedStage::Install => "install",
            FailedStage::Serve => "serve",
        };
        f.write_str(name)
    }
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Booting,
    Ready,
    Mounting,
    Installing,
    Serving,
    Live,
    Failed(FailedStage),
}

impl SessionState {
    /// Whether a mount request may start a new pipeline.
    ///
    /// True in `Ready` and after a failed pipeline stage. A boot failure
    /// is terminal for the whole session.
    pub fn accepts_mount(&self) -> bool {
        matches!(
            self,
            SessionState::Ready
                | SessionState::Failed(
                    FailedStage::Mount | FailedStage::Install | FailedStage::Serve
                )
        )
    }

    /// Whether this is a failure state.
    pub fn is_failed(&self) -> bool {
        matches!(self, SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Booting => f.write_str("booting"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::Mounting => f.write_str("mounting"),
            SessionState::Installing => f.write_str("installing"),
            SessionState::Serving => f.write_str("serving"),
            SessionState::Live => f.write_str("live"),
            SessionState::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

/// Status line for a state that has a fixed text.
///
/// Failures other than a nonzero install exit carry the error message and
/// have no fixed text.
pub fn status_text(state: SessionState) -> Option<&'static str> {
    match state {
        SessionState::Booting => Some("Initializing..."),
        SessionState::Ready => Some("Sandbox ready"),
        SessionState::Mounting => Some("Mounting project files..."),
        SessionState::Installing => Some("Installing dependencies..."),
        SessionState::Serving => Some("Starting development server..."),
        SessionState::Live => Some("Server ready!"),
        SessionState::Failed(FailedStage::Install) => Some("Failed to install dependencies"),
        SessionState::Failed(_) => None,
    }
}

/// What a presentation shell renders for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    /// Lifecycle state.
    pub state: SessionState,
    /// Human-readable status line.
    pub message: String,
    /// Preview address once the server is live.
    pub preview_url: Option<String>,
    /// When this status was published.
    pub updated_at: DateTime<Utc>,
}

impl SessionStatus {
    /// Status for `state` with its fixed text.
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            message: status_text(state).unwrap_or_default().to_string(),
            preview_url: None,
            updated_at: Utc::now(),
        }
    }

    /// Failure status showing `Error: <detail>`.
    pub fn error(stage: FailedStage, detail: &str) -> Self {
        Self {
            state: SessionState::Failed(stage),
            message: format!("Error: {detail}"),
            preview_url: None,
            updated_at: Utc::now(),
        }
    }

    /// Attach a preview address.
    pub fn with_preview_url(mut self, url: Option<String>) -> Self {
        self.preview_url = url;
        self
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new(SessionState::Booting)
    }
}
