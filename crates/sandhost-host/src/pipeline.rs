//! Commands the pipeline runs after a mount.

use sandhost_runtime::command_line;

/// A command with its argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command spec.
    pub fn new<S: Into<String>>(
        command: impl Into<String>,
        args: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The command line, for logs.
    pub fn line(&self) -> String {
        command_line(&self.command, &self.args)
    }
}

/// What the pipeline runs and how it reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Dependency installation; must exit 0.
    pub install: CommandSpec,
    /// Long-running server; readiness comes from the runtime.
    pub serve: CommandSpec,
    /// Send an `ERROR` to the parent when installation exits nonzero.
    pub report_install_failure: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            install: CommandSpec::new("npm", ["install"]),
            serve: CommandSpec::new("npm", ["run", "dev"]),
            report_install_failure: false,
        }
    }
}

impl PipelineConfig {
    /// Create the default pipeline (`npm install`, then `npm run dev`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the install command.
    pub fn with_install(mut self, install: CommandSpec) -> Self {
        self.install = install;
        self
    }

    /// Set the serve command.
    pub fn with_serve(mut self, serve: CommandSpec) -> Self {
        self.serve = serve;
        self
    }

    /// Report nonzero install exits to the parent.
    pub fn with_report_install_failure(mut self, report: bool) -> Self {
        self.report_install_failure = report;
        self
    }
}
