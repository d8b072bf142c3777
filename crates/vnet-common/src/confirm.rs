//! Confirmation port for destructive operations.

/// Asks the operator to approve an operation.
pub trait Confirm: Send + Sync {
    /// Present `message` and return whether the operator agreed.
    fn confirm(&self, message: &str) -> bool;
}

/// Interactive confirmation on the controlling terminal.
#[derive(Debug, Clone)]
pub struct TerminalConfirm {
    prompt: String,
}

impl TerminalConfirm {
    /// Create a terminal prompt with the default question.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prompt: "Are you sure?".to_string(),
        }
    }

    /// Override the question shown after the message.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

impl Default for TerminalConfirm {
    fn default() -> Self {
        Self::new()
    }
}

impl Confirm for TerminalConfirm {
    fn confirm(&self, message: &str) -> bool {
        eprintln!("{message}");
        match dialoguer::Confirm::new()
            .with_prompt(&self.prompt)
            .default(false)
            .interact()
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "Unable to read confirmation, assuming no");
                false
            }
        }
    }
}

/// Approves everything. Used in forced / non-interactive mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&self, message: &str) -> bool {
        tracing::debug!(message, "Confirmation skipped (forced)");
        true
    }
}

/// Pick the confirmation port for the given force flag.
#[must_use]
pub fn confirmer(force: bool) -> Box<dyn Confirm> {
    if force {
        Box::new(AlwaysConfirm)
    } else {
        Box::new(TerminalConfirm::new())
    }
}
