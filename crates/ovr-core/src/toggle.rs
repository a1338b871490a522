//! Runtime on/off switch for capture, driven by operator commands.
//!
//! The state starts inactive on every launch and is never persisted.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::DetectorConfig;

/// Process-wide capture flag. Single writer (the operator), many readers.
#[derive(Debug, Default)]
pub struct ToggleState {
    active: AtomicBool,
}

impl ToggleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleCommand {
    Enable,
    Disable,
    Status,
}

impl ToggleCommand {
    /// Mutate the state (status is read-only) and return the resulting mode.
    pub fn apply(self, state: &ToggleState) -> bool {
        match self {
            ToggleCommand::Enable => state.set_active(true),
            ToggleCommand::Disable => state.set_active(false),
            ToggleCommand::Status => {}
        }
        state.is_active()
    }
}

/// Recognised command tokens and their prefix.
#[derive(Clone, Debug)]
pub struct CommandSet {
    prefix: String,
    enable: Vec<String>,
    disable: Vec<String>,
    status: Vec<String>,
}

impl CommandSet {
    pub fn new(cfg: &DetectorConfig) -> Self {
        let lower = |v: &[String]| -> Vec<String> {
            v.iter().map(|s| s.trim().to_lowercase()).collect()
        };
        Self {
            prefix: cfg.command_prefix.to_lowercase(),
            enable: lower(&cfg.enable_commands),
            disable: lower(&cfg.disable_commands),
            status: lower(&cfg.status_commands),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parse `<prefix><token>`, case-insensitive and trimmed.
    ///
    /// Anything else, including unknown prefixed tokens, is `None`: the same chat carries normal
    /// conversation, so unrecognised text is never treated as an error.
    pub fn parse(&self, text: &str) -> Option<ToggleCommand> {
        let text = text.trim().to_lowercase();
        let token = text.strip_prefix(self.prefix.as_str())?.trim();
        if token.is_empty() {
            return None;
        }

        let hit = |set: &[String]| set.iter().any(|t| t == token);
        if hit(&self.enable) {
            Some(ToggleCommand::Enable)
        } else if hit(&self.disable) {
            Some(ToggleCommand::Disable)
        } else if hit(&self.status) {
            Some(ToggleCommand::Status)
        } else {
            None
        }
    }

    /// Text sent to the operator's own chat after a command.
    pub fn confirmation(&self, cmd: ToggleCommand, active: bool) -> String {
        match cmd {
            ToggleCommand::Enable => "🟢 *View-once capture ON*\n\n\
                Reply to a view-once message and it will be copied here."
                .to_string(),
            ToggleCommand::Disable => {
                let enable = self.enable.first().map(String::as_str).unwrap_or_default();
                format!(
                    "🔴 *View-once capture OFF*\n\nReplies are ignored. Send {}{} to turn it back on.",
                    self.prefix, enable
                )
            }
            ToggleCommand::Status => {
                let mode = if active { "🟢 ON" } else { "🔴 OFF" };
                format!("📊 *Status*\n\nMode: {mode}\nPrefix: \"{}\"", self.prefix)
            }
        }
    }
}
