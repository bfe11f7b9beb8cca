//! Tool lifecycle states, capability tags and approval policies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single tool invocation, keyed by tool-call id.
///
/// ```text
/// Initial -> [WaitingForApproval ->] Executing -> Completed | Failed
///                    \-> Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ToolState {
    #[default]
    Initial,
    WaitingForApproval,
    Rejected,
    Executing,
    /// The body returned a result.
    Completed,
    /// The body timed out or failed; the failure text was reported to the model.
    Failed,
}

impl ToolState {
    /// No further transitions happen from a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::WaitingForApproval => "waiting for approval",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// What a tool is allowed to do. Static metadata declared by each tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolCapability {
    /// Reads project files.
    ReadOnly,
    /// Modifies files on the file system.
    ReadWrite,
    /// Executes arbitrary shell commands.
    ExecuteShellCommands,
}

impl ToolCapability {
    pub const ALL: [ToolCapability; 3] = [
        ToolCapability::ReadOnly,
        ToolCapability::ReadWrite,
        ToolCapability::ExecuteShellCommands,
    ];

    const fn bit(self) -> u8 {
        match self {
            Self::ReadOnly => 1,
            Self::ReadWrite => 1 << 1,
            Self::ExecuteShellCommands => 1 << 2,
        }
    }
}

/// A small set of [`ToolCapability`] values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    #[must_use]
    pub const fn of(capabilities: &[ToolCapability]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < capabilities.len() {
            bits |= capabilities[i].bit();
            i += 1;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn all() -> Self {
        Self::of(&ToolCapability::ALL)
    }

    #[must_use]
    pub const fn with(self, capability: ToolCapability) -> Self {
        Self(self.0 | capability.bit())
    }

    #[must_use]
    pub const fn contains(self, capability: ToolCapability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// `true` when every capability in `self` is also in `other`.
    #[must_use]
    pub const fn is_subset(self, other: CapabilitySet) -> bool {
        self.0 & !other.0 == 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = ToolCapability> {
        ToolCapability::ALL
            .into_iter()
            .filter(move |cap| self.contains(*cap))
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<ToolCapability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = ToolCapability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

/// Per-conversation approval policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Only read-only tools run without asking.
    #[default]
    AlwaysAsk,
    /// Reads and writes run without asking; shell commands still ask.
    AskForShellCommands,
    /// Everything runs without asking.
    AutoApprove,
}

impl ApprovalMode {
    #[must_use]
    pub const fn auto_approved_caps(self) -> CapabilitySet {
        match self {
            Self::AlwaysAsk => CapabilitySet::of(&[ToolCapability::ReadOnly]),
            Self::AskForShellCommands => {
                CapabilitySet::of(&[ToolCapability::ReadOnly, ToolCapability::ReadWrite])
            }
            Self::AutoApprove => CapabilitySet::all(),
        }
    }

    /// Approval is skipped iff every required capability is auto-approved.
    #[must_use]
    pub const fn requires_approval(self, required: CapabilitySet) -> bool {
        !required.is_subset(self.auto_approved_caps())
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlwaysAsk => "always-ask",
            Self::AskForShellCommands => "ask-shell",
            Self::AutoApprove => "auto",
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown approval mode '{0}' (expected always-ask, ask-shell or auto)")]
pub struct UnknownApprovalMode(String);

impl FromStr for ApprovalMode {
    type Err = UnknownApprovalMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "always-ask" | "ask" => Ok(Self::AlwaysAsk),
            "ask-shell" | "ask-for-shell-commands" => Ok(Self::AskForShellCommands),
            "auto" | "auto-approve" => Ok(Self::AutoApprove),
            _ => Err(UnknownApprovalMode(s.to_string())),
        }
    }
}
