//! Confirmation gate
//!
//! Suspends a mutating operation until a human decision arrives. At most one
//! prompt is outstanding at a time; further requests wait for the slot.
//! One gate is owned by the runtime and handed to the dispatcher, so a server
//! can build one per session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Category used for session-flag matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationCategory {
    FileOperations,
    BashCommands,
    PackageOperations,
    ServiceOperations,
    ExternalTools,
}

impl ConfirmationCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FileOperations => "file operations",
            Self::BashCommands => "bash commands",
            Self::PackageOperations => "package operations",
            Self::ServiceOperations => "service operations",
            Self::ExternalTools => "external tools",
        }
    }
}

/// Per-run auto-approval toggles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    pub file_operations: bool,
    pub bash_commands: bool,
    pub package_operations: bool,
    pub service_operations: bool,
    pub external_tools: bool,
    pub all_operations: bool,
}

impl SessionFlags {
    /// Whether an operation in `category` needs no prompt
    pub fn covers(&self, category: ConfirmationCategory) -> bool {
        self.all_operations || self.get(category)
    }

    pub fn get(&self, category: ConfirmationCategory) -> bool {
        match category {
            ConfirmationCategory::FileOperations => self.file_operations,
            ConfirmationCategory::BashCommands => self.bash_commands,
            ConfirmationCategory::PackageOperations => self.package_operations,
            ConfirmationCategory::ServiceOperations => self.service_operations,
            ConfirmationCategory::ExternalTools => self.external_tools,
        }
    }

    pub fn set(&mut self, category: ConfirmationCategory, value: bool) {
        let flag = match category {
            ConfirmationCategory::FileOperations => &mut self.file_operations,
            ConfirmationCategory::BashCommands => &mut self.bash_commands,
            ConfirmationCategory::PackageOperations => &mut self.package_operations,
            ConfirmationCategory::ServiceOperations => &mut self.service_operations,
            ConfirmationCategory::ExternalTools => &mut self.external_tools,
        };
        *flag = value;
    }
}

/// An operation waiting for authorization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    /// Human-readable label, e.g. "Run command"
    pub operation: String,
    /// What the operation touches (path, command line, tool name)
    pub target: String,
    /// Diff or content preview
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub category: ConfirmationCategory,
}

/// Human decision for a pending operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved,
    /// Approve and auto-approve the category for the rest of the run
    ApprovedRemember,
    /// Reject, optionally with feedback for the model
    Rejected(Option<String>),
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved | Decision::ApprovedRemember)
    }
}

/// A prompt surfaced to whoever drives the UI
#[derive(Debug)]
pub struct ConfirmationPrompt {
    pub pending: PendingConfirmation,
    responder: oneshot::Sender<Decision>,
}

impl ConfirmationPrompt {
    /// Answer the prompt. Dropping it unanswered counts as a rejection.
    pub fn respond(self, decision: Decision) {
        if self.responder.send(decision).is_err() {
            debug!("Confirmation requester went away before the decision");
        }
    }
}

struct GateInner {
    flags: parking_lot::RwLock<SessionFlags>,
    pending: parking_lot::Mutex<Option<PendingConfirmation>>,
    /// Serializes prompts: held for the whole human round-trip
    slot: tokio::sync::Mutex<()>,
    prompt_tx: mpsc::UnboundedSender<ConfirmationPrompt>,
}

/// Clears the published pending item, also when the request is abandoned
struct PendingGuard<'a>(&'a GateInner);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        *self.0.pending.lock() = None;
    }
}

/// Arbiter for mutating operations
#[derive(Clone)]
pub struct ConfirmationGate {
    inner: Arc<GateInner>,
}

impl ConfirmationGate {
    /// Create a gate and the receiver its prompts are delivered to
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConfirmationPrompt>) {
        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let gate = Self {
            inner: Arc::new(GateInner {
                flags: parking_lot::RwLock::new(SessionFlags::default()),
                pending: parking_lot::Mutex::new(None),
                slot: tokio::sync::Mutex::new(()),
                prompt_tx,
            }),
        };
        (gate, prompt_rx)
    }

    /// Gate that approves every operation without prompting
    pub fn auto_approve() -> Self {
        let (gate, _prompt_rx) = Self::new();
        gate.inner.flags.write().all_operations = true;
        gate
    }

    /// Ask for authorization, waiting for any outstanding prompt first
    pub async fn request(&self, pending: PendingConfirmation) -> Decision {
        let category = pending.category;
        if self.is_covered(category) {
            debug!(category = ?category, "Auto-approved by session flag");
            return Decision::Approved;
        }

        let _slot = self.inner.slot.lock().await;

        // A prompt answered while we waited may have set the flag
        if self.is_covered(category) {
            debug!(category = ?category, "Auto-approved by session flag");
            return Decision::Approved;
        }

        let (tx, rx) = oneshot::channel();
        *self.inner.pending.lock() = Some(pending.clone());
        let _guard = PendingGuard(&self.inner);

        info!(
            operation = %pending.operation,
            target = %pending.target,
            "Waiting for confirmation"
        );

        let prompt = ConfirmationPrompt {
            pending,
            responder: tx,
        };
        let decision = if self.inner.prompt_tx.send(prompt).is_err() {
            warn!("No confirmation handler attached, rejecting");
            Decision::Rejected(None)
        } else {
            rx.await.unwrap_or(Decision::Rejected(None))
        };

        if decision == Decision::ApprovedRemember {
            info!("Auto-approving {} for this session", category.label());
            self.inner.flags.write().set(category, true);
        }

        decision
    }

    /// The outstanding confirmation, if any
    pub fn pending(&self) -> Option<PendingConfirmation> {
        self.inner.pending.lock().clone()
    }

    /// Snapshot of the session flags
    pub fn flags(&self) -> SessionFlags {
        self.inner.flags.read().clone()
    }

    pub fn set_flag(&self, category: ConfirmationCategory, value: bool) {
        self.inner.flags.write().set(category, value);
    }

    pub fn set_all_operations(&self, value: bool) {
        self.inner.flags.write().all_operations = value;
    }

    /// Clear every session flag
    pub fn reset(&self) {
        *self.inner.flags.write() = SessionFlags::default();
    }

    fn is_covered(&self, category: ConfirmationCategory) -> bool {
        self.inner.flags.read().covers(category)
    }
}
