use std::time::Duration;

use crate::types::ItemId;

/// Errors surfaced by craft-queue.
///
/// Categories:
/// - Binding: a call into the agent failed; recovered inside the bridge
/// - Rejection: a user command was refused; nothing was mutated
/// - Transport: the coordinator task is gone
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CqError {
    // Binding -- never escapes AgentBridge
    #[error("Agent binding is not registered")]
    BindingMissing,

    #[error("Agent call '{call}' failed: {reason}")]
    BindingFailed { call: String, reason: String },

    #[error("Agent call '{call}' timed out after {timeout:?}")]
    BindingTimeout { call: String, timeout: Duration },

    // Rejection -- reported to the caller
    #[error("Agent is not available")]
    AgentUnavailable,

    #[error("Agent is busy! Wait for it to finish.")]
    AgentBusy,

    #[error("No pending items in queue")]
    NothingPending,

    #[error("Item {0} is already being crafted")]
    AlreadyActive(ItemId),

    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Item {0} is not pending")]
    NotPending(ItemId),

    #[error("Cannot move item {id} to index {index}: queue holds {len} items")]
    IndexOutOfRange { id: ItemId, index: usize, len: usize },

    #[error("Item {id} has no material {material_id}")]
    MaterialNotFound { id: ItemId, material_id: u32 },

    #[error("No recipe selected in the crafting log")]
    NoRecipeSelected,

    // Transport
    #[error("Coordinator shut down")]
    CoordinatorClosed,
}

impl CqError {
    /// Returns true for failures of the agent binding itself.
    pub fn is_binding_failure(&self) -> bool {
        matches!(
            self,
            CqError::BindingMissing | CqError::BindingFailed { .. } | CqError::BindingTimeout { .. }
        )
    }

    /// Returns true when a user command was refused without side effects.
    pub fn is_rejection(&self) -> bool {
        !self.is_binding_failure() && *self != CqError::CoordinatorClosed
    }
}
