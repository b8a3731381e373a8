use serde::{Deserialize, Serialize};

use crate::cq_error::CqError;
use crate::queue::WorkQueue;
use crate::types::{AgentStatus, DispatchMode, DispatchOrder, ItemId, ItemStatus};
use crate::{log_debug, log_info, log_warn};

// --- Public types ---

/// Policy flags consumed by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrchestratorPolicy {
    /// Drop an item from the queue as soon as it completes.
    pub auto_remove_completed: bool,
    /// Ticks an item may stay in flight before it is failed. 0 disables.
    pub stall_ticks: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SessionState {
    Idle,
    Dispatching {
        active_item_id: ItemId,
        mode: DispatchMode,
    },
}

/// Side effects produced by a transition.
///
/// `Dispatch` and `RequestStop` are commands for the agent bridge; the
/// remaining variants are notices for whoever drives the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Dispatch(DispatchOrder),
    RequestStop,
    Completed(ItemId),
    Failed(ItemId),
    /// The session went idle on its own (queue exhausted, single item done, stall).
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Session {
    active_item_id: ItemId,
    mode: DispatchMode,
    ticks_in_flight: u32,
}

/// The queue-driving state machine.
///
/// Every transition takes the queue and the latest agent observation and
/// returns the effects to apply, so the machine runs without a timer or a
/// live agent. Callers must serialize calls; nothing here is re-entrant.
#[derive(Debug, Default)]
pub struct Orchestrator {
    policy: OrchestratorPolicy,
    session: Option<Session>,
}

impl Orchestrator {
    pub fn new(policy: OrchestratorPolicy) -> Self {
        Self {
            policy,
            session: None,
        }
    }

    pub fn policy(&self) -> OrchestratorPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: OrchestratorPolicy) {
        self.policy = policy;
    }

    pub fn state(&self) -> SessionState {
        match self.session {
            None => SessionState::Idle,
            Some(s) => SessionState::Dispatching {
                active_item_id: s.active_item_id,
                mode: s.mode,
            },
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn active_item_id(&self) -> Option<ItemId> {
        self.session.map(|s| s.active_item_id)
    }

    pub fn mode(&self) -> Option<DispatchMode> {
        self.session.map(|s| s.mode)
    }

    // --- User commands ---

    /// Dispatch the first pending item and start a session in `mode`.
    pub fn start(
        &mut self,
        queue: &mut WorkQueue,
        agent: &AgentStatus,
        mode: DispatchMode,
    ) -> Result<Vec<Effect>, CqError> {
        check_can_dispatch(queue, agent)?;
        let order = queue
            .first_pending()
            .map(DispatchOrder::from_item)
            .ok_or(CqError::NothingPending)?;
        Ok(vec![self.begin(queue, order, mode)])
    }

    /// Dispatch one specific item, ignoring queue order. Never auto-advances.
    pub fn start_single(
        &mut self,
        queue: &mut WorkQueue,
        agent: &AgentStatus,
        id: ItemId,
    ) -> Result<Vec<Effect>, CqError> {
        let (order, status) = queue
            .get(id)
            .map(|i| (DispatchOrder::from_item(i), i.status))
            .ok_or(CqError::ItemNotFound(id))?;
        check_can_dispatch(queue, agent)?;
        if status != ItemStatus::Pending {
            return Err(CqError::NotPending(id));
        }
        Ok(vec![self.begin(queue, order, DispatchMode::Single)])
    }

    /// Disengage immediately and ask the agent to stop.
    ///
    /// The in-flight item keeps whatever status it has; whether the agent
    /// actually finishes it is not tracked.
    pub fn stop(&mut self) -> Vec<Effect> {
        if let Some(session) = self.session.take() {
            log_info!(
                "[orchestrator] Stopped while {} was in flight",
                session.active_item_id
            );
        }
        vec![Effect::RequestStop]
    }

    // --- Tick ---

    /// Evaluate one poll result.
    ///
    /// Completion is inferred when the agent is reachable and reports
    /// neither busy nor a running list. An unreachable agent defers all
    /// judgment to a later tick.
    pub fn tick(&mut self, queue: &mut WorkQueue, agent: &AgentStatus) -> Vec<Effect> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if !agent.available {
            log_debug!("[orchestrator] Agent unavailable, deferring");
            return Vec::new();
        }

        if agent.busy || agent.list_running {
            session.ticks_in_flight += 1;
            let stalled =
                self.policy.stall_ticks > 0 && session.ticks_in_flight >= self.policy.stall_ticks;
            if stalled {
                return self.fail_stalled(queue);
            }
            return Vec::new();
        }

        let Session {
            active_item_id,
            mode,
            ..
        } = *session;
        self.session = None;

        let mut effects = Vec::new();
        if is_active(queue, active_item_id) {
            queue.set_status(active_item_id, ItemStatus::Completed);
            effects.push(Effect::Completed(active_item_id));
            if self.policy.auto_remove_completed {
                queue.remove(active_item_id);
            }
        } else {
            log_debug!(
                "[orchestrator] {} left the queue mid-flight, nothing to complete",
                active_item_id
            );
        }

        if mode == DispatchMode::SequentialAll {
            if let Some(other) = queue.first_active() {
                log_warn!(
                    "[orchestrator] {} is still marked active, not advancing",
                    other.id
                );
            } else if let Some(order) = queue.first_pending().map(DispatchOrder::from_item) {
                effects.push(self.begin(queue, order, mode));
                return effects;
            }
        }

        effects.push(Effect::Finished);
        effects
    }

    fn begin(&mut self, queue: &mut WorkQueue, order: DispatchOrder, mode: DispatchMode) -> Effect {
        let id = order.item_id;
        queue.set_status(id, ItemStatus::Active);
        self.session = Some(Session {
            active_item_id: id,
            mode,
            ticks_in_flight: 0,
        });
        log_info!(
            "[orchestrator] Dispatching {}x {} ({}, {})",
            order.quantity,
            order.display_name,
            id,
            mode
        );
        Effect::Dispatch(order)
    }

    fn fail_stalled(&mut self, queue: &mut WorkQueue) -> Vec<Effect> {
        let Some(session) = self.session.take() else {
            return Vec::new();
        };
        log_warn!(
            "[orchestrator] {} still in flight after {} ticks, marking failed",
            session.active_item_id,
            session.ticks_in_flight
        );

        let mut effects = Vec::new();
        if is_active(queue, session.active_item_id) {
            queue.set_status(session.active_item_id, ItemStatus::Failed);
            effects.push(Effect::Failed(session.active_item_id));
        }
        effects.push(Effect::RequestStop);
        effects.push(Effect::Finished);
        effects
    }
}

fn is_active(queue: &WorkQueue, id: ItemId) -> bool {
    queue.get(id).map(|i| i.status) == Some(ItemStatus::Active)
}

/// Guards shared by every start command. Hard rejects, nothing is queued.
fn check_can_dispatch(queue: &WorkQueue, agent: &AgentStatus) -> Result<(), CqError> {
    if !agent.available {
        return Err(CqError::AgentUnavailable);
    }
    if agent.busy {
        return Err(CqError::AgentBusy);
    }
    if let Some(active) = queue.first_active() {
        return Err(CqError::AlreadyActive(active.id));
    }
    Ok(())
}
