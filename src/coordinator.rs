use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::agent::AgentBinding;
use crate::bridge::AgentBridge;
use crate::catalog::{resolve_display_name, resolve_materials, RecipeCatalog};
use crate::cq_error::CqError;
use crate::orchestrator::{Effect, Orchestrator, OrchestratorPolicy, SessionState};
use crate::queue::WorkQueue;
use crate::selection::SelectionTracker;
use crate::types::{
    AgentStatus, DispatchMode, ItemId, ItemStatus, MaterialOverride, RecipeEvent, WorkItem,
};
use crate::{log_debug, log_info, log_warn};

// --- Snapshot ---

/// Point-in-time copy of everything the presentation layer renders.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub items: Vec<WorkItem>,
    pub session: SessionState,
    pub agent: AgentStatus,
    pub selected_recipe: Option<u32>,
    pub log_open: bool,
    pub revision: u64,
}

impl QueueSnapshot {
    pub fn is_running(&self) -> bool {
        matches!(self.session, SessionState::Dispatching { .. })
    }

    pub fn item(&self, id: ItemId) -> Option<&WorkItem> {
        self.items.iter().find(|i| i.id == id)
    }
}

/// What one poll cycle did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Session state after the tick.
    pub session: SessionState,
    /// A session went idle on its own during this tick.
    pub finished: bool,
}

/// Request to enqueue a recipe. Missing fields are resolved through the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub recipe_id: u32,
    pub quantity: i64,
    pub display_name: Option<String>,
    pub materials: Option<Vec<MaterialOverride>>,
}

impl NewItem {
    pub fn new(recipe_id: u32, quantity: i64) -> Self {
        Self {
            recipe_id,
            quantity,
            display_name: None,
            materials: None,
        }
    }
}

// --- Command enum ---

pub enum CoordinatorCommand {
    GetSnapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    AddItem {
        item: NewItem,
        reply: oneshot::Sender<ItemId>,
    },
    AddSelected {
        quantity: i64,
        reply: oneshot::Sender<Result<ItemId, CqError>>,
    },
    RemoveItem {
        id: ItemId,
        reply: oneshot::Sender<Result<(), CqError>>,
    },
    MoveItem {
        id: ItemId,
        new_index: usize,
        reply: oneshot::Sender<Result<(), CqError>>,
    },
    SetQuantity {
        id: ItemId,
        quantity: i64,
        reply: oneshot::Sender<Result<(), CqError>>,
    },
    SetHighGrade {
        id: ItemId,
        material_id: u32,
        high_grade: u32,
        reply: oneshot::Sender<Result<(), CqError>>,
    },
    RequeueItem {
        id: ItemId,
        reply: oneshot::Sender<Result<(), CqError>>,
    },
    ClearQueue {
        reply: oneshot::Sender<()>,
    },
    ClearCompleted {
        reply: oneshot::Sender<usize>,
    },
    Start {
        mode: Option<DispatchMode>,
        reply: oneshot::Sender<Result<ItemId, CqError>>,
    },
    StartSingle {
        id: ItemId,
        reply: oneshot::Sender<Result<(), CqError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    SetPause {
        paused: bool,
        reply: oneshot::Sender<Result<(), CqError>>,
    },
    Tick {
        reply: oneshot::Sender<TickOutcome>,
    },
    RecipeEvent {
        event: RecipeEvent,
        reply: oneshot::Sender<Option<u32>>,
    },
}

// --- CoordinatorHandle ---

#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
    changes: watch::Receiver<u64>,
}

impl CoordinatorHandle {
    async fn send_command<T>(
        &self,
        command: CoordinatorCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, CqError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| CqError::CoordinatorClosed)?;
        rx.await.map_err(|_| CqError::CoordinatorClosed)
    }

    /// Receiver bumped after every successful queue mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }

    pub async fn get_snapshot(&self) -> Result<QueueSnapshot, CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::GetSnapshot { reply }, rx)
            .await
    }

    pub async fn add_item(&self, item: NewItem) -> Result<ItemId, CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::AddItem { item, reply }, rx)
            .await
    }

    /// Enqueue the recipe currently selected in the crafting log.
    pub async fn add_selected(&self, quantity: i64) -> Result<ItemId, CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::AddSelected { quantity, reply }, rx)
            .await?
    }

    pub async fn remove_item(&self, id: ItemId) -> Result<(), CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::RemoveItem { id, reply }, rx)
            .await?
    }

    pub async fn move_item(&self, id: ItemId, new_index: usize) -> Result<(), CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::MoveItem {
                id,
                new_index,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn set_quantity(&self, id: ItemId, quantity: i64) -> Result<(), CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::SetQuantity {
                id,
                quantity,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn set_high_grade(
        &self,
        id: ItemId,
        material_id: u32,
        high_grade: u32,
    ) -> Result<(), CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::SetHighGrade {
                id,
                material_id,
                high_grade,
                reply,
            },
            rx,
        )
        .await?
    }

    /// Return a non-active item to pending so a later start picks it up.
    pub async fn requeue_item(&self, id: ItemId) -> Result<(), CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::RequeueItem { id, reply }, rx)
            .await?
    }

    pub async fn clear_queue(&self) -> Result<(), CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::ClearQueue { reply }, rx)
            .await
    }

    pub async fn clear_completed(&self) -> Result<usize, CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::ClearCompleted { reply }, rx)
            .await
    }

    /// Start a session. `None` uses the configured default mode.
    /// Returns the id of the dispatched item.
    pub async fn start(&self, mode: Option<DispatchMode>) -> Result<ItemId, CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::Start { mode, reply }, rx)
            .await?
    }

    pub async fn start_single(&self, id: ItemId) -> Result<(), CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::StartSingle { id, reply }, rx)
            .await?
    }

    pub async fn stop(&self) -> Result<(), CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::Stop { reply }, rx)
            .await
    }

    pub async fn pause(&self) -> Result<(), CqError> {
        self.set_pause(true).await
    }

    pub async fn resume(&self) -> Result<(), CqError> {
        self.set_pause(false).await
    }

    async fn set_pause(&self, paused: bool) -> Result<(), CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::SetPause { paused, reply }, rx)
            .await?
    }

    /// Run one poll cycle.
    pub async fn tick(&self) -> Result<TickOutcome, CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::Tick { reply }, rx)
            .await
    }

    /// Feed one crafting-log event. Returns the selected recipe afterwards.
    pub async fn recipe_event(&self, event: RecipeEvent) -> Result<Option<u32>, CqError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::RecipeEvent { event, reply }, rx)
            .await
    }
}

// --- Coordinator state ---

const CHANNEL_CAPACITY: usize = 32;

struct CoordinatorState<B: AgentBinding> {
    queue: WorkQueue,
    orchestrator: Orchestrator,
    bridge: AgentBridge<B>,
    catalog: Arc<dyn RecipeCatalog>,
    selection: SelectionTracker,
    default_mode: DispatchMode,
}

impl<B: AgentBinding> CoordinatorState<B> {
    fn find_item(&self, id: ItemId) -> Result<&WorkItem, CqError> {
        self.queue.get(id).ok_or(CqError::ItemNotFound(id))
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.queue.items().to_vec(),
            session: self.orchestrator.state(),
            agent: self.bridge.last_status(),
            selected_recipe: self.selection.selected_recipe(),
            log_open: self.selection.is_log_open(),
            revision: self.queue.revision(),
        }
    }

    /// One live round trip, used by commands that must judge "busy now".
    async fn observe_agent(&mut self) -> AgentStatus {
        self.bridge.probe().await;
        self.bridge.refresh_status().await
    }

    async fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Dispatch(order) => {
                    self.bridge
                        .dispatch(order.recipe_id, order.quantity, order.materials)
                        .await;
                }
                Effect::RequestStop => self.bridge.request_stop(true).await,
                Effect::Completed(id) => log_info!("[coordinator] {} completed", id),
                Effect::Failed(id) => log_warn!("[coordinator] {} failed", id),
                Effect::Finished => log_info!("[coordinator] Queue session finished"),
            }
        }
    }
}

// --- Handlers ---

fn handle_add_item<B: AgentBinding>(state: &mut CoordinatorState<B>, item: NewItem) -> ItemId {
    let name = match item.display_name {
        Some(name) => name,
        None => resolve_display_name(state.catalog.as_ref(), item.recipe_id),
    };
    let materials = item
        .materials
        .unwrap_or_else(|| resolve_materials(state.catalog.as_ref(), item.recipe_id));
    state
        .queue
        .add(item.recipe_id, &name, item.quantity, Some(materials))
}

fn handle_add_selected<B: AgentBinding>(
    state: &mut CoordinatorState<B>,
    quantity: i64,
) -> Result<ItemId, CqError> {
    let recipe_id = state
        .selection
        .selected_recipe()
        .ok_or(CqError::NoRecipeSelected)?;
    Ok(handle_add_item(state, NewItem::new(recipe_id, quantity)))
}

fn handle_remove_item<B: AgentBinding>(
    state: &mut CoordinatorState<B>,
    id: ItemId,
) -> Result<(), CqError> {
    if state.queue.remove(id) {
        Ok(())
    } else {
        Err(CqError::ItemNotFound(id))
    }
}

fn handle_move_item<B: AgentBinding>(
    state: &mut CoordinatorState<B>,
    id: ItemId,
    new_index: usize,
) -> Result<(), CqError> {
    state.find_item(id)?;
    let len = state.queue.len();
    if state.queue.move_item(id, new_index) {
        Ok(())
    } else {
        Err(CqError::IndexOutOfRange {
            id,
            index: new_index,
            len,
        })
    }
}

fn handle_set_quantity<B: AgentBinding>(
    state: &mut CoordinatorState<B>,
    id: ItemId,
    quantity: i64,
) -> Result<(), CqError> {
    if state.queue.set_quantity(id, quantity) {
        Ok(())
    } else {
        Err(CqError::ItemNotFound(id))
    }
}

fn handle_set_high_grade<B: AgentBinding>(
    state: &mut CoordinatorState<B>,
    id: ItemId,
    material_id: u32,
    high_grade: u32,
) -> Result<(), CqError> {
    state.find_item(id)?;
    if state.queue.set_high_grade(id, material_id, high_grade) {
        Ok(())
    } else {
        Err(CqError::MaterialNotFound { id, material_id })
    }
}

fn handle_requeue_item<B: AgentBinding>(
    state: &mut CoordinatorState<B>,
    id: ItemId,
) -> Result<(), CqError> {
    let status = state.find_item(id)?.status;
    match status {
        ItemStatus::Pending => Ok(()),
        ItemStatus::Active if state.orchestrator.active_item_id() == Some(id) => {
            Err(CqError::AlreadyActive(id))
        }
        _ => {
            state.queue.set_status(id, ItemStatus::Pending);
            log_debug!("[coordinator] Requeued {} (was {})", id, status);
            Ok(())
        }
    }
}

async fn handle_start<B: AgentBinding>(
    state: &mut CoordinatorState<B>,
    mode: Option<DispatchMode>,
) -> Result<ItemId, CqError> {
    let mode = mode.unwrap_or(state.default_mode);
    let agent = state.observe_agent().await;
    let effects = state.orchestrator.start(&mut state.queue, &agent, mode)?;
    let id = state
        .orchestrator
        .active_item_id()
        .ok_or(CqError::NothingPending)?;
    state.apply_effects(effects).await;
    Ok(id)
}

async fn handle_start_single<B: AgentBinding>(
    state: &mut CoordinatorState<B>,
    id: ItemId,
) -> Result<(), CqError> {
    let agent = state.observe_agent().await;
    let effects = state
        .orchestrator
        .start_single(&mut state.queue, &agent, id)?;
    state.apply_effects(effects).await;
    Ok(())
}

async fn handle_set_pause<B: AgentBinding>(
    state: &mut CoordinatorState<B>,
    paused: bool,
) -> Result<(), CqError> {
    if !state.bridge.is_available() {
        return Err(CqError::AgentUnavailable);
    }
    state.bridge.set_pause(paused).await;
    log_info!(
        "[coordinator] {} the agent's list",
        if paused { "Paused" } else { "Resumed" }
    );
    Ok(())
}

async fn handle_tick<B: AgentBinding>(state: &mut CoordinatorState<B>) -> TickOutcome {
    let agent = state.observe_agent().await;
    let effects = state.orchestrator.tick(&mut state.queue, &agent);
    let finished = effects.contains(&Effect::Finished);
    state.apply_effects(effects).await;
    TickOutcome {
        session: state.orchestrator.state(),
        finished,
    }
}

// --- Actor loop ---

async fn run_coordinator<B: AgentBinding>(
    mut rx: mpsc::Receiver<CoordinatorCommand>,
    mut state: CoordinatorState<B>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            CoordinatorCommand::GetSnapshot { reply } => {
                let _ = reply.send(state.snapshot());
            }
            CoordinatorCommand::AddItem { item, reply } => {
                let _ = reply.send(handle_add_item(&mut state, item));
            }
            CoordinatorCommand::AddSelected { quantity, reply } => {
                let _ = reply.send(handle_add_selected(&mut state, quantity));
            }
            CoordinatorCommand::RemoveItem { id, reply } => {
                let _ = reply.send(handle_remove_item(&mut state, id));
            }
            CoordinatorCommand::MoveItem {
                id,
                new_index,
                reply,
            } => {
                let _ = reply.send(handle_move_item(&mut state, id, new_index));
            }
            CoordinatorCommand::SetQuantity {
                id,
                quantity,
                reply,
            } => {
                let _ = reply.send(handle_set_quantity(&mut state, id, quantity));
            }
            CoordinatorCommand::SetHighGrade {
                id,
                material_id,
                high_grade,
                reply,
            } => {
                let result = handle_set_high_grade(&mut state, id, material_id, high_grade);
                let _ = reply.send(result);
            }
            CoordinatorCommand::RequeueItem { id, reply } => {
                let _ = reply.send(handle_requeue_item(&mut state, id));
            }
            CoordinatorCommand::ClearQueue { reply } => {
                state.queue.clear();
                let _ = reply.send(());
            }
            CoordinatorCommand::ClearCompleted { reply } => {
                let _ = reply.send(state.queue.clear_completed());
            }
            CoordinatorCommand::Start { mode, reply } => {
                let result = handle_start(&mut state, mode).await;
                if let Err(e) = &result {
                    log_warn!("[coordinator] Start rejected: {}", e);
                }
                let _ = reply.send(result);
            }
            CoordinatorCommand::StartSingle { id, reply } => {
                let result = handle_start_single(&mut state, id).await;
                if let Err(e) = &result {
                    log_warn!("[coordinator] Start rejected: {}", e);
                }
                let _ = reply.send(result);
            }
            CoordinatorCommand::Stop { reply } => {
                let effects = state.orchestrator.stop();
                state.apply_effects(effects).await;
                let _ = reply.send(());
            }
            CoordinatorCommand::SetPause { paused, reply } => {
                let _ = reply.send(handle_set_pause(&mut state, paused).await);
            }
            CoordinatorCommand::Tick { reply } => {
                let _ = reply.send(handle_tick(&mut state).await);
            }
            CoordinatorCommand::RecipeEvent { event, reply } => {
                state.selection.apply(event);
                let _ = reply.send(state.selection.selected_recipe());
            }
        }
    }

    log_debug!("[coordinator] All handles dropped, shutting down");
}

// --- Spawn ---

pub fn spawn_coordinator<B: AgentBinding + 'static>(
    bridge: AgentBridge<B>,
    catalog: Arc<dyn RecipeCatalog>,
    policy: OrchestratorPolicy,
    default_mode: DispatchMode,
) -> (CoordinatorHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let queue = WorkQueue::new();
    let changes = queue.subscribe();

    let state = CoordinatorState {
        queue,
        orchestrator: Orchestrator::new(policy),
        bridge,
        catalog,
        selection: SelectionTracker::new(),
        default_mode,
    };
    let task_handle = tokio::spawn(run_coordinator(rx, state));

    (
        CoordinatorHandle {
            sender: tx,
            changes,
        },
        task_handle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::MockAgentBinding;
    use crate::bridge::DEFAULT_CALL_TIMEOUT;
    use crate::catalog::EmptyCatalog;

    fn spawn_with(binding: MockAgentBinding) -> (CoordinatorHandle, tokio::task::JoinHandle<()>) {
        spawn_coordinator(
            AgentBridge::new(binding, DEFAULT_CALL_TIMEOUT),
            Arc::new(EmptyCatalog),
            OrchestratorPolicy::default(),
            DispatchMode::SequentialAll,
        )
    }

    #[tokio::test]
    async fn spawn_coordinator_returns_joinhandle() {
        let (handle, task_handle) = spawn_with(MockAgentBinding::new());

        // Dropping the only handle closes the channel and ends the actor
        drop(handle);

        let result = task_handle.await;
        assert!(
            result.is_ok(),
            "JoinHandle should resolve to Ok(()), got: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn requeue_rejects_the_item_in_flight() {
        let agent = MockAgentBinding::new();
        let (handle, _task) = spawn_with(agent.clone());
        let id = handle.add_item(NewItem::new(10, 1)).await.unwrap();
        handle.start(None).await.unwrap();

        assert_eq!(
            handle.requeue_item(id).await,
            Err(CqError::AlreadyActive(id))
        );
    }

    #[tokio::test]
    async fn requeue_after_stop_returns_item_to_pending() {
        let agent = MockAgentBinding::new();
        let (handle, _task) = spawn_with(agent.clone());
        let id = handle.add_item(NewItem::new(10, 1)).await.unwrap();
        handle.start(None).await.unwrap();
        handle.stop().await.unwrap();

        handle.requeue_item(id).await.unwrap();
        let snapshot = handle.get_snapshot().await.unwrap();
        assert_eq!(snapshot.item(id).unwrap().status, ItemStatus::Pending);
        assert!(agent.stop_requested());
    }
}
