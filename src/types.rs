use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Smallest quantity a work item may hold.
pub const MIN_QUANTITY: u32 = 1;

/// Largest quantity a work item may hold.
pub const MAX_QUANTITY: u32 = 9999;

/// Clamp a requested quantity into `[MIN_QUANTITY, MAX_QUANTITY]`.
///
/// Takes `i64` so that decrementing past zero from the presentation layer
/// still lands on the minimum instead of wrapping.
pub fn clamp_quantity(quantity: i64) -> u32 {
    quantity.clamp(MIN_QUANTITY as i64, MAX_QUANTITY as i64) as u32
}

// --- Identity ---

/// Stable identity of a queued item. Assigned by the queue, never reused.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches('#');
        digits
            .parse::<u64>()
            .map(ItemId)
            .map_err(|_| format!("Invalid item id '{}': expected a number like #3", s))
    }
}

// --- Enums ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::Active => write!(f, "active"),
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

pub fn parse_item_status(s: &str) -> Result<ItemStatus, String> {
    match s.to_lowercase().as_str() {
        "pending" => Ok(ItemStatus::Pending),
        "active" => Ok(ItemStatus::Active),
        "completed" | "done" => Ok(ItemStatus::Completed),
        "failed" => Ok(ItemStatus::Failed),
        _ => Err(format!(
            "Invalid status '{}': expected pending, active, completed, or failed",
            s
        )),
    }
}

/// How far a started session runs on its own.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Process exactly one item, then go idle.
    Single,
    /// Keep advancing through the queue until nothing is pending.
    SequentialAll,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Single => write!(f, "single"),
            DispatchMode::SequentialAll => write!(f, "sequential"),
        }
    }
}

/// Boolean queries the agent answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgentQuery {
    IsBusy,
    IsListRunning,
    IsListPaused,
    GetEnduranceStatus,
    GetStopRequest,
}

impl AgentQuery {
    pub fn wire_name(&self) -> &'static str {
        match self {
            AgentQuery::IsBusy => "is-busy",
            AgentQuery::IsListRunning => "is-list-running",
            AgentQuery::IsListPaused => "is-list-paused",
            AgentQuery::GetEnduranceStatus => "get-endurance-status",
            AgentQuery::GetStopRequest => "get-stop-request",
        }
    }
}

/// Fire-and-forget commands the agent accepts. No acknowledgement exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentCommand {
    CraftItem {
        recipe_id: u32,
        quantity: u32,
        materials: Vec<MaterialOverride>,
    },
    SetListPause(bool),
    SetStopRequest(bool),
    SetEnduranceStatus(bool),
}

impl AgentCommand {
    pub fn wire_name(&self) -> &'static str {
        match self {
            AgentCommand::CraftItem { .. } => "craft-item",
            AgentCommand::SetListPause(_) => "set-list-pause",
            AgentCommand::SetStopRequest(_) => "set-stop-request",
            AgentCommand::SetEnduranceStatus(_) => "set-endurance-status",
        }
    }

    /// Positional arguments following the command name on the wire.
    pub fn wire_args(&self) -> Vec<String> {
        match self {
            AgentCommand::CraftItem {
                recipe_id,
                quantity,
                materials,
            } => {
                let mut args = vec![recipe_id.to_string(), quantity.to_string()];
                args.extend(
                    materials
                        .iter()
                        .filter(|m| m.high_grade > 0)
                        .map(|m| format!("hq={}:{}", m.material_id, m.high_grade)),
                );
                args
            }
            AgentCommand::SetListPause(v)
            | AgentCommand::SetStopRequest(v)
            | AgentCommand::SetEnduranceStatus(v) => vec![v.to_string()],
        }
    }
}

/// Selected-recipe notifications from the host's crafting log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecipeEvent {
    LogOpened,
    LogClosed,
    /// `0` means nothing is selected.
    RecipeChanged(u32),
}

// --- Structs ---

/// One ingredient of a queued craft, split into low- and high-grade units.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MaterialOverride {
    pub material_id: u32,
    pub name: String,
    pub low_grade: u32,
    pub high_grade: u32,
}

impl MaterialOverride {
    pub fn total(&self) -> u32 {
        self.low_grade + self.high_grade
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WorkItem {
    pub id: ItemId,
    pub recipe_id: u32,
    pub display_name: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<MaterialOverride>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

/// Last observation of the agent. Any field may be stale.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AgentStatus {
    pub available: bool,
    pub busy: bool,
    pub list_running: bool,
    pub paused: bool,
}

impl AgentStatus {
    /// Status of an agent that answered and reported no work in flight.
    pub fn idle() -> Self {
        Self {
            available: true,
            ..Self::default()
        }
    }

    /// Status of an agent that answered and reported itself busy.
    pub fn working() -> Self {
        Self {
            available: true,
            busy: true,
            list_running: true,
            paused: false,
        }
    }

    /// Whether the agent is reachable and reports nothing in progress.
    pub fn is_idle(&self) -> bool {
        self.available && !self.busy && !self.list_running
    }
}

/// Parameters sent to the agent for one item.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DispatchOrder {
    pub item_id: ItemId,
    pub recipe_id: u32,
    pub quantity: u32,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<MaterialOverride>,
}

impl DispatchOrder {
    pub fn from_item(item: &WorkItem) -> Self {
        Self {
            item_id: item.id,
            recipe_id: item.recipe_id,
            quantity: item.quantity,
            display_name: item.display_name.clone(),
            materials: item.materials.clone(),
        }
    }

    pub fn into_command(self) -> AgentCommand {
        AgentCommand::CraftItem {
            recipe_id: self.recipe_id,
            quantity: self.quantity,
            materials: self.materials,
        }
    }
}
