#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use craft_queue::agent::MockAgentBinding;
use craft_queue::bridge::{AgentBridge, DEFAULT_CALL_TIMEOUT};
use craft_queue::catalog::{RecipeCatalog, RecipeEntry, RecipeMaterial, TomlCatalog};
use craft_queue::coordinator::{spawn_coordinator, CoordinatorHandle};
use craft_queue::orchestrator::OrchestratorPolicy;
use craft_queue::queue::WorkQueue;
use craft_queue::types::{DispatchMode, ItemId, ItemStatus, MaterialOverride, WorkItem};

/// Creates a `WorkItem` with minimal defaults.
///
/// The display name is `"Recipe {recipe_id}"`, quantity 1, no materials, and
/// `created_at` fixed at `2026-02-10T00:00:00Z`.
pub fn make_item(id: u64, recipe_id: u32, status: ItemStatus) -> WorkItem {
    WorkItem {
        id: ItemId(id),
        recipe_id,
        display_name: format!("Recipe {}", recipe_id),
        quantity: 1,
        materials: Vec::new(),
        status,
        created_at: Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap(),
    }
}

/// Builds a queue holding one pending item per recipe id, in order.
pub fn queue_with(recipes: &[u32]) -> (WorkQueue, Vec<ItemId>) {
    let mut queue = WorkQueue::new();
    let ids = recipes
        .iter()
        .map(|&r| queue.add(r, &format!("Recipe {}", r), 1, None))
        .collect();
    (queue, ids)
}

pub fn statuses(queue: &WorkQueue) -> Vec<ItemStatus> {
    queue.items().iter().map(|i| i.status).collect()
}

pub fn recipe_order(queue: &WorkQueue) -> Vec<u32> {
    queue.items().iter().map(|i| i.recipe_id).collect()
}

pub fn material(material_id: u32, low_grade: u32, high_grade: u32) -> MaterialOverride {
    MaterialOverride {
        material_id,
        name: format!("Material {}", material_id),
        low_grade,
        high_grade,
    }
}

/// Catalog with two recipes: 100 "Bronze Ingot" and 200 "Iron Ingot".
pub fn sample_catalog() -> TomlCatalog {
    TomlCatalog::from_entries(vec![
        RecipeEntry {
            id: 100,
            name: "Bronze Ingot".to_string(),
            materials: vec![
                RecipeMaterial {
                    material_id: 5,
                    name: "Copper Ore".to_string(),
                    amount: 3,
                },
                RecipeMaterial {
                    material_id: 6,
                    name: "Tin Ore".to_string(),
                    amount: 1,
                },
            ],
        },
        RecipeEntry {
            id: 200,
            name: "Iron Ingot".to_string(),
            materials: vec![RecipeMaterial {
                material_id: 7,
                name: "Iron Ore".to_string(),
                amount: 4,
            }],
        },
    ])
}

/// Spawns a coordinator over `agent` with the sample catalog.
pub fn spawn_test_coordinator(
    agent: &MockAgentBinding,
    policy: OrchestratorPolicy,
    default_mode: DispatchMode,
) -> (CoordinatorHandle, tokio::task::JoinHandle<()>) {
    let catalog: Arc<dyn RecipeCatalog> = Arc::new(sample_catalog());
    spawn_coordinator(
        AgentBridge::new(agent.clone(), DEFAULT_CALL_TIMEOUT),
        catalog,
        policy,
        default_mode,
    )
}

pub fn keep_completed() -> OrchestratorPolicy {
    OrchestratorPolicy {
        auto_remove_completed: false,
        stall_ticks: 0,
    }
}

pub fn remove_completed() -> OrchestratorPolicy {
    OrchestratorPolicy {
        auto_remove_completed: true,
        stall_ticks: 0,
    }
}

/// Writes `contents` to `file_name` inside `dir` and returns the path.
pub fn write_file(dir: &Path, file_name: &str, contents: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, contents).expect("write test file");
    path
}
