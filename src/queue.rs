use chrono::Utc;
use tokio::sync::watch;

use crate::log_debug;
use crate::types::{clamp_quantity, ItemId, ItemStatus, MaterialOverride, WorkItem};

/// Ordered list of work items with stable identity.
///
/// The queue is a plain container: it does not enforce the single-active
/// rule, so the presentation layer can keep editing while a craft is in
/// flight. Every successful mutation bumps a revision published on a
/// `watch` channel; failed mutations leave both the items and the revision
/// untouched.
#[derive(Debug)]
pub struct WorkQueue {
    items: Vec<WorkItem>,
    next_item_id: u64,
    changes: watch::Sender<u64>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            items: Vec::new(),
            next_item_id: 1,
            changes,
        }
    }

    // --- Queries ---

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&WorkItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn position(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }

    /// First pending item in current queue order.
    ///
    /// This is the only rule for choosing what runs next. It is evaluated
    /// fresh on every call so reorders made mid-run take effect.
    pub fn first_pending(&self) -> Option<&WorkItem> {
        self.items.iter().find(|i| i.status == ItemStatus::Pending)
    }

    pub fn active_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Active)
            .count()
    }

    pub fn first_active(&self) -> Option<&WorkItem> {
        self.items.iter().find(|i| i.status == ItemStatus::Active)
    }

    /// Current revision. Starts at 0 and grows by one per successful mutation.
    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Receiver that observes the revision after every successful mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    // --- Mutations ---

    /// Append a new pending item and return its identity.
    pub fn add(
        &mut self,
        recipe_id: u32,
        display_name: &str,
        quantity: i64,
        materials: Option<Vec<MaterialOverride>>,
    ) -> ItemId {
        let id = ItemId(self.next_item_id);
        self.next_item_id += 1;
        debug_assert!(self.get(id).is_none(), "duplicate item id {}", id);

        self.items.push(WorkItem {
            id,
            recipe_id,
            display_name: display_name.to_string(),
            quantity: clamp_quantity(quantity),
            materials: materials.unwrap_or_default(),
            status: ItemStatus::Pending,
            created_at: Utc::now(),
        });
        log_debug!("[queue] Added {} (recipe {})", id, recipe_id);
        self.notify();
        id
    }

    pub fn remove(&mut self, id: ItemId) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        self.items.remove(index);
        self.notify();
        true
    }

    /// Move an item to `new_index`, keeping the relative order of all others.
    ///
    /// Rejects unknown ids and indices outside `[0, len)` without mutating.
    pub fn move_item(&mut self, id: ItemId, new_index: usize) -> bool {
        let Some(old_index) = self.position(id) else {
            return false;
        };
        if new_index >= self.items.len() {
            return false;
        }

        let item = self.items.remove(old_index);
        self.items.insert(new_index, item);
        self.notify();
        true
    }

    pub fn set_quantity(&mut self, id: ItemId, quantity: i64) -> bool {
        let Some(item) = self.find_mut(id) else {
            return false;
        };
        item.quantity = clamp_quantity(quantity);
        self.notify();
        true
    }

    pub fn set_status(&mut self, id: ItemId, status: ItemStatus) -> bool {
        let Some(item) = self.find_mut(id) else {
            return false;
        };
        item.status = status;
        self.notify();
        true
    }

    /// Shift units of one material between low and high grade.
    ///
    /// The material's total stays fixed; `high_grade` is clamped to it.
    pub fn set_high_grade(&mut self, id: ItemId, material_id: u32, high_grade: u32) -> bool {
        let Some(item) = self.find_mut(id) else {
            return false;
        };
        let Some(material) = item
            .materials
            .iter_mut()
            .find(|m| m.material_id == material_id)
        else {
            return false;
        };

        let total = material.total();
        material.high_grade = high_grade.min(total);
        material.low_grade = total - material.high_grade;
        self.notify();
        true
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.notify();
    }

    /// Remove exactly the completed items. Returns how many were removed.
    pub fn clear_completed(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|i| i.status != ItemStatus::Completed);
        let removed = before - self.items.len();
        self.notify();
        removed
    }

    fn find_mut(&mut self, id: ItemId) -> Option<&mut WorkItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    fn notify(&self) {
        self.changes.send_modify(|rev| *rev += 1);
    }
}
