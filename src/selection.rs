use crate::log_debug;
use crate::types::RecipeEvent;

/// Tracks the crafting log and the recipe currently selected in it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SelectionTracker {
    log_open: bool,
    selected: Option<u32>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_log_open(&self) -> bool {
        self.log_open
    }

    pub fn selected_recipe(&self) -> Option<u32> {
        self.selected
    }

    /// Apply one event. Returns true if the selected recipe changed.
    pub fn apply(&mut self, event: RecipeEvent) -> bool {
        let before = self.selected;
        match event {
            RecipeEvent::LogOpened => {
                self.log_open = true;
                log_debug!("[selection] Crafting log opened.");
            }
            RecipeEvent::LogClosed => {
                self.log_open = false;
                self.selected = None;
                log_debug!("[selection] Crafting log closed.");
            }
            RecipeEvent::RecipeChanged(0) => self.selected = None,
            RecipeEvent::RecipeChanged(id) => {
                // A selection implies the log is showing
                self.log_open = true;
                self.selected = Some(id);
            }
        }
        if self.selected != before {
            log_debug!("[selection] Selected recipe is now {:?}", self.selected);
        }
        self.selected != before
    }
}
