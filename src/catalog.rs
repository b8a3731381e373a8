use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::log_debug;
use crate::types::MaterialOverride;

/// One ingredient line of a recipe as the metadata source describes it.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RecipeMaterial {
    pub material_id: u32,
    pub name: String,
    pub amount: u32,
}

/// Recipe metadata lookup. Purely informational: callers go through
/// `resolve_display_name` and `resolve_materials`, which never fail.
pub trait RecipeCatalog: Send + Sync {
    fn display_name(&self, recipe_id: u32) -> Result<String, String>;
    fn materials(&self, recipe_id: u32) -> Result<Vec<RecipeMaterial>, String>;
}

/// Name shown for recipes the catalog cannot resolve.
pub fn placeholder_name(recipe_id: u32) -> String {
    format!("Recipe #{}", recipe_id)
}

pub fn resolve_display_name(catalog: &dyn RecipeCatalog, recipe_id: u32) -> String {
    match catalog.display_name(recipe_id) {
        Ok(name) if !name.trim().is_empty() => name,
        Ok(_) => placeholder_name(recipe_id),
        Err(e) => {
            log_debug!("[catalog] No name for recipe {}: {}", recipe_id, e);
            placeholder_name(recipe_id)
        }
    }
}

/// Ingredient list as material overrides, all units starting low grade.
/// Zero-amount ingredients are dropped; lookup failures yield an empty list.
pub fn resolve_materials(catalog: &dyn RecipeCatalog, recipe_id: u32) -> Vec<MaterialOverride> {
    match catalog.materials(recipe_id) {
        Ok(materials) => materials
            .into_iter()
            .filter(|m| m.amount > 0)
            .map(|m| MaterialOverride {
                material_id: m.material_id,
                name: m.name,
                low_grade: m.amount,
                high_grade: 0,
            })
            .collect(),
        Err(e) => {
            log_debug!(
                "[catalog] Failed to read materials for recipe {}: {}",
                recipe_id,
                e
            );
            Vec::new()
        }
    }
}

/// Catalog that knows no recipes.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyCatalog;

impl RecipeCatalog for EmptyCatalog {
    fn display_name(&self, recipe_id: u32) -> Result<String, String> {
        Err(format!("recipe {} not in catalog", recipe_id))
    }

    fn materials(&self, recipe_id: u32) -> Result<Vec<RecipeMaterial>, String> {
        Err(format!("recipe {} not in catalog", recipe_id))
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct RecipeEntry {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub materials: Vec<RecipeMaterial>,
}

#[derive(Deserialize, Default, Debug)]
struct CatalogFile {
    #[serde(default)]
    recipes: Vec<RecipeEntry>,
}

/// Catalog read from a TOML file of `[[recipes]]` tables.
#[derive(Debug, Default, Clone)]
pub struct TomlCatalog {
    recipes: HashMap<u32, RecipeEntry>,
}

impl TomlCatalog {
    pub fn from_entries(entries: Vec<RecipeEntry>) -> Self {
        Self {
            recipes: entries.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        let file: CatalogFile =
            toml::from_str(contents).map_err(|e| format!("Failed to parse catalog: {}", e))?;
        Ok(Self::from_entries(file.recipes))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::parse(&contents).map_err(|e| format!("{} ({})", e, path.display()))
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    fn entry(&self, recipe_id: u32) -> Result<&RecipeEntry, String> {
        self.recipes
            .get(&recipe_id)
            .ok_or_else(|| format!("recipe {} not in catalog", recipe_id))
    }
}

impl RecipeCatalog for TomlCatalog {
    fn display_name(&self, recipe_id: u32) -> Result<String, String> {
        self.entry(recipe_id).map(|e| e.name.clone())
    }

    fn materials(&self, recipe_id: u32) -> Result<Vec<RecipeMaterial>, String> {
        self.entry(recipe_id).map(|e| e.materials.clone())
    }
}
