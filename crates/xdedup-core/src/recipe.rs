use std::sync::Arc;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use tracing::debug;
use xdedup_storage::StorageBackend;
use xdedup_types::recipe::Recipe;

use crate::error::{Result, XdedupError};

const RECIPE_PREFIX: &str = "recipes/";

/// Storage key of the recipe named `name`.
pub fn recipe_key(name: &str) -> String {
    let digest = Blake2b::<U32>::digest(name.as_bytes());
    format!("{RECIPE_PREFIX}{}", hex::encode(digest))
}

/// File recipes of one site, stored as msgpack objects.
#[derive(Clone)]
pub struct RecipeStore {
    storage: Arc<dyn StorageBackend>,
}

impl RecipeStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Store a recipe, replacing any previous one with the same name.
    pub fn save(&self, recipe: &Recipe) -> Result<()> {
        let bytes = rmp_serde::to_vec(recipe)?;
        self.storage.put(&recipe_key(&recipe.name), &bytes)?;
        debug!(
            file = %recipe.name,
            entries = recipe.entries.len(),
            size = recipe.size,
            "saved recipe"
        );
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Recipe> {
        let bytes = self
            .storage
            .get(&recipe_key(name))?
            .ok_or_else(|| XdedupError::RecipeNotFound(name.to_string()))?;
        let recipe: Recipe = rmp_serde::from_slice(&bytes)?;
        if recipe.name != name {
            return Err(XdedupError::InvalidFormat(format!(
                "recipe stored for '{name}' names '{}'",
                recipe.name
            )));
        }
        Ok(recipe)
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        self.storage.exists(&recipe_key(name))
    }

    /// Names of every stored recipe, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for key in self.storage.list(RECIPE_PREFIX)? {
            let bytes = match self.storage.get(&key)? {
                Some(b) => b,
                None => continue,
            };
            let recipe: Recipe = rmp_serde::from_slice(&bytes)?;
            names.push(recipe.name);
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.storage.delete(&recipe_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdedup_storage::MemoryBackend;
    use xdedup_types::container_id::ContainerId;
    use xdedup_types::recipe::RecipeEntry;

    fn store() -> RecipeStore {
        RecipeStore::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn save_load_and_list() {
        let recipes = store();
        let mut recipe = Recipe::new("docs/report.pdf", 4096);
        recipe.entries.push(RecipeEntry {
            container_id: ContainerId([1; 16]),
            offset: 0,
            length: 4096,
        });
        recipes.save(&recipe).unwrap();
        recipes.save(&Recipe::new("empty", 0)).unwrap();

        assert_eq!(recipes.load("docs/report.pdf").unwrap(), recipe);
        assert_eq!(recipes.list().unwrap(), vec!["docs/report.pdf", "empty"]);
        assert!(recipes.exists("empty").unwrap());
    }

    #[test]
    fn missing_recipe_is_reported_by_name() {
        let err = store().load("nope").unwrap_err();
        assert!(matches!(err, XdedupError::RecipeNotFound(ref n) if n == "nope"));
    }

    #[test]
    fn keys_hide_names() {
        let key = recipe_key("secret/plan.txt");
        assert!(key.starts_with(RECIPE_PREFIX));
        assert!(!key.contains("secret"));
        assert_eq!(key.len(), RECIPE_PREFIX.len() + 64);
    }
}
