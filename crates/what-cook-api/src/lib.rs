use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use what_cook_core::{
    build_recommendation_package, CatalogError, Ingredient, IngredientId, Recipe, RecipeId,
    RecommendationPackage, Requirement,
};
use what_cook_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub current_version: i64,
    pub target_version: i64,
    pub applied_versions: Vec<i64>,
    pub after_version: i64,
    pub up_to_date: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngredientRequest {
    pub name: String,
    pub calories: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequirementInput {
    pub ingredient_id: IngredientId,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FoodRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ingredients: Vec<RequirementInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecommendRequest {
    pub ingredients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub kind: String,
    pub id: String,
    pub deleted: bool,
}

/// Catalog entry point shared by the HTTP service and the CLI.
///
/// Every call opens its own connection, so one value can be cloned across handlers.
#[derive(Debug, Clone)]
pub struct CatalogApi {
    db_path: PathBuf,
}

impl CatalogApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            current_version: before.current_version,
            target_version: before.target_version,
            applied_versions: before.pending_versions,
            after_version: after.current_version,
            up_to_date: after.pending_versions.is_empty(),
        })
    }

    /// Run database health probes.
    ///
    /// # Errors
    /// Returns an error when any probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_store()?;
        store.integrity_check()
    }

    /// Write a backup copy of the database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when the backup cannot be written.
    pub fn backup(&self, out_file: &Path) -> Result<()> {
        let store = self.open_migrated_store()?;
        store.backup_database(out_file)
    }

    /// Create one ingredient.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] or [`CatalogError::Conflict`] for rejected
    /// input, or an error when persistence fails.
    pub fn create_ingredient(&self, input: IngredientRequest) -> Result<Ingredient> {
        let mut store = self.open_migrated_store()?;
        let now = OffsetDateTime::now_utc();
        let ingredient = Ingredient {
            id: IngredientId::new(),
            name: input.name,
            calories: input.calories,
            created_at: now,
            updated_at: now,
        };
        store.save_ingredient(&ingredient)?;
        tracing::info!(ingredient_id = %ingredient.id, name = %ingredient.name, "created ingredient");
        Ok(ingredient)
    }

    /// # Errors
    /// Returns [`CatalogError::NotFound`] when the ingredient does not exist.
    pub fn get_ingredient(&self, id: IngredientId) -> Result<Ingredient> {
        let store = self.open_migrated_store()?;
        store.get_ingredient(id)
    }

    /// Replace name and calories of an existing ingredient.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`], [`CatalogError::Validation`] or
    /// [`CatalogError::Conflict`], or an error when persistence fails.
    pub fn update_ingredient(
        &self,
        id: IngredientId,
        input: IngredientRequest,
    ) -> Result<Ingredient> {
        let mut store = self.open_migrated_store()?;
        let mut ingredient = store.get_ingredient(id)?;
        ingredient.name = input.name;
        ingredient.calories = input.calories;
        ingredient.updated_at = OffsetDateTime::now_utc();
        store.update_ingredient(id, &ingredient)?;
        Ok(ingredient)
    }

    /// # Errors
    /// Returns [`CatalogError::NotFound`] or [`CatalogError::Conflict`], or an error
    /// when persistence fails.
    pub fn delete_ingredient(&self, id: IngredientId) -> Result<DeleteResult> {
        let mut store = self.open_migrated_store()?;
        store.delete_ingredient(id)?;
        tracing::info!(ingredient_id = %id, "deleted ingredient");
        Ok(DeleteResult { kind: "ingredient".to_string(), id: id.to_string(), deleted: true })
    }

    /// # Errors
    /// Returns an error when the listing query fails.
    pub fn list_ingredients(&self) -> Result<Vec<Ingredient>> {
        let store = self.open_migrated_store()?;
        store.list_ingredients()
    }

    /// Create one food with its ingredient weights.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] for rejected input or unknown ingredients,
    /// or an error when persistence fails.
    pub fn create_food(&self, input: FoodRequest) -> Result<Recipe> {
        let mut store = self.open_migrated_store()?;
        let now = OffsetDateTime::now_utc();
        let recipe = Recipe {
            id: RecipeId::new(),
            requirements: resolve_requirements(&store, &input.ingredients)?,
            name: input.name,
            description: input.description,
            created_at: now,
            updated_at: now,
        };
        store.save_recipe(&recipe)?;
        tracing::info!(
            food_id = %recipe.id,
            requirements = recipe.requirements.len(),
            "created food"
        );
        Ok(recipe)
    }

    /// # Errors
    /// Returns [`CatalogError::NotFound`] when the food does not exist.
    pub fn get_food(&self, id: RecipeId) -> Result<Recipe> {
        let store = self.open_migrated_store()?;
        store.get_recipe(id)
    }

    /// Replace name, description and ingredient weights of an existing food.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`] or [`CatalogError::Validation`], or an error
    /// when persistence fails.
    pub fn update_food(&self, id: RecipeId, input: FoodRequest) -> Result<Recipe> {
        let mut store = self.open_migrated_store()?;
        let existing = store.get_recipe(id)?;
        let recipe = Recipe {
            id,
            requirements: resolve_requirements(&store, &input.ingredients)?,
            name: input.name,
            description: input.description,
            created_at: existing.created_at,
            updated_at: OffsetDateTime::now_utc(),
        };
        store.update_recipe(id, &recipe)?;
        Ok(recipe)
    }

    /// # Errors
    /// Returns [`CatalogError::NotFound`] when the food does not exist.
    pub fn delete_food(&self, id: RecipeId) -> Result<DeleteResult> {
        let mut store = self.open_migrated_store()?;
        store.delete_recipe(id)?;
        tracing::info!(food_id = %id, "deleted food");
        Ok(DeleteResult { kind: "food".to_string(), id: id.to_string(), deleted: true })
    }

    /// # Errors
    /// Returns an error when the listing query fails.
    pub fn list_foods(&self) -> Result<Vec<Recipe>> {
        let store = self.open_migrated_store()?;
        store.list_recipes()
    }

    /// Rank foods that can be fully or partially cooked from the named ingredients.
    ///
    /// # Errors
    /// Returns [`CatalogError::Storage`] when a catalog query fails.
    pub fn recommend(&self, input: RecommendRequest) -> Result<RecommendationPackage> {
        let store = self.open_migrated_store()?;
        let package = build_recommendation_package(&store, &input.ingredients)?;
        tracing::debug!(
            requested = package.requested_ingredients.len(),
            resolved = package.resolved_ingredients.len(),
            unresolved = package.unresolved_ingredients.len(),
            recommendations = package.recommendations.len(),
            "built recommendation package"
        );
        Ok(package)
    }
}

fn resolve_requirements(
    store: &SqliteStore,
    inputs: &[RequirementInput],
) -> Result<Vec<Requirement>> {
    let mut requirements = Vec::with_capacity(inputs.len());
    for input in inputs {
        let ingredient = match store.get_ingredient(input.ingredient_id) {
            Ok(ingredient) => ingredient,
            Err(err) => {
                return Err(match err.downcast::<CatalogError>() {
                    Ok(CatalogError::NotFound(_)) => CatalogError::Validation(format!(
                        "food references unknown ingredient {}",
                        input.ingredient_id
                    ))
                    .into(),
                    Ok(other) => other.into(),
                    Err(other) => other,
                });
            }
        };
        requirements.push(Requirement { ingredient, weight: input.weight });
    }
    Ok(requirements)
}
