use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;
use what_cook_core::{
    CandidateSummary, CatalogError, CrudRepository, Entity, Ingredient, IngredientId,
    IngredientLookup, Recipe, RecipeId, RecipeSource, Requirement,
};

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS ingredients (
  ingredient_id TEXT PRIMARY KEY,
  name TEXT NOT NULL UNIQUE,
  calories REAL NOT NULL CHECK (calories >= 0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS foods (
  food_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  description TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ingredient_weights (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  food_id TEXT NOT NULL,
  ingredient_id TEXT NOT NULL,
  weight REAL NOT NULL CHECK (weight > 0),
  FOREIGN KEY (food_id) REFERENCES foods(food_id) ON DELETE CASCADE,
  FOREIGN KEY (ingredient_id) REFERENCES ingredients(ingredient_id)
);

CREATE INDEX IF NOT EXISTS idx_ingredient_weights_food ON ingredient_weights(food_id);
";

const MIGRATION_002_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_ingredient_weights_ingredient ON ingredient_weights(ingredient_id);
CREATE INDEX IF NOT EXISTS idx_foods_name ON foods(name);
";

const MIGRATIONS: [(i64, &str); 2] = [(1, MIGRATION_001_SQL), (2, MIGRATION_002_SQL)];

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed catalog store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = MIGRATIONS
            .iter()
            .map(|(version, _)| *version)
            .filter(|version| *version > current_version)
            .collect();

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when the recorded version is unknown or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let current = current_schema_version(&self.conn)?;
        if current > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {current}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (version, sql) in MIGRATIONS {
            if version <= current {
                continue;
            }

            let tx = self
                .conn
                .transaction()
                .with_context(|| format!("failed to start migration v{version} transaction"))?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
            record_schema_version(&tx, version)?;
            tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
            tracing::info!(version, "applied catalog schema migration");
        }

        Ok(())
    }

    /// Persist a new ingredient.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] for invalid input, [`CatalogError::Conflict`]
    /// when the name is taken, or an error when the write fails.
    pub fn save_ingredient(&mut self, ingredient: &Ingredient) -> Result<()> {
        ingredient.validate()?;
        if let Some(existing) = self.ingredient_id_by_name(&ingredient.name)? {
            return Err(CatalogError::Conflict(format!(
                "ingredient name {} is already used by {existing}",
                ingredient.name
            ))
            .into());
        }

        self.conn
            .execute(
                "INSERT INTO ingredients(ingredient_id, name, calories, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    ingredient.id.to_string(),
                    ingredient.name,
                    ingredient.calories,
                    rfc3339(ingredient.created_at)?,
                    rfc3339(ingredient.updated_at)?,
                ],
            )
            .context("failed to insert ingredient")?;
        Ok(())
    }

    /// Load one ingredient by id.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`] when the ingredient does not exist.
    pub fn get_ingredient(&self, id: IngredientId) -> Result<Ingredient> {
        let row = self
            .conn
            .query_row(
                "SELECT ingredient_id, name, calories, created_at, updated_at
                 FROM ingredients WHERE ingredient_id = ?1",
                params![id.to_string()],
                IngredientRow::from_row,
            )
            .optional()
            .context("failed to query ingredient")?;

        match row {
            Some(row) => row.into_ingredient(),
            None => Err(CatalogError::NotFound(format!("ingredient {id}")).into()),
        }
    }

    /// Replace name and calories of the ingredient stored under `id`.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`], [`CatalogError::Validation`] or
    /// [`CatalogError::Conflict`], or an error when the write fails.
    pub fn update_ingredient(&mut self, id: IngredientId, ingredient: &Ingredient) -> Result<()> {
        ingredient.validate()?;
        if !self.ingredient_exists(id)? {
            return Err(CatalogError::NotFound(format!("ingredient {id}")).into());
        }
        if let Some(existing) = self.ingredient_id_by_name(&ingredient.name)? {
            if existing != id {
                return Err(CatalogError::Conflict(format!(
                    "ingredient name {} is already used by {existing}",
                    ingredient.name
                ))
                .into());
            }
        }

        self.conn
            .execute(
                "UPDATE ingredients SET name = ?2, calories = ?3, updated_at = ?4
                 WHERE ingredient_id = ?1",
                params![
                    id.to_string(),
                    ingredient.name,
                    ingredient.calories,
                    rfc3339(ingredient.updated_at)?,
                ],
            )
            .context("failed to update ingredient")?;
        Ok(())
    }

    /// Delete an ingredient that no food references.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`] or [`CatalogError::Conflict`], or an error when
    /// the write fails.
    pub fn delete_ingredient(&mut self, id: IngredientId) -> Result<()> {
        if !self.ingredient_exists(id)? {
            return Err(CatalogError::NotFound(format!("ingredient {id}")).into());
        }

        let references: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM ingredient_weights WHERE ingredient_id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .context("failed to count ingredient references")?;
        if references > 0 {
            return Err(CatalogError::Conflict(format!(
                "ingredient {id} is still required by {references} food ingredient weights"
            ))
            .into());
        }

        self.conn
            .execute("DELETE FROM ingredients WHERE ingredient_id = ?1", params![id.to_string()])
            .context("failed to delete ingredient")?;
        Ok(())
    }

    /// List every ingredient ordered by name.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_ingredients(&self) -> Result<Vec<Ingredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT ingredient_id, name, calories, created_at, updated_at
             FROM ingredients
             ORDER BY name ASC",
        )?;
        let rows = stmt.query_map([], IngredientRow::from_row)?;

        let mut ingredients = Vec::new();
        for row in rows {
            ingredients.push(row?.into_ingredient()?);
        }
        Ok(ingredients)
    }

    /// Persist a new food together with its ingredient weights.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] for invalid input or unknown ingredients, or
    /// an error when the transaction fails.
    pub fn save_recipe(&mut self, recipe: &Recipe) -> Result<()> {
        recipe.validate()?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO foods(food_id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                recipe.id.to_string(),
                recipe.name,
                recipe.description,
                rfc3339(recipe.created_at)?,
                rfc3339(recipe.updated_at)?,
            ],
        )
        .context("failed to insert food")?;
        insert_requirements(&tx, recipe.id, &recipe.requirements)?;
        tx.commit().context("failed to commit food transaction")?;
        Ok(())
    }

    /// Load one food with its ingredient weights populated.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`] when the food does not exist.
    pub fn get_recipe(&self, id: RecipeId) -> Result<Recipe> {
        self.load_recipes(&[id])?
            .pop()
            .ok_or_else(|| CatalogError::NotFound(format!("food {id}")).into())
    }

    /// Replace name, description and the whole ingredient weight list of a food.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`] or [`CatalogError::Validation`], or an error
    /// when the transaction fails.
    pub fn update_recipe(&mut self, id: RecipeId, recipe: &Recipe) -> Result<()> {
        recipe.validate()?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        let updated = tx
            .execute(
                "UPDATE foods SET name = ?2, description = ?3, updated_at = ?4 WHERE food_id = ?1",
                params![
                    id.to_string(),
                    recipe.name,
                    recipe.description,
                    rfc3339(recipe.updated_at)?
                ],
            )
            .context("failed to update food")?;
        if updated == 0 {
            return Err(CatalogError::NotFound(format!("food {id}")).into());
        }

        tx.execute("DELETE FROM ingredient_weights WHERE food_id = ?1", params![id.to_string()])
            .context("failed to clear food ingredient weights")?;
        insert_requirements(&tx, id, &recipe.requirements)?;
        tx.commit().context("failed to commit food update")?;
        Ok(())
    }

    /// Delete a food and its ingredient weights.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`], or an error when the transaction fails.
    pub fn delete_recipe(&mut self, id: RecipeId) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute("DELETE FROM ingredient_weights WHERE food_id = ?1", params![id.to_string()])
            .context("failed to delete food ingredient weights")?;
        let deleted = tx
            .execute("DELETE FROM foods WHERE food_id = ?1", params![id.to_string()])
            .context("failed to delete food")?;
        if deleted == 0 {
            return Err(CatalogError::NotFound(format!("food {id}")).into());
        }
        tx.commit().context("failed to commit food delete")?;
        Ok(())
    }

    /// List every food with ingredient weights, ordered by name then id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt =
            self.conn.prepare("SELECT food_id FROM foods ORDER BY name ASC, food_id ASC")?;
        let mut rows = stmt.query([])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(parse_recipe_id(&row.get::<_, String>(0)?)?);
        }
        self.load_recipes(&ids)
    }

    /// Look up ingredients whose names exactly equal one of `names`.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn ingredients_by_name(&self, names: &BTreeSet<String>) -> Result<Vec<Ingredient>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(
                "SELECT ingredient_id, name, calories, created_at, updated_at
                 FROM ingredients
                 WHERE name IN (SELECT value FROM json_each(?1))
                 ORDER BY ingredient_id ASC",
            )
            .context("failed to prepare ingredient name lookup")?;
        let rows = stmt.query_map(params![json_array(names)?], IngredientRow::from_row)?;

        let mut ingredients = Vec::new();
        for row in rows {
            ingredients.push(row?.into_ingredient()?);
        }
        Ok(ingredients)
    }

    /// Score foods sharing at least one ingredient weight row with `ids`.
    ///
    /// `total` and `matched` count ingredient weight rows, so duplicated rows for one
    /// ingredient count more than once.
    ///
    /// # Errors
    /// Returns an error when the aggregate query fails.
    pub fn candidate_summaries(&self, ids: &BTreeSet<IngredientId>) -> Result<Vec<CandidateSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(
                "WITH available(ingredient_id) AS (SELECT value FROM json_each(?1))
                 SELECT iw.food_id,
                        COUNT(iw.id) AS total,
                        SUM(CASE WHEN iw.ingredient_id IN (SELECT ingredient_id FROM available)
                            THEN 1 ELSE 0 END) AS matched
                 FROM ingredient_weights iw
                 WHERE iw.food_id IN (
                     SELECT DISTINCT food_id FROM ingredient_weights
                     WHERE ingredient_id IN (SELECT ingredient_id FROM available)
                 )
                 GROUP BY iw.food_id
                 HAVING matched > 0
                 ORDER BY matched DESC, total ASC, iw.food_id ASC",
            )
            .context("failed to prepare candidate query")?;
        let available = json_array(ids.iter().map(ToString::to_string))?;
        let mut rows = stmt.query(params![available])?;

        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            let food_id_raw: String = row.get(0)?;
            let total: i64 = row.get(1)?;
            let matched: i64 = row.get(2)?;
            summaries.push(CandidateSummary {
                recipe_id: parse_recipe_id(&food_id_raw)?,
                total: usize::try_from(total).context("negative requirement count")?,
                matched: usize::try_from(matched).context("negative match count")?,
            });
        }

        tracing::debug!(candidates = summaries.len(), "selected ranking candidates");
        Ok(summaries)
    }

    /// Load foods for `ids` with ingredient weights populated; unknown ids are skipped.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn load_recipes(&self, ids: &[RecipeId]) -> Result<Vec<Recipe>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let food_ids =
            json_array(ids.iter().map(ToString::to_string).collect::<BTreeSet<_>>())?;

        let mut requirements = self.load_requirements(&food_ids)?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT food_id, name, description, created_at, updated_at
                 FROM foods WHERE food_id IN (SELECT value FROM json_each(?1))",
            )
            .context("failed to prepare food fetch")?;
        let mut rows = stmt.query(params![food_ids])?;

        let mut by_id = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let id = parse_recipe_id(&row.get::<_, String>(0)?)?;
            by_id.insert(
                id,
                Recipe {
                    id,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    requirements: requirements.remove(&id).unwrap_or_default(),
                    created_at: parse_rfc3339(&row.get::<_, String>(3)?)?,
                    updated_at: parse_rfc3339(&row.get::<_, String>(4)?)?,
                },
            );
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    fn load_requirements(&self, food_ids: &str) -> Result<BTreeMap<RecipeId, Vec<Requirement>>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT iw.food_id, iw.weight,
                        i.ingredient_id, i.name, i.calories, i.created_at, i.updated_at
                 FROM ingredient_weights iw
                 JOIN ingredients i ON i.ingredient_id = iw.ingredient_id
                 WHERE iw.food_id IN (SELECT value FROM json_each(?1))
                 ORDER BY iw.id ASC",
            )
            .context("failed to prepare ingredient weight fetch")?;
        let mut rows = stmt.query(params![food_ids])?;

        let mut requirements: BTreeMap<RecipeId, Vec<Requirement>> = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let food_id = parse_recipe_id(&row.get::<_, String>(0)?)?;
            let ingredient = IngredientRow {
                ingredient_id: row.get(2)?,
                name: row.get(3)?,
                calories: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            }
            .into_ingredient()?;
            requirements
                .entry(food_id)
                .or_default()
                .push(Requirement { ingredient, weight: row.get(1)? });
        }

        Ok(requirements)
    }

    fn ingredient_exists(&self, id: IngredientId) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM ingredients WHERE ingredient_id = ?1)",
            params![id.to_string()],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(exists == 1)
    }

    fn ingredient_id_by_name(&self, name: &str) -> Result<Option<IngredientId>> {
        let raw = self
            .conn
            .query_row(
                "SELECT ingredient_id FROM ingredients WHERE name = ?1",
                params![name],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("failed to look up ingredient by name")?;
        raw.as_deref().map(parse_ingredient_id).transpose()
    }
}

impl CrudRepository<Ingredient> for SqliteStore {
    fn get(&self, id: IngredientId) -> Result<Ingredient, CatalogError> {
        self.get_ingredient(id).map_err(into_catalog_error)
    }

    fn save(&mut self, entity: &Ingredient) -> Result<(), CatalogError> {
        self.save_ingredient(entity).map_err(into_catalog_error)
    }

    fn update(&mut self, id: IngredientId, entity: &Ingredient) -> Result<(), CatalogError> {
        self.update_ingredient(id, entity).map_err(into_catalog_error)
    }

    fn delete(&mut self, id: IngredientId) -> Result<(), CatalogError> {
        self.delete_ingredient(id).map_err(into_catalog_error)
    }

    fn list(&self) -> Result<Vec<Ingredient>, CatalogError> {
        self.list_ingredients().map_err(into_catalog_error)
    }
}

impl CrudRepository<Recipe> for SqliteStore {
    fn get(&self, id: RecipeId) -> Result<Recipe, CatalogError> {
        self.get_recipe(id).map_err(into_catalog_error)
    }

    fn save(&mut self, entity: &Recipe) -> Result<(), CatalogError> {
        self.save_recipe(entity).map_err(into_catalog_error)
    }

    fn update(&mut self, id: RecipeId, entity: &Recipe) -> Result<(), CatalogError> {
        self.update_recipe(id, entity).map_err(into_catalog_error)
    }

    fn delete(&mut self, id: RecipeId) -> Result<(), CatalogError> {
        self.delete_recipe(id).map_err(into_catalog_error)
    }

    fn list(&self) -> Result<Vec<Recipe>, CatalogError> {
        self.list_recipes().map_err(into_catalog_error)
    }
}

impl IngredientLookup for SqliteStore {
    fn find_ingredients_by_name(
        &self,
        names: &BTreeSet<String>,
    ) -> Result<Vec<Ingredient>, CatalogError> {
        self.ingredients_by_name(names).map_err(into_catalog_error)
    }
}

impl RecipeSource for SqliteStore {
    fn find_recipes_with_any_ingredient(
        &self,
        ids: &BTreeSet<IngredientId>,
    ) -> Result<Vec<CandidateSummary>, CatalogError> {
        self.candidate_summaries(ids).map_err(into_catalog_error)
    }

    fn fetch_recipes_by_ids(&self, ids: &[RecipeId]) -> Result<Vec<Recipe>, CatalogError> {
        self.load_recipes(ids).map_err(into_catalog_error)
    }
}

/// Recover a typed [`CatalogError`] from `err`, or report it as a storage failure.
#[must_use]
pub fn into_catalog_error(err: anyhow::Error) -> CatalogError {
    match err.downcast::<CatalogError>() {
        Ok(catalog_error) => catalog_error,
        Err(other) => CatalogError::Storage(format!("{other:#}")),
    }
}

#[derive(Debug)]
struct IngredientRow {
    ingredient_id: String,
    name: String,
    calories: f64,
    created_at: String,
    updated_at: String,
}

impl IngredientRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            ingredient_id: row.get(0)?,
            name: row.get(1)?,
            calories: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_ingredient(self) -> Result<Ingredient> {
        Ok(Ingredient {
            id: parse_ingredient_id(&self.ingredient_id)?,
            name: self.name,
            calories: self.calories,
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

fn insert_requirements(
    tx: &rusqlite::Transaction<'_>,
    food_id: RecipeId,
    requirements: &[Requirement],
) -> Result<()> {
    for requirement in requirements {
        let ingredient_id = requirement.ingredient_id();
        let known = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM ingredients WHERE ingredient_id = ?1)",
            params![ingredient_id.to_string()],
            |row| row.get::<_, i64>(0),
        )?;
        if known != 1 {
            return Err(CatalogError::Validation(format!(
                "food references unknown ingredient {ingredient_id}"
            ))
            .into());
        }

        tx.execute(
            "INSERT INTO ingredient_weights(food_id, ingredient_id, weight) VALUES (?1, ?2, ?3)",
            params![food_id.to_string(), ingredient_id.to_string(), requirement.weight],
        )
        .context("failed to insert ingredient weight")?;
    }

    Ok(())
}

/// Encode a value set as one JSON array parameter, read back with `json_each(?N)`.
///
/// A single bound parameter keeps large sets clear of the `SQLite` variable limit.
fn json_array<I, T>(values: I) -> Result<String>
where
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    serde_json::to_string(&values.into_iter().collect::<Vec<_>>())
        .context("failed to encode query parameter set")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn parse_ingredient_id(raw: &str) -> Result<IngredientId> {
    let parsed = Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))?;
    Ok(IngredientId(parsed))
}

fn parse_recipe_id(raw: &str) -> Result<RecipeId> {
    let parsed = Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))?;
    Ok(RecipeId(parsed))
}
