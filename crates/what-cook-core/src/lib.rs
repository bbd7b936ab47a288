use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

pub const RANKING_RULESET_VERSION: &str = "ranking.v1";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CatalogError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct IngredientId(pub Ulid);

impl IngredientId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for IngredientId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for IngredientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IngredientId {
    type Err = CatalogError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|err| CatalogError::Validation(format!("invalid ingredient id {raw}: {err}")))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecipeId(pub Ulid);

impl RecipeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RecipeId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RecipeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecipeId {
    type Err = CatalogError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|err| CatalogError::Validation(format!("invalid food id {raw}: {err}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ingredient {
    pub id: IngredientId,
    pub name: String,
    pub calories: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One weighted ingredient line of a recipe. Weight is in kilograms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Requirement {
    pub ingredient: Ingredient,
    pub weight: f64,
}

impl Requirement {
    #[must_use]
    pub fn ingredient_id(&self) -> IngredientId {
        self.ingredient.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipe {
    pub id: RecipeId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A persisted catalog entity addressable through [`CrudRepository`].
pub trait Entity {
    type Id: Copy + Ord + Display;

    /// Human-readable entity kind used in error messages.
    const KIND: &'static str;

    fn id(&self) -> Self::Id;

    /// Check the entity against catalog write invariants.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] describing the first violated invariant.
    fn validate(&self) -> Result<(), CatalogError>;
}

impl Entity for Ingredient {
    type Id = IngredientId;
    const KIND: &'static str = "ingredient";

    fn id(&self) -> IngredientId {
        self.id
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::Validation(
                "ingredient name MUST be non-empty".to_string(),
            ));
        }

        if !self.calories.is_finite() || self.calories < 0.0 {
            return Err(CatalogError::Validation(
                "ingredient calories MUST be a finite value >= 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Entity for Recipe {
    type Id = RecipeId;
    const KIND: &'static str = "food";

    fn id(&self) -> RecipeId {
        self.id
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::Validation("food name MUST be non-empty".to_string()));
        }

        for requirement in &self.requirements {
            if !requirement.weight.is_finite() || requirement.weight <= 0.0 {
                return Err(CatalogError::Validation(format!(
                    "weight for ingredient {} MUST be a finite value > 0",
                    requirement.ingredient_id()
                )));
            }
        }

        Ok(())
    }
}

/// Uniform CRUD contract, implemented once per entity type by a storage backend.
pub trait CrudRepository<E: Entity> {
    /// # Errors
    /// Returns [`CatalogError::NotFound`] when no entity has `id`, or
    /// [`CatalogError::Storage`] when the backend fails.
    fn get(&self, id: E::Id) -> Result<E, CatalogError>;

    /// # Errors
    /// Returns [`CatalogError::Validation`] or [`CatalogError::Conflict`] when the entity
    /// cannot be written, or [`CatalogError::Storage`] when the backend fails.
    fn save(&mut self, entity: &E) -> Result<(), CatalogError>;

    /// Replace the mutable fields of the entity stored under `id`.
    ///
    /// # Errors
    /// Returns [`CatalogError::NotFound`] when no entity has `id`, plus the errors of
    /// [`CrudRepository::save`].
    fn update(&mut self, id: E::Id, entity: &E) -> Result<(), CatalogError>;

    /// # Errors
    /// Returns [`CatalogError::NotFound`] when no entity has `id`, or
    /// [`CatalogError::Conflict`] when other records still depend on it.
    fn delete(&mut self, id: E::Id) -> Result<(), CatalogError>;

    /// # Errors
    /// Returns [`CatalogError::Storage`] when the backend fails.
    fn list(&self) -> Result<Vec<E>, CatalogError>;
}

/// Name lookup consumed by [`IngredientResolver`].
pub trait IngredientLookup {
    /// Return every ingredient whose name equals one of `names` exactly.
    ///
    /// # Errors
    /// Returns [`CatalogError::Storage`] when the backend fails.
    fn find_ingredients_by_name(
        &self,
        names: &BTreeSet<String>,
    ) -> Result<Vec<Ingredient>, CatalogError>;
}

/// Recipe queries consumed by [`RankingEngine`].
pub trait RecipeSource {
    /// Score every recipe with at least one requirement row in `ids`.
    ///
    /// # Errors
    /// Returns [`CatalogError::Storage`] when the backend fails.
    fn find_recipes_with_any_ingredient(
        &self,
        ids: &BTreeSet<IngredientId>,
    ) -> Result<Vec<CandidateSummary>, CatalogError>;

    /// Load recipes with requirements and their ingredients populated.
    ///
    /// # Errors
    /// Returns [`CatalogError::Storage`] when the backend fails.
    fn fetch_recipes_by_ids(&self, ids: &[RecipeId]) -> Result<Vec<Recipe>, CatalogError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct CandidateSummary {
    pub recipe_id: RecipeId,
    /// Requirement rows of the recipe.
    pub total: usize,
    /// Requirement rows whose ingredient is available.
    pub matched: usize,
}

impl CandidateSummary {
    fn cmp(lhs: &Self, rhs: &Self) -> Ordering {
        rhs.matched
            .cmp(&lhs.matched)
            .then_with(|| lhs.total.cmp(&rhs.total))
            .then_with(|| lhs.recipe_id.cmp(&rhs.recipe_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeRecommendation {
    pub rank: usize,
    pub recipe: Recipe,
    pub has: Vec<Ingredient>,
    pub absent: Vec<Ingredient>,
    pub matched: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DeterminismMetadata {
    pub ruleset_version: String,
    pub tie_breakers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationPackage {
    pub requested_ingredients: Vec<String>,
    pub resolved_ingredients: Vec<IngredientId>,
    pub unresolved_ingredients: Vec<String>,
    pub determinism: DeterminismMetadata,
    pub recommendations: Vec<RecipeRecommendation>,
}

#[must_use]
pub fn default_ranking_tie_breakers() -> Vec<String> {
    vec![
        "matched_requirements desc".to_string(),
        "total_requirements asc".to_string(),
        "recipe_id asc".to_string(),
    ]
}

/// Outcome of resolving ingredient names; `unresolved` keeps names with no catalog match.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Resolution {
    pub ids: BTreeSet<IngredientId>,
    pub unresolved: Vec<String>,
}

pub struct IngredientResolver<'a, L: IngredientLookup + ?Sized> {
    lookup: &'a L,
}

impl<'a, L: IngredientLookup + ?Sized> IngredientResolver<'a, L> {
    #[must_use]
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    /// Map ingredient names to catalog identifiers, dropping names with no exact match.
    ///
    /// # Errors
    /// Returns [`CatalogError::Storage`] when the lookup backend fails.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<BTreeSet<IngredientId>, CatalogError> {
        Ok(self.resolve_detailed(names)?.ids)
    }

    /// Like [`IngredientResolver::resolve`], also reporting which names were dropped.
    ///
    /// # Errors
    /// Returns [`CatalogError::Storage`] when the lookup backend fails.
    pub fn resolve_detailed<S: AsRef<str>>(&self, names: &[S]) -> Result<Resolution, CatalogError> {
        let distinct =
            names.iter().map(|name| name.as_ref().to_string()).collect::<BTreeSet<_>>();
        if distinct.is_empty() {
            return Ok(Resolution::default());
        }

        let found = self.lookup.find_ingredients_by_name(&distinct)?;
        let mut ids = BTreeSet::new();
        let mut matched_names = BTreeSet::new();
        for ingredient in found {
            // Backends may match case-insensitively; identity is exact.
            if distinct.contains(&ingredient.name) {
                matched_names.insert(ingredient.name);
                ids.insert(ingredient.id);
            }
        }

        let unresolved =
            distinct.into_iter().filter(|name| !matched_names.contains(name)).collect();
        Ok(Resolution { ids, unresolved })
    }
}

pub struct RankingEngine<'a, S: RecipeSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: RecipeSource + ?Sized> RankingEngine<'a, S> {
    #[must_use]
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Rank recipes sharing at least one requirement with `available`.
    ///
    /// # Errors
    /// Returns [`CatalogError::Storage`] when candidate selection or the recipe fetch
    /// fails. No partial result is produced.
    pub fn rank(
        &self,
        available: &BTreeSet<IngredientId>,
    ) -> Result<Vec<RecipeRecommendation>, CatalogError> {
        if available.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = order_candidates(self.source.find_recipes_with_any_ingredient(available)?);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids = candidates.iter().map(|candidate| candidate.recipe_id).collect::<Vec<_>>();
        let mut recipes = self
            .source
            .fetch_recipes_by_ids(&ids)?
            .into_iter()
            .map(|recipe| (recipe.id, recipe))
            .collect::<BTreeMap<_, _>>();

        let mut recommendations = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            // A recipe deleted between the two queries has nothing left to recommend.
            let Some(recipe) = recipes.remove(&candidate.recipe_id) else {
                continue;
            };
            let (has, absent) = partition_requirements(&recipe, available);
            recommendations.push(RecipeRecommendation {
                rank: recommendations.len() + 1,
                recipe,
                has,
                absent,
                matched: candidate.matched,
                total: candidate.total,
            });
        }

        Ok(recommendations)
    }
}

/// Drop zero-match candidates and sort the rest by ranking precedence.
#[must_use]
pub fn order_candidates(candidates: Vec<CandidateSummary>) -> Vec<CandidateSummary> {
    let mut ordered =
        candidates.into_iter().filter(|candidate| candidate.matched > 0).collect::<Vec<_>>();
    ordered.sort_by(CandidateSummary::cmp);
    ordered
}

/// In-process candidate scoring over requirement rows.
///
/// Every requirement row counts, so an ingredient listed twice in one recipe adds two
/// to `total` and, when available, two to `matched`.
pub fn score_requirement_rows<'r, I>(
    recipes: I,
    available: &BTreeSet<IngredientId>,
) -> Vec<CandidateSummary>
where
    I: IntoIterator<Item = &'r Recipe>,
{
    recipes
        .into_iter()
        .filter_map(|recipe| {
            let matched = recipe
                .requirements
                .iter()
                .filter(|requirement| available.contains(&requirement.ingredient_id()))
                .count();
            (matched > 0).then_some(CandidateSummary {
                recipe_id: recipe.id,
                total: recipe.requirements.len(),
                matched,
            })
        })
        .collect()
}

/// Split the distinct ingredients of `recipe` into available and missing, in
/// first-appearance order.
#[must_use]
pub fn partition_requirements(
    recipe: &Recipe,
    available: &BTreeSet<IngredientId>,
) -> (Vec<Ingredient>, Vec<Ingredient>) {
    let mut seen = BTreeSet::new();
    let mut has = Vec::new();
    let mut absent = Vec::new();

    for requirement in &recipe.requirements {
        let id = requirement.ingredient_id();
        if !seen.insert(id) {
            continue;
        }

        if available.contains(&id) {
            has.push(requirement.ingredient.clone());
        } else {
            absent.push(requirement.ingredient.clone());
        }
    }

    (has, absent)
}

/// Resolve `names` and rank the catalog against them, keeping resolution details.
///
/// # Errors
/// Returns [`CatalogError::Storage`] when any catalog query fails.
pub fn build_recommendation_package<C, S>(
    catalog: &C,
    names: &[S],
) -> Result<RecommendationPackage, CatalogError>
where
    C: IngredientLookup + RecipeSource + ?Sized,
    S: AsRef<str>,
{
    let resolution = IngredientResolver::new(catalog).resolve_detailed(names)?;
    let recommendations = RankingEngine::new(catalog).rank(&resolution.ids)?;

    Ok(RecommendationPackage {
        requested_ingredients: names.iter().map(|name| name.as_ref().to_string()).collect(),
        resolved_ingredients: resolution.ids.into_iter().collect(),
        unresolved_ingredients: resolution.unresolved,
        determinism: DeterminismMetadata {
            ruleset_version: RANKING_RULESET_VERSION.to_string(),
            tie_breakers: default_ranking_tie_breakers(),
        },
        recommendations,
    })
}

/// Recommend recipes that can be fully or partially made from `names`.
///
/// # Errors
/// Returns [`CatalogError::Storage`] when any catalog query fails.
pub fn recommend<C, S>(catalog: &C, names: &[S]) -> Result<Vec<RecipeRecommendation>, CatalogError>
where
    C: IngredientLookup + RecipeSource + ?Sized,
    S: AsRef<str>,
{
    Ok(build_recommendation_package(catalog, names)?.recommendations)
}

/// Catalog held entirely in memory; candidate scoring is done in-process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    ingredients: BTreeMap<IngredientId, Ingredient>,
    recipes: BTreeMap<RecipeId, Recipe>,
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_ingredient(&mut self, ingredient: Ingredient) {
        self.ingredients.insert(ingredient.id, ingredient);
    }

    pub fn insert_recipe(&mut self, recipe: Recipe) {
        self.recipes.insert(recipe.id, recipe);
    }

    #[must_use]
    pub fn ingredient_count(&self) -> usize {
        self.ingredients.len()
    }

    #[must_use]
    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }
}

impl IngredientLookup for InMemoryCatalog {
    fn find_ingredients_by_name(
        &self,
        names: &BTreeSet<String>,
    ) -> Result<Vec<Ingredient>, CatalogError> {
        Ok(self
            .ingredients
            .values()
            .filter(|ingredient| names.contains(&ingredient.name))
            .cloned()
            .collect())
    }
}

impl RecipeSource for InMemoryCatalog {
    fn find_recipes_with_any_ingredient(
        &self,
        ids: &BTreeSet<IngredientId>,
    ) -> Result<Vec<CandidateSummary>, CatalogError> {
        Ok(score_requirement_rows(self.recipes.values(), ids))
    }

    fn fetch_recipes_by_ids(&self, ids: &[RecipeId]) -> Result<Vec<Recipe>, CatalogError> {
        Ok(ids.iter().filter_map(|id| self.recipes.get(id)).cloned().collect())
    }
}
