use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use what_cook_api::{CatalogApi, FoodRequest, IngredientRequest, RecommendRequest, RequirementInput};
use what_cook_core::{IngredientId, RecipeId};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "wcook")]
#[command(about = "What Cook recipe catalog CLI")]
struct Cli {
    #[arg(long, default_value = "./what_cook.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Ingredient {
        #[command(subcommand)]
        command: IngredientCommand,
    },
    Food {
        #[command(subcommand)]
        command: FoodCommand,
    },
    /// Rank foods that can be cooked from the given ingredient names.
    Recommend(RecommendArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate,
    IntegrityCheck,
    Backup(DbBackupArgs),
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum IngredientCommand {
    Add(IngredientArgs),
    Get(IdArgs),
    Update {
        #[arg(long)]
        id: String,
        #[command(flatten)]
        fields: IngredientArgs,
    },
    Delete(IdArgs),
    List,
}

#[derive(Debug, Args)]
struct IngredientArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value_t = 0.0)]
    calories: f64,
}

#[derive(Debug, Subcommand)]
enum FoodCommand {
    Add(FoodArgs),
    Get(IdArgs),
    Update {
        #[arg(long)]
        id: String,
        #[command(flatten)]
        fields: FoodArgs,
    },
    Delete(IdArgs),
    List,
}

#[derive(Debug, Args)]
struct FoodArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    description: String,
    /// Ingredient weight as `<ingredient_id>=<kg>`; repeat per ingredient.
    #[arg(long = "ingredient", value_parser = parse_requirement)]
    ingredients: Vec<RequirementInput>,
}

#[derive(Debug, Args)]
struct IdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct RecommendArgs {
    #[arg(long = "ingredient")]
    ingredients: Vec<String>,
}

fn parse_requirement(raw: &str) -> Result<RequirementInput> {
    let (id, weight) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected <ingredient_id>=<weight>, got `{raw}`"))?;
    Ok(RequirementInput {
        ingredient_id: id.trim().parse::<IngredientId>()?,
        weight: weight
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid weight `{weight}` for ingredient {id}"))?,
    })
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let value = serde_json::to_value(value).context("failed to encode CLI output")?;
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = CatalogApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Ingredient { command } => run_ingredient(command, &api),
        Command::Food { command } => run_food(command, &api),
        Command::Recommend(args) => {
            emit_json(&api.recommend(RecommendRequest { ingredients: args.ingredients })?)
        }
    }
}

fn run_db(command: DbCommand, api: &CatalogApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(&serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate => emit_json(&api.migrate()?),
        DbCommand::IntegrityCheck => emit_json(&api.integrity_check()?),
        DbCommand::Backup(args) => {
            api.backup(&args.out)?;
            emit_json(&serde_json::json!({
                "status": "ok",
                "db": api.db_path().display().to_string(),
                "out": args.out.display().to_string()
            }))
        }
    }
}

fn run_ingredient(command: IngredientCommand, api: &CatalogApi) -> Result<()> {
    match command {
        IngredientCommand::Add(fields) => emit_json(&api.create_ingredient(IngredientRequest {
            name: fields.name,
            calories: fields.calories,
        })?),
        IngredientCommand::Get(args) => {
            emit_json(&api.get_ingredient(args.id.parse::<IngredientId>()?)?)
        }
        IngredientCommand::Update { id, fields } => emit_json(&api.update_ingredient(
            id.parse::<IngredientId>()?,
            IngredientRequest { name: fields.name, calories: fields.calories },
        )?),
        IngredientCommand::Delete(args) => {
            emit_json(&api.delete_ingredient(args.id.parse::<IngredientId>()?)?)
        }
        IngredientCommand::List => {
            emit_json(&serde_json::json!({ "ingredients": api.list_ingredients()? }))
        }
    }
}

fn run_food(command: FoodCommand, api: &CatalogApi) -> Result<()> {
    match command {
        FoodCommand::Add(fields) => emit_json(&api.create_food(food_request(fields))?),
        FoodCommand::Get(args) => emit_json(&api.get_food(args.id.parse::<RecipeId>()?)?),
        FoodCommand::Update { id, fields } => {
            emit_json(&api.update_food(id.parse::<RecipeId>()?, food_request(fields))?)
        }
        FoodCommand::Delete(args) => emit_json(&api.delete_food(args.id.parse::<RecipeId>()?)?),
        FoodCommand::List => emit_json(&serde_json::json!({ "foods": api.list_foods()? })),
    }
}

fn food_request(fields: FoodArgs) -> FoodRequest {
    FoodRequest {
        name: fields.name,
        description: fields.description,
        ingredients: fields.ingredients,
    }
}
