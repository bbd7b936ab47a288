use criterion::{criterion_group, criterion_main, Criterion};
use time::OffsetDateTime;
use what_cook_core::{
    recommend, InMemoryCatalog, Ingredient, IngredientId, Recipe, RecipeId, Requirement,
};

const INGREDIENTS: usize = 200;
const RECIPES: usize = 1_000;

fn mk_ingredient(index: usize) -> Ingredient {
    Ingredient {
        id: IngredientId::new(),
        name: format!("ingredient-{index}"),
        calories: 50.0,
        created_at: OffsetDateTime::UNIX_EPOCH,
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

fn mk_recipe(index: usize, ingredients: &[Ingredient]) -> Recipe {
    let requirements = (0..(index % 7) + 1)
        .map(|offset| Requirement {
            ingredient: ingredients[(index * 13 + offset * 31) % ingredients.len()].clone(),
            weight: 0.25,
        })
        .collect();

    Recipe {
        id: RecipeId::new(),
        name: format!("recipe-{index}"),
        description: "benchmark fixture".to_string(),
        requirements,
        created_at: OffsetDateTime::UNIX_EPOCH,
        updated_at: OffsetDateTime::UNIX_EPOCH,
    }
}

fn bench_recommend(c: &mut Criterion) {
    let ingredients = (0..INGREDIENTS).map(mk_ingredient).collect::<Vec<_>>();
    let mut catalog = InMemoryCatalog::new();
    for index in 0..RECIPES {
        catalog.insert_recipe(mk_recipe(index, &ingredients));
    }
    for ingredient in ingredients {
        catalog.insert_ingredient(ingredient);
    }

    let query = (0..12).map(|index| format!("ingredient-{}", index * 7)).collect::<Vec<_>>();

    c.bench_function("recommend_1000_recipes_in_memory", |b| {
        b.iter(|| {
            if let Err(err) = recommend(&catalog, &query) {
                panic!("ranking benchmark failed: {err}");
            }
        });
    });
}

criterion_group!(ranking_benches, bench_recommend);
criterion_main!(ranking_benches);
