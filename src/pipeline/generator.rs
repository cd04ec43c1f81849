//! Render a change plan into a full ingredient list and step text.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::{
    extract_json, quantity, AdjustmentContext, ChangeAction, ChangePlan, ChangeTarget, DraftVariant,
    GenerationSettings, PlannedChange, StageError, VariantPayload,
};
use crate::gateway::{Generated, GenerationTask, ProviderError, ProviderGateway};
use crate::models::{Ingredient, RecipeContent, Step};

pub struct VariantGenerator {
    gateway: Arc<ProviderGateway>,
    settings: GenerationSettings,
}

impl VariantGenerator {
    pub fn new(gateway: Arc<ProviderGateway>, settings: GenerationSettings) -> Self {
        Self { gateway, settings }
    }

    pub async fn generate(
        &self,
        context: &AdjustmentContext,
        plan: &ChangePlan,
    ) -> Result<Generated<DraftVariant>, StageError> {
        let prompt = build_prompt(context, plan);
        debug!("Variant prompt:\n{}", prompt);

        let payload = serde_json::to_value(VariantPayload {
            base: context.base.clone(),
            plan: plan.clone(),
        })
        .unwrap_or_default();
        let request = self
            .settings
            .request(GenerationTask::Variant, prompt, payload);

        let fallback_summary = plan.summary.clone();
        let generated = self
            .gateway
            .generate_with(&request, move |text| parse_draft(text, &fallback_summary))
            .await?;
        Ok(generated)
    }
}

fn build_prompt(context: &AdjustmentContext, plan: &ChangePlan) -> String {
    let base = serde_json::to_string_pretty(&context.base).unwrap_or_default();
    let plan = serde_json::to_string_pretty(plan).unwrap_or_default();
    format!(
        r#"You are rewriting a home recipe according to an agreed change plan.

Recipe: {title}

Current ingredients and steps (JSON):
{base}

Change plan (JSON; indices refer to the lists above):
{plan}

Apply every change in the plan and nothing else. Keep unchanged ingredients and steps exactly as they are, in the same order. Write amounts as text ("1/2", "300", "to taste").

Respond with ONLY a JSON object of this shape:
{{"summary": "one sentence describing the adjustment", "ingredients": [{{"name": "...", "amount": "...", "unit": "..."}}], "steps": [{{"description": "..."}}]}}"#,
        title = context.original.title,
        base = base,
        plan = plan,
    )
}

#[derive(Debug, Deserialize)]
struct RawDraft {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    ingredients: Vec<RawIngredient>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawIngredient {
    name: String,
    #[serde(default)]
    amount: Option<serde_json::Value>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

/// Models return steps either as plain strings or as objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawStep {
    Text(String),
    Full {
        description: String,
        #[serde(default)]
        duration_seconds: Option<u32>,
        #[serde(default)]
        tip: Option<String>,
    },
}

fn amount_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => n.as_f64().map(quantity::format_number),
        other => Some(other.to_string()),
    }
}

/// Parse a generator reply. Numeric amounts are normalised to text; an
/// empty step list is left for the validator to reject.
pub(crate) fn parse_draft(text: &str, fallback_summary: &str) -> Result<DraftVariant, ProviderError> {
    let json = extract_json(text)?;
    let raw: RawDraft = serde_json::from_str(json)
        .map_err(|e| ProviderError::MalformedOutput(format!("variant JSON: {}", e)))?;

    let ingredients = raw
        .ingredients
        .into_iter()
        .filter(|i| !i.name.trim().is_empty())
        .map(|i| Ingredient {
            name: i.name.trim().to_string(),
            amount: i.amount.and_then(amount_text),
            unit: i.unit.filter(|u| !u.trim().is_empty()),
            note: i.note,
        })
        .collect();
    let steps = raw
        .steps
        .into_iter()
        .map(|s| match s {
            RawStep::Text(description) => Step::new(description.trim()),
            RawStep::Full {
                description,
                duration_seconds,
                tip,
            } => Step {
                description: description.trim().to_string(),
                duration_seconds,
                tip,
            },
        })
        .filter(|s| !s.description.is_empty())
        .collect();

    let summary = raw
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_summary.to_string());

    Ok(DraftVariant {
        summary,
        ingredients,
        steps,
    })
}

fn find_ingredient(content: &RecipeContent, change: &PlannedChange) -> Option<usize> {
    if let Some(index) = change.index {
        return (index < content.ingredients.len()).then_some(index);
    }
    let name = change.name.as_deref()?.to_lowercase();
    content
        .ingredients
        .iter()
        .position(|i| i.name.to_lowercase() == name)
        .or_else(|| {
            content
                .ingredients
                .iter()
                .position(|i| i.name.to_lowercase().contains(&name))
        })
}

fn replace_ignoring_case(text: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return text.to_string();
    }
    let lower = text.to_lowercase();
    let needle = from.to_lowercase();
    // Lowercasing can shift byte offsets outside ASCII; fall back to an exact replace.
    if lower.len() != text.len() {
        return text.replace(from, to);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = 0;
    for (start, _) in lower.match_indices(&needle) {
        out.push_str(&text[rest..start]);
        out.push_str(to);
        rest = start + needle.len();
    }
    out.push_str(&text[rest..]);
    out
}

/// Apply a plan to the base content without a model.
///
/// Indices refer to the base lists. Modifications apply first, then
/// removals, then additions (steps with an index are inserted there).
pub fn apply_plan(base: &RecipeContent, plan: &ChangePlan) -> RecipeContent {
    let mut content = base.clone();
    let mut drop_ingredients = vec![false; content.ingredients.len()];
    let mut drop_steps = vec![false; content.steps.len()];
    let mut new_ingredients = Vec::new();
    let mut new_steps: Vec<(Option<usize>, Step)> = Vec::new();

    for change in &plan.changes {
        match (change.target, change.action) {
            (ChangeTarget::Ingredient, ChangeAction::Modify) => {
                let Some(i) = find_ingredient(base, change) else {
                    continue;
                };
                let ingredient = &mut content.ingredients[i];
                if let Some(factor) = change.scale {
                    if let Some(ref amount) = ingredient.amount {
                        ingredient.amount = Some(quantity::scale(amount, factor));
                    }
                }
                if let Some(ref amount) = change.amount {
                    ingredient.amount = Some(amount.clone());
                }
                if let Some(ref unit) = change.unit {
                    ingredient.unit = Some(unit.clone());
                }
                if let Some(ref replacement) = change.replacement {
                    ingredient.name = replacement.clone();
                }
                if let Some(ref detail) = change.detail {
                    ingredient.note = Some(detail.clone());
                }
            }
            (ChangeTarget::Ingredient, ChangeAction::Remove) => {
                if let Some(i) = find_ingredient(base, change) {
                    drop_ingredients[i] = true;
                }
            }
            (ChangeTarget::Ingredient, ChangeAction::Add) => {
                if let Some(ref name) = change.name {
                    new_ingredients.push(Ingredient {
                        name: name.clone(),
                        amount: change.amount.clone(),
                        unit: change.unit.clone(),
                        note: change.detail.clone(),
                    });
                }
            }
            (ChangeTarget::Step, ChangeAction::Modify) => {
                let Some(step) = change.index.and_then(|i| content.steps.get_mut(i)) else {
                    continue;
                };
                if let Some(ref detail) = change.detail {
                    step.description = detail.clone();
                } else if let (Some(name), Some(replacement)) = (&change.name, &change.replacement)
                {
                    step.description = replace_ignoring_case(&step.description, name, replacement);
                }
            }
            (ChangeTarget::Step, ChangeAction::Remove) => {
                if let Some(i) = change.index.filter(|i| *i < drop_steps.len()) {
                    drop_steps[i] = true;
                }
            }
            (ChangeTarget::Step, ChangeAction::Add) => {
                if let Some(ref detail) = change.detail {
                    new_steps.push((change.index, Step::new(detail)));
                }
            }
        }
    }

    let mut dropped = drop_ingredients.iter();
    content
        .ingredients
        .retain(|_| !dropped.next().copied().unwrap_or(false));
    content.ingredients.extend(new_ingredients);

    let mut dropped = drop_steps.iter();
    content.steps.retain(|_| !dropped.next().copied().unwrap_or(false));
    for (index, step) in new_steps {
        match index {
            Some(i) if i <= content.steps.len() => content.steps.insert(i, step),
            _ => content.steps.push(step),
        }
    }

    content
}
