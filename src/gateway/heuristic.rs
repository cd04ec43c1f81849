//! Offline rule-based provider.
//!
//! Works from the structured payload instead of the prompt, so it always
//! produces well-formed output. Used as the last fallback and for running
//! without a model.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{GenerationRequest, GenerationTask, ProviderError, TextProvider};
use crate::models::RecipeContent;
use crate::pipeline::generator::apply_plan;
use crate::pipeline::{
    axes, ChangeAction, ChangePlan, ChangeTarget, Direction, PlanPayload, PlannedChange,
    VariantPayload,
};

pub struct HeuristicProvider {
    name: String,
}

impl Default for HeuristicProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicProvider {
    pub fn new() -> Self {
        Self {
            name: "heuristic".to_string(),
        }
    }

    fn plan(&self, payload: PlanPayload) -> Result<ChangePlan, ProviderError> {
        let base = &payload.base;
        let mut changes = Vec::new();
        let mut summary = Vec::new();
        let mut touched = HashSet::new();

        for sub in &payload.adjustment.substitutions {
            let needle = sub.ingredient.to_lowercase();
            let matches: Vec<usize> = base
                .ingredients
                .iter()
                .enumerate()
                .filter(|(i, ing)| !touched.contains(i) && ing.name.to_lowercase().contains(&needle))
                .map(|(i, _)| i)
                .collect();
            if matches.is_empty() {
                continue;
            }
            for index in matches {
                touched.insert(index);
                changes.push(PlannedChange {
                    target: ChangeTarget::Ingredient,
                    action: if sub.replacement.is_some() {
                        ChangeAction::Modify
                    } else {
                        ChangeAction::Remove
                    },
                    index: Some(index),
                    name: None,
                    scale: None,
                    replacement: sub.replacement.clone(),
                    amount: None,
                    unit: None,
                    detail: None,
                    reason: sub.reason.clone(),
                });
            }
            if let Some(ref replacement) = sub.replacement {
                changes.extend(step_mentions(base, &sub.ingredient).map(|index| PlannedChange {
                    target: ChangeTarget::Step,
                    action: ChangeAction::Modify,
                    index: Some(index),
                    name: Some(sub.ingredient.clone()),
                    scale: None,
                    replacement: Some(replacement.clone()),
                    amount: None,
                    unit: None,
                    detail: None,
                    reason: sub.reason.clone(),
                }));
            }
            summary.push(sub.reason.clone());
        }

        for adjustment in &payload.adjustment.adjustments {
            let factor = adjustment.magnitude.factor(adjustment.direction);
            let direction = match adjustment.direction {
                Direction::Increase => "more",
                Direction::Decrease => "less",
            };
            let reason = format!(
                "{} {} ({})",
                direction,
                adjustment.axis,
                adjustment.magnitude.as_str()
            );

            let matching: Vec<usize> = base
                .ingredients
                .iter()
                .enumerate()
                .filter(|(i, ing)| !touched.contains(i) && axes::ingredient_matches(ing, adjustment.axis))
                .map(|(i, _)| i)
                .collect();

            if matching.is_empty() {
                if adjustment.direction == Direction::Increase {
                    let (name, amount, unit) = axes::default_addition(adjustment.axis);
                    changes.push(PlannedChange {
                        target: ChangeTarget::Ingredient,
                        action: ChangeAction::Add,
                        index: None,
                        name: Some(name.to_string()),
                        scale: None,
                        replacement: None,
                        amount: Some(amount.to_string()),
                        unit: Some(unit.to_string()),
                        detail: None,
                        reason: reason.clone(),
                    });
                    summary.push(reason);
                }
                continue;
            }

            for index in matching {
                touched.insert(index);
                changes.push(PlannedChange {
                    target: ChangeTarget::Ingredient,
                    action: ChangeAction::Modify,
                    index: Some(index),
                    name: Some(base.ingredients[index].name.clone()),
                    scale: Some(factor),
                    replacement: None,
                    amount: None,
                    unit: None,
                    detail: None,
                    reason: reason.clone(),
                });
            }
            summary.push(reason);
        }

        if changes.is_empty() {
            return Err(ProviderError::MalformedOutput(
                "no rule applies to this recipe".to_string(),
            ));
        }

        let mut summary = summary.join("; ");
        if let Some(first) = summary.get(..1) {
            summary = first.to_uppercase() + &summary[1..];
        }
        Ok(ChangePlan { summary, changes })
    }
}

fn step_mentions<'a>(base: &'a RecipeContent, ingredient: &'a str) -> impl Iterator<Item = usize> + 'a {
    let needle = ingredient.to_lowercase();
    base.steps
        .iter()
        .enumerate()
        .filter(move |(_, s)| s.description.to_lowercase().contains(&needle))
        .map(|(i, _)| i)
}

fn payload<T: serde::de::DeserializeOwned>(request: &GenerationRequest) -> Result<T, ProviderError> {
    serde_json::from_value(request.constraints.payload.clone()).map_err(|e| {
        ProviderError::MalformedOutput(format!(
            "{} payload missing or invalid: {}",
            request.constraints.task.as_str(),
            e
        ))
    })
}

#[async_trait]
impl TextProvider for HeuristicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "rules-v1"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        debug!(task = request.constraints.task.as_str(), "Heuristic generation");
        let value = match request.constraints.task {
            GenerationTask::ChangePlan => {
                let plan = self.plan(payload(request)?)?;
                serde_json::to_value(plan)
            }
            GenerationTask::Variant => {
                let VariantPayload { base, plan } = payload(request)?;
                let content = apply_plan(&base, &plan);
                Ok(json!({
                    "summary": plan.summary,
                    "ingredients": content.ingredients,
                    "steps": content.steps,
                }))
            }
        }
        .map_err(|e| ProviderError::MalformedOutput(e.to_string()))?;
        Ok(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gateway::GenerationConstraints;
    use crate::models::{Ingredient, Step, TasteAxis};
    use crate::pipeline::{AxisAdjustment, Magnitude, StructuredAdjustment, Substitution};

    fn base() -> RecipeContent {
        RecipeContent::new(
            vec![
                Ingredient::new("kimchi", Some("300"), Some("g")),
                Ingredient::new("soy sauce", Some("2"), Some("tbsp")),
                Ingredient::new("butter", Some("1"), Some("tbsp")),
            ],
            vec![Step::new("Melt butter."), Step::new("Add kimchi and soy sauce.")],
        )
    }

    fn request(task: GenerationTask, payload: serde_json::Value) -> GenerationRequest {
        GenerationRequest {
            prompt: String::new(),
            constraints: GenerationConstraints {
                task,
                max_tokens: 512,
                temperature: 0.0,
                payload,
            },
            timeout: Duration::from_secs(1),
        }
    }

    fn adjustment(axis: TasteAxis, direction: Direction) -> StructuredAdjustment {
        StructuredAdjustment {
            adjustments: vec![AxisAdjustment {
                axis,
                direction,
                magnitude: Magnitude::Strong,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_plan_then_variant_halves_salt() {
        let provider = HeuristicProvider::new();
        let payload = PlanPayload {
            base: base(),
            adjustment: adjustment(TasteAxis::Saltiness, Direction::Decrease),
            profile: None,
        };
        let text = provider
            .generate(&request(GenerationTask::ChangePlan, serde_json::to_value(&payload).unwrap()))
            .await
            .unwrap();
        let plan: ChangePlan = serde_json::from_str(&text).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].index, Some(1));
        assert_eq!(plan.changes[0].scale, Some(0.5));
        assert!(plan.summary.starts_with("Less saltiness"));

        let variant = VariantPayload { base: base(), plan };
        let text = provider
            .generate(&request(GenerationTask::Variant, serde_json::to_value(&variant).unwrap()))
            .await
            .unwrap();
        let draft: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(draft["ingredients"][1]["amount"], "1");
    }

    #[tokio::test]
    async fn test_increase_without_carrier_adds_ingredient() {
        let provider = HeuristicProvider::new();
        let payload = PlanPayload {
            base: base(),
            adjustment: adjustment(TasteAxis::Sourness, Direction::Increase),
            profile: None,
        };
        let plan = provider.plan(payload).unwrap();
        assert_eq!(plan.changes[0].action, ChangeAction::Add);
        assert_eq!(plan.changes[0].name.as_deref(), Some("lemon juice"));
    }

    #[tokio::test]
    async fn test_substitution_rewrites_ingredient_and_steps() {
        let provider = HeuristicProvider::new();
        let payload = PlanPayload {
            base: base(),
            adjustment: StructuredAdjustment {
                substitutions: vec![Substitution {
                    ingredient: "butter".to_string(),
                    replacement: Some("olive oil".to_string()),
                    reason: "dairy-free".to_string(),
                }],
                ..Default::default()
            },
            profile: None,
        };
        let plan = provider.plan(payload).unwrap();
        let content = apply_plan(&base(), &plan);
        assert_eq!(content.ingredients[2].name, "olive oil");
        assert_eq!(content.steps[0].description, "Melt olive oil.");
    }

    #[tokio::test]
    async fn test_nothing_applicable_is_malformed() {
        let provider = HeuristicProvider::new();
        let payload = PlanPayload {
            base: base(),
            adjustment: adjustment(TasteAxis::Sweetness, Direction::Decrease),
            profile: None,
        };
        let err = provider
            .generate(&request(GenerationTask::ChangePlan, serde_json::to_value(&payload).unwrap()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "malformed_output");

        let err = provider
            .generate(&request(GenerationTask::Variant, serde_json::Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "malformed_output");
    }
}
