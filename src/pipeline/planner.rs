//! Ask a provider which ingredients and steps should change, and why.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::{
    extract_json, AdjustmentContext, ChangeAction, ChangePlan, ChangeTarget, GenerationSettings,
    PlanPayload, PlannedChange, StageError, StructuredAdjustment,
};
use crate::gateway::{Generated, GenerationTask, ProviderError, ProviderGateway};
use crate::models::{RecipeContent, TasteAxis, TasteProfile};

pub struct PlanGenerator {
    gateway: Arc<ProviderGateway>,
    settings: GenerationSettings,
}

impl PlanGenerator {
    pub fn new(gateway: Arc<ProviderGateway>, settings: GenerationSettings) -> Self {
        Self { gateway, settings }
    }

    pub async fn plan(&self, context: &AdjustmentContext) -> Result<Generated<ChangePlan>, StageError> {
        let prompt = build_prompt(context);
        debug!("Plan prompt:\n{}", prompt);

        let payload = serde_json::to_value(PlanPayload {
            base: context.base.clone(),
            adjustment: context.adjustment.clone(),
            profile: context.profile.clone(),
        })
        .unwrap_or_default();
        let request = self
            .settings
            .request(GenerationTask::ChangePlan, prompt, payload);

        let base = context.base.clone();
        let generated = self
            .gateway
            .generate_with(&request, move |text| parse_plan(text, &base))
            .await?;
        debug!(
            changes = generated.value.changes.len(),
            provider = %generated.result.provider,
            "Change plan ready"
        );
        Ok(generated)
    }
}

fn describe_adjustment(adjustment: &StructuredAdjustment) -> String {
    let mut lines = Vec::new();
    for a in &adjustment.adjustments {
        let direction = match a.direction {
            super::Direction::Increase => "increase",
            super::Direction::Decrease => "decrease",
        };
        lines.push(format!("- {} {} ({})", direction, a.axis, a.magnitude.as_str()));
    }
    for s in &adjustment.substitutions {
        match s.replacement {
            Some(ref r) => lines.push(format!("- replace {} with {} ({})", s.ingredient, r, s.reason)),
            None => lines.push(format!("- remove {} ({})", s.ingredient, s.reason)),
        }
    }
    for note in &adjustment.notes {
        lines.push(format!("- note from the cook: \"{}\"", note));
    }
    lines.join("\n")
}

fn describe_profile(profile: Option<&TasteProfile>) -> String {
    let Some(profile) = profile else {
        return "unknown".to_string();
    };
    let mut parts: Vec<String> = TasteAxis::ALL
        .iter()
        .map(|axis| format!("{} {}/5", axis, profile.level(*axis)))
        .collect();
    if !profile.allergies.is_empty() {
        let allergies: Vec<&str> = profile.allergies.iter().map(|a| a.as_str()).collect();
        parts.push(format!("allergies: {}", allergies.join(", ")));
    }
    if !profile.dietary_restrictions.is_empty() {
        let restrictions = serde_json::to_string(&profile.dietary_restrictions).unwrap_or_default();
        parts.push(format!("dietary restrictions: {}", restrictions));
    }
    parts.join("; ")
}

fn build_prompt(context: &AdjustmentContext) -> String {
    let ingredients: Vec<String> = context
        .base
        .ingredients
        .iter()
        .enumerate()
        .map(|(i, ing)| format!("{}. {}", i, ing.display_line()))
        .collect();
    let steps: Vec<String> = context
        .base
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i, s.description))
        .collect();
    let knowledge = if context.passages.is_empty() {
        "none".to_string()
    } else {
        context
            .passages
            .iter()
            .map(|p| format!("- {}", p.text))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are a cooking assistant adjusting a saved recipe to a cook's feedback.

Recipe: {title}

Ingredients (index. name amount unit):
{ingredients}

Steps (index. text):
{steps}

Requested adjustment:
{adjustment}

Taste profile: {profile}

Reference notes:
{knowledge}

Propose the smallest set of changes that satisfies the request. Use "scale" (a multiplier such as 0.7) to change an amount, "replacement" to swap an ingredient, and "detail" for new step text. Indices refer to the lists above.

Respond with ONLY a JSON object of this shape:
{{"summary": "...", "changes": [{{"target": "ingredient|step", "action": "modify|add|remove", "index": 0, "name": "...", "scale": 0.7, "replacement": "...", "amount": "...", "unit": "...", "detail": "...", "reason": "..."}}]}}"#,
        title = context.original.title,
        ingredients = ingredients.join("\n"),
        steps = steps.join("\n"),
        adjustment = describe_adjustment(&context.adjustment),
        profile = describe_profile(context.profile.as_ref()),
        knowledge = knowledge,
    )
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    changes: Vec<PlannedChange>,
}

fn check_change(change: &PlannedChange, base: &RecipeContent) -> Result<(), String> {
    let len = match change.target {
        ChangeTarget::Ingredient => base.ingredients.len(),
        ChangeTarget::Step => base.steps.len(),
    };
    if let Some(index) = change.index {
        let limit = match change.action {
            ChangeAction::Add => len + 1,
            _ => len,
        };
        if index >= limit {
            return Err(format!(
                "{:?} index {} out of range ({} entries)",
                change.target, index, len
            ));
        }
    }
    if let Some(scale) = change.scale {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(format!("scale {} must be a positive number", scale));
        }
    }
    match (change.target, change.action) {
        (ChangeTarget::Ingredient, ChangeAction::Add) if change.name.is_none() => {
            Err("added ingredient has no name".to_string())
        }
        (ChangeTarget::Ingredient, _) if change.index.is_none() && change.name.is_none() => {
            Err("ingredient change names neither index nor name".to_string())
        }
        (ChangeTarget::Step, ChangeAction::Add) if change.detail.is_none() => {
            Err("added step has no text".to_string())
        }
        (ChangeTarget::Step, ChangeAction::Modify | ChangeAction::Remove)
            if change.index.is_none() =>
        {
            Err("step change has no index".to_string())
        }
        _ => Ok(()),
    }
}

/// Parse and check a planner reply against the content it refers to.
pub(crate) fn parse_plan(text: &str, base: &RecipeContent) -> Result<ChangePlan, ProviderError> {
    let json = extract_json(text)?;
    let raw: RawPlan = serde_json::from_str(json)
        .map_err(|e| ProviderError::MalformedOutput(format!("plan JSON: {}", e)))?;
    if raw.changes.is_empty() {
        return Err(ProviderError::MalformedOutput("plan has no changes".to_string()));
    }
    for change in &raw.changes {
        check_change(change, base).map_err(ProviderError::MalformedOutput)?;
    }
    let summary = raw
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{} change(s)", raw.changes.len()));
    Ok(ChangePlan {
        summary,
        changes: raw.changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Ingredient, Step};

    fn base() -> RecipeContent {
        RecipeContent::new(
            vec![
                Ingredient::new("kimchi", Some("300"), Some("g")),
                Ingredient::new("soy sauce", Some("2"), Some("tbsp")),
            ],
            vec![Step::new("Simmer everything.")],
        )
    }

    #[test]
    fn test_parse_plan_accepts_fenced_json() {
        let reply = r#"```json
{"summary": "Less soy sauce",
 "changes": [{"target": "ingredient", "action": "modify", "index": 1, "scale": 0.5, "reason": "too salty"}]}
```"#;
        let plan = parse_plan(reply, &base()).unwrap();
        assert_eq!(plan.summary, "Less soy sauce");
        assert_eq!(plan.changes[0].scale, Some(0.5));
    }

    #[test]
    fn test_parse_plan_rejects_out_of_range_index() {
        let reply = r#"{"summary": "x", "changes": [{"target": "step", "action": "modify", "index": 4, "detail": "y"}]}"#;
        let err = parse_plan(reply, &base()).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedOutput(ref m) if m.contains("out of range")));

        // Appending a step right after the last one is fine.
        let reply = r#"{"summary": "x", "changes": [{"target": "step", "action": "add", "index": 1, "detail": "Rest."}]}"#;
        assert!(parse_plan(reply, &base()).is_ok());
    }

    #[test]
    fn test_parse_plan_rejects_empty_and_bad_scale() {
        assert!(parse_plan(r#"{"summary": "x", "changes": []}"#, &base()).is_err());
        let reply = r#"{"changes": [{"target": "ingredient", "action": "modify", "index": 0, "scale": -1}]}"#;
        assert!(parse_plan(reply, &base()).is_err());
        let reply = r#"{"changes": [{"target": "ingredient", "action": "add"}]}"#;
        assert!(parse_plan(reply, &base()).is_err());
    }

    #[test]
    fn test_summary_defaults_to_change_count() {
        let reply = r#"{"changes": [{"target": "ingredient", "action": "remove", "name": "kimchi"}]}"#;
        let plan = parse_plan(reply, &base()).unwrap();
        assert_eq!(plan.summary, "1 change(s)");
    }
}
