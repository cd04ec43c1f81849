//! Structural and nutritional sanity checks on a generated draft.
//!
//! The validator is an ordered list of [`ValidationCheck`]s. Every check
//! runs; the draft is accepted only when none reports a violation.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{axes, quantity, DraftVariant, StageError, ValidatedVariant};
use crate::models::{Allergy, Ingredient, RecipeContent, TasteProfile};

/// What a check gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    /// The catalog recipe the saved recipe points at.
    pub original: &'a RecipeContent,
    /// The content the draft was generated from.
    pub base: &'a RecipeContent,
    pub draft: &'a DraftVariant,
    pub profile: Option<&'a TasteProfile>,
}

pub trait ValidationCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Violations found, empty when the draft passes.
    fn check(&self, input: &ValidationInput<'_>) -> Vec<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// A salt- or sugar-bearing ingredient may grow to at most this
    /// multiple of its original amount.
    #[serde(default = "default_max_spike_ratio")]
    pub max_spike_ratio: f64,

    /// Largest share of the original ingredients a draft may drop.
    #[serde(default = "default_max_dropped_fraction")]
    pub max_dropped_fraction: f64,
}

fn default_max_spike_ratio() -> f64 {
    3.0
}

fn default_max_dropped_fraction() -> f64 {
    0.5
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_spike_ratio: default_max_spike_ratio(),
            max_dropped_fraction: default_max_dropped_fraction(),
        }
    }
}

pub struct NonEmptySteps;

impl ValidationCheck for NonEmptySteps {
    fn name(&self) -> &str {
        "non_empty_steps"
    }

    fn check(&self, input: &ValidationInput<'_>) -> Vec<String> {
        if input.draft.steps.iter().all(|s| s.description.trim().is_empty()) {
            vec!["recipe has no steps".to_string()]
        } else {
            Vec::new()
        }
    }
}

pub struct NonEmptyIngredients;

impl ValidationCheck for NonEmptyIngredients {
    fn name(&self) -> &str {
        "non_empty_ingredients"
    }

    fn check(&self, input: &ValidationInput<'_>) -> Vec<String> {
        if input.draft.ingredients.is_empty() {
            vec!["recipe has no ingredients".to_string()]
        } else {
            Vec::new()
        }
    }
}

pub struct QuantitiesParse;

impl ValidationCheck for QuantitiesParse {
    fn name(&self) -> &str {
        "quantities_parse"
    }

    fn check(&self, input: &ValidationInput<'_>) -> Vec<String> {
        input
            .draft
            .ingredients
            .iter()
            .filter_map(|i| {
                let amount = i.amount.as_deref()?;
                quantity::parse(amount)
                    .is_none()
                    .then(|| format!("amount \"{}\" for {} is not a measurement", amount, i.name))
            })
            .collect()
    }
}

pub struct IngredientLoss {
    pub max_dropped_fraction: f64,
}

impl ValidationCheck for IngredientLoss {
    fn name(&self) -> &str {
        "ingredient_loss"
    }

    fn check(&self, input: &ValidationInput<'_>) -> Vec<String> {
        let original = input.original.ingredients.len();
        let dropped = original.saturating_sub(input.draft.ingredients.len());
        if original > 0 && dropped as f64 > original as f64 * self.max_dropped_fraction {
            vec![format!(
                "{} of {} original ingredients were dropped",
                dropped, original
            )]
        } else {
            Vec::new()
        }
    }
}

fn same_name(a: &Ingredient, b: &Ingredient) -> bool {
    a.name.trim().eq_ignore_ascii_case(b.name.trim())
}

fn numeric_amount(ingredient: &Ingredient) -> Option<(f64, String)> {
    let parsed = quantity::parse(ingredient.amount.as_deref()?)?;
    let value = parsed.max_value()?;
    let unit = format!(
        "{}{}",
        parsed.suffix.trim(),
        ingredient.unit.as_deref().unwrap_or("").trim()
    );
    Some((value, unit.to_lowercase()))
}

pub struct SodiumSugarSpike {
    pub max_ratio: f64,
}

impl ValidationCheck for SodiumSugarSpike {
    fn name(&self) -> &str {
        "sodium_sugar_spike"
    }

    fn check(&self, input: &ValidationInput<'_>) -> Vec<String> {
        let mut violations = Vec::new();
        for ingredient in input.draft.ingredients.iter().filter(|i| axes::is_sodium_or_sugar(i)) {
            let reference = input
                .original
                .ingredients
                .iter()
                .chain(input.base.ingredients.iter())
                .find(|o| same_name(o, ingredient));
            let (Some(reference), Some((after, after_unit))) =
                (reference, numeric_amount(ingredient))
            else {
                continue;
            };
            let Some((before, before_unit)) = numeric_amount(reference) else {
                continue;
            };
            if before_unit != after_unit || before <= 0.0 {
                continue;
            }
            if after > before * self.max_ratio {
                violations.push(format!(
                    "{} grew from {} to {} (more than {}x)",
                    ingredient.name,
                    quantity::format_number(before),
                    quantity::format_number(after),
                    self.max_ratio
                ));
            }
        }
        violations
    }
}

pub struct DiffersFromBase;

impl ValidationCheck for DiffersFromBase {
    fn name(&self) -> &str {
        "differs_from_base"
    }

    fn check(&self, input: &ValidationInput<'_>) -> Vec<String> {
        if input.draft.content() == *input.base {
            vec!["draft is identical to the current recipe".to_string()]
        } else {
            Vec::new()
        }
    }
}

/// Names that contain an allergen marker without containing the allergen.
fn marker_exclusions(allergy: Allergy) -> &'static [&'static str] {
    match allergy {
        Allergy::Milk => &[
            "oat",
            "soy milk",
            "almond milk",
            "rice milk",
            "coconut",
            "peanut butter",
            "cocoa butter",
            "두유",
            "식물성",
            "비건",
            "vegan",
        ],
        Allergy::Egg => &["eggplant"],
        Allergy::Wheat => &["buckwheat"],
        _ => &[],
    }
}

fn contains_allergen(ingredient: &Ingredient, allergy: Allergy) -> bool {
    let name = ingredient.name.to_lowercase();
    allergy.ingredient_markers().iter().any(|m| name.contains(m))
        && !marker_exclusions(allergy).iter().any(|e| name.contains(e))
}

/// Rejects drafts that introduce an ingredient the user is allergic to.
pub struct Allergens;

impl ValidationCheck for Allergens {
    fn name(&self) -> &str {
        "allergens"
    }

    fn check(&self, input: &ValidationInput<'_>) -> Vec<String> {
        let Some(profile) = input.profile else {
            return Vec::new();
        };
        let mut violations = Vec::new();
        for ingredient in &input.draft.ingredients {
            if input.base.ingredients.iter().any(|b| same_name(b, ingredient)) {
                continue;
            }
            for allergy in &profile.allergies {
                if contains_allergen(ingredient, *allergy) {
                    violations.push(format!(
                        "{} introduces {} allergen",
                        ingredient.name,
                        allergy.as_str()
                    ));
                }
            }
        }
        violations
    }
}

pub struct VariantValidator {
    checks: Vec<Box<dyn ValidationCheck>>,
}

impl Default for VariantValidator {
    fn default() -> Self {
        Self::new(&ValidatorConfig::default())
    }
}

impl VariantValidator {
    /// The default check list.
    pub fn new(config: &ValidatorConfig) -> Self {
        Self::with_checks(vec![
            Box::new(NonEmptySteps),
            Box::new(NonEmptyIngredients),
            Box::new(QuantitiesParse),
            Box::new(IngredientLoss {
                max_dropped_fraction: config.max_dropped_fraction,
            }),
            Box::new(SodiumSugarSpike {
                max_ratio: config.max_spike_ratio,
            }),
            Box::new(DiffersFromBase),
            Box::new(Allergens),
        ])
    }

    pub fn with_checks(checks: Vec<Box<dyn ValidationCheck>>) -> Self {
        Self { checks }
    }

    pub fn push(&mut self, check: Box<dyn ValidationCheck>) {
        self.checks.push(check);
    }

    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    pub fn validate(&self, input: ValidationInput<'_>) -> Result<ValidatedVariant, StageError> {
        let violations: Vec<String> = self
            .checks
            .iter()
            .flat_map(|check| {
                let found = check.check(&input);
                if !found.is_empty() {
                    debug!(check = check.name(), "Validation check failed");
                }
                found
                    .into_iter()
                    .map(move |v| format!("{}: {}", check.name(), v))
            })
            .collect();

        if !violations.is_empty() {
            info!(violations = violations.len(), "Draft variant rejected");
            return Err(StageError::ValidationRejected(violations));
        }
        Ok(ValidatedVariant {
            summary: input.draft.summary.clone(),
            content: input.draft.content(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Step;

    fn original() -> RecipeContent {
        RecipeContent::new(
            vec![
                Ingredient::new("kimchi", Some("300"), Some("g")),
                Ingredient::new("soy sauce", Some("2"), Some("tbsp")),
                Ingredient::new("sugar", Some("1"), Some("tsp")),
                Ingredient::new("butter", Some("1"), Some("tbsp")),
            ],
            vec![Step::new("Simmer."), Step::new("Serve.")],
        )
    }

    fn draft_from(content: &RecipeContent) -> DraftVariant {
        DraftVariant {
            summary: "adjusted".to_string(),
            ingredients: content.ingredients.clone(),
            steps: content.steps.clone(),
        }
    }

    fn violations(draft: &DraftVariant, profile: Option<&TasteProfile>) -> Vec<String> {
        let original = original();
        let input = ValidationInput {
            original: &original,
            base: &original,
            draft,
            profile,
        };
        match VariantValidator::default().validate(input) {
            Ok(_) => Vec::new(),
            Err(StageError::ValidationRejected(v)) => v,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_accepts_a_reasonable_draft() {
        let mut draft = draft_from(&original());
        draft.ingredients[1].amount = Some("1".to_string());
        assert!(violations(&draft, None).is_empty());
    }

    #[test]
    fn test_rejects_empty_steps() {
        let mut draft = draft_from(&original());
        draft.ingredients[1].amount = Some("1".to_string());
        draft.steps.clear();
        let found = violations(&draft, None);
        assert_eq!(found.len(), 1);
        assert!(found[0].starts_with("non_empty_steps"));
    }

    #[test]
    fn test_rejects_unchanged_and_unparseable() {
        let draft = draft_from(&original());
        assert!(violations(&draft, None)
            .iter()
            .any(|v| v.starts_with("differs_from_base")));

        let mut draft = draft_from(&original());
        draft.ingredients[0].amount = Some("a mountain of".to_string());
        assert!(violations(&draft, None)
            .iter()
            .any(|v| v.starts_with("quantities_parse")));
    }

    #[test]
    fn test_sugar_spike_and_ingredient_loss() {
        let mut draft = draft_from(&original());
        draft.ingredients[2].amount = Some("4".to_string());
        assert!(violations(&draft, None)
            .iter()
            .any(|v| v.starts_with("sodium_sugar_spike")));

        let mut draft = draft_from(&original());
        draft.ingredients.truncate(1);
        assert!(violations(&draft, None)
            .iter()
            .any(|v| v.starts_with("ingredient_loss")));
    }

    #[test]
    fn test_allergens_only_flag_new_ingredients() {
        let profile = TasteProfile {
            allergies: vec![Allergy::Milk],
            ..Default::default()
        };
        let mut draft = draft_from(&original());
        draft.ingredients[3].name = "oat milk".to_string();
        assert!(violations(&draft, Some(&profile)).is_empty());

        let mut draft = draft_from(&original());
        draft.ingredients[3].name = "heavy cream".to_string();
        let found = violations(&draft, Some(&profile));
        assert!(found.iter().any(|v| v.contains("milk allergen")));
    }

    #[test]
    fn test_custom_checks_can_be_added() {
        struct NoCilantro;
        impl ValidationCheck for NoCilantro {
            fn name(&self) -> &str {
                "no_cilantro"
            }
            fn check(&self, input: &ValidationInput<'_>) -> Vec<String> {
                input
                    .draft
                    .ingredients
                    .iter()
                    .filter(|i| i.name == "cilantro")
                    .map(|_| "cilantro".to_string())
                    .collect()
            }
        }

        let mut validator = VariantValidator::default();
        validator.push(Box::new(NoCilantro));
        assert!(validator.check_names().contains(&"no_cilantro"));

        let mut draft = draft_from(&original());
        draft.ingredients.push(Ingredient::new("cilantro", None, None));
        let original = original();
        let result = validator.validate(ValidationInput {
            original: &original,
            base: &original,
            draft: &draft,
            profile: None,
        });
        assert!(matches!(result, Err(StageError::ValidationRejected(v)) if v.len() == 1));
    }
}
