//! Which ingredients drive which taste axis.

use crate::models::{Ingredient, TasteAxis};

const SALT: &[&str] = &[
    "salt", "soy sauce", "fish sauce", "miso", "doenjang", "소금", "간장", "된장", "액젓", "새우젓",
];
const SWEET: &[&str] = &[
    "sugar", "honey", "syrup", "molasses", "설탕", "꿀", "물엿", "올리고당", "조청",
];
const SPICY: &[&str] = &[
    "chili",
    "chilli",
    "gochugaru",
    "gochujang",
    "cayenne",
    "jalapeño",
    "jalapeno",
    "sriracha",
    "고춧가루",
    "고추장",
    "청양고추",
];
const SOUR: &[&str] = &["vinegar", "lemon", "lime", "식초", "레몬", "라임"];

/// Ingredient name fragments that carry this axis.
pub fn keywords(axis: TasteAxis) -> &'static [&'static str] {
    match axis {
        TasteAxis::Saltiness => SALT,
        TasteAxis::Sweetness => SWEET,
        TasteAxis::Spiciness => SPICY,
        TasteAxis::Sourness => SOUR,
    }
}

pub fn ingredient_matches(ingredient: &Ingredient, axis: TasteAxis) -> bool {
    let name = ingredient.name.to_lowercase();
    keywords(axis).iter().any(|k| name.contains(k))
}

/// Salt- or sugar-bearing ingredients, watched for quantity spikes.
pub fn is_sodium_or_sugar(ingredient: &Ingredient) -> bool {
    ingredient_matches(ingredient, TasteAxis::Saltiness)
        || ingredient_matches(ingredient, TasteAxis::Sweetness)
}

/// What to add when an axis must go up and no ingredient carries it.
pub fn default_addition(axis: TasteAxis) -> (&'static str, &'static str, &'static str) {
    match axis {
        TasteAxis::Saltiness => ("soy sauce", "1", "tsp"),
        TasteAxis::Sweetness => ("sugar", "1", "tsp"),
        TasteAxis::Spiciness => ("chili flakes", "1/2", "tsp"),
        TasteAxis::Sourness => ("lemon juice", "1", "tbsp"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_english_and_korean_names() {
        assert!(ingredient_matches(&Ingredient::new("Soy Sauce", None, None), TasteAxis::Saltiness));
        assert!(ingredient_matches(&Ingredient::new("국간장", None, None), TasteAxis::Saltiness));
        assert!(ingredient_matches(&Ingredient::new("고추장", None, None), TasteAxis::Spiciness));
        assert!(!ingredient_matches(&Ingredient::new("onion", None, None), TasteAxis::Sourness));
    }

    #[test]
    fn test_sodium_or_sugar() {
        assert!(is_sodium_or_sugar(&Ingredient::new("brown sugar", None, None)));
        assert!(is_sodium_or_sugar(&Ingredient::new("sea salt", None, None)));
        assert!(!is_sodium_or_sugar(&Ingredient::new("garlic", None, None)));
    }
}
