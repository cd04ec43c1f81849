//! Taste preferences and feedback snapshots.

use serde::{Deserialize, Serialize};

/// A flavor dimension that feedback can move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TasteAxis {
    Sweetness,
    Saltiness,
    Spiciness,
    Sourness,
}

impl TasteAxis {
    pub const ALL: [TasteAxis; 4] = [
        TasteAxis::Sweetness,
        TasteAxis::Saltiness,
        TasteAxis::Spiciness,
        TasteAxis::Sourness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sweetness => "sweetness",
            Self::Saltiness => "saltiness",
            Self::Spiciness => "spiciness",
            Self::Sourness => "sourness",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sweetness" => Some(Self::Sweetness),
            "saltiness" => Some(Self::Saltiness),
            "spiciness" => Some(Self::Spiciness),
            "sourness" => Some(Self::Sourness),
            _ => None,
        }
    }
}

impl std::fmt::Display for TasteAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DietaryRestriction {
    Vegetarian,
    Vegan,
    Pescatarian,
    Halal,
    Kosher,
    GlutenFree,
    LactoseFree,
    LowSodium,
    LowSugar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Allergy {
    Peanut,
    TreeNut,
    Milk,
    Egg,
    Wheat,
    Soy,
    Fish,
    Shellfish,
    Sesame,
}

impl Allergy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peanut => "peanut",
            Self::TreeNut => "tree_nut",
            Self::Milk => "milk",
            Self::Egg => "egg",
            Self::Wheat => "wheat",
            Self::Soy => "soy",
            Self::Fish => "fish",
            Self::Shellfish => "shellfish",
            Self::Sesame => "sesame",
        }
    }

    /// Ingredient name fragments that indicate this allergen.
    pub fn ingredient_markers(&self) -> &'static [&'static str] {
        match self {
            Self::Peanut => &["peanut", "땅콩"],
            Self::TreeNut => &["almond", "walnut", "cashew", "pecan", "hazelnut", "pistachio", "호두", "아몬드", "잣"],
            Self::Milk => &["milk", "butter", "cream", "cheese", "yogurt", "우유", "버터", "치즈", "생크림"],
            Self::Egg => &["egg", "mayonnaise", "달걀", "계란"],
            Self::Wheat => &["flour", "wheat", "bread", "noodle", "pasta", "밀가루", "국수", "부침가루"],
            Self::Soy => &["soy", "tofu", "miso", "edamame", "간장", "두부", "된장"],
            Self::Fish => &["fish", "anchovy", "salmon", "tuna", "cod", "멸치", "생선", "참치", "연어"],
            Self::Shellfish => &["shrimp", "prawn", "crab", "lobster", "clam", "mussel", "oyster", "새우", "꽃게", "조개", "홍합"],
            Self::Sesame => &["sesame", "tahini", "참깨", "참기름", "들기름"],
        }
    }
}

/// A user's taste preferences (category "overall").
///
/// Levels run 1..=5 with 3 as neutral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasteProfile {
    #[serde(default = "neutral_level")]
    pub sweetness: u8,
    #[serde(default = "neutral_level")]
    pub saltiness: u8,
    #[serde(default = "neutral_level")]
    pub spiciness: u8,
    #[serde(default = "neutral_level")]
    pub sourness: u8,
    #[serde(default)]
    pub dietary_restrictions: Vec<DietaryRestriction>,
    #[serde(default)]
    pub allergies: Vec<Allergy>,
}

fn neutral_level() -> u8 {
    3
}

impl Default for TasteProfile {
    fn default() -> Self {
        Self {
            sweetness: neutral_level(),
            saltiness: neutral_level(),
            spiciness: neutral_level(),
            sourness: neutral_level(),
            dietary_restrictions: Vec::new(),
            allergies: Vec::new(),
        }
    }
}

impl TasteProfile {
    pub fn level(&self, axis: TasteAxis) -> u8 {
        let raw = match axis {
            TasteAxis::Sweetness => self.sweetness,
            TasteAxis::Saltiness => self.saltiness,
            TasteAxis::Spiciness => self.spiciness,
            TasteAxis::Sourness => self.sourness,
        };
        raw.clamp(1, 5)
    }

    pub fn has_restriction(&self, restriction: DietaryRestriction) -> bool {
        self.dietary_restrictions.contains(&restriction)
    }
}

/// Categorical rating a user gives one taste axis after cooking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TasteRating {
    TooLittle,
    JustRight,
    TooMuch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasteRatings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweetness: Option<TasteRating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saltiness: Option<TasteRating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spiciness: Option<TasteRating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sourness: Option<TasteRating>,
}

impl TasteRatings {
    pub fn get(&self, axis: TasteAxis) -> Option<TasteRating> {
        match axis {
            TasteAxis::Sweetness => self.sweetness,
            TasteAxis::Saltiness => self.saltiness,
            TasteAxis::Spiciness => self.spiciness,
            TasteAxis::Sourness => self.sourness,
        }
    }
}

/// An ingredient swap the user asked for explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRequest {
    pub ingredient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

/// Immutable copy of a feedback submission taken at enqueue time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSnapshot {
    #[serde(default)]
    pub feedback_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ratings: TasteRatings,
    #[serde(default)]
    pub substitutions: Vec<SubstitutionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taste_profile: Option<TasteProfile>,
}

impl FeedbackSnapshot {
    pub fn from_text(feedback_id: &str, text: &str) -> Self {
        Self {
            feedback_id: feedback_id.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }
}
