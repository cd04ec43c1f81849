//! Feedback interpretation.
//!
//! Turns a feedback snapshot into a [`StructuredAdjustment`]. Categorical
//! ratings decide an axis outright; free text fills in axes the ratings
//! leave open and supplies magnitudes. Works on English and Korean
//! feedback.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::{AxisAdjustment, Direction, Magnitude, StageError, StructuredAdjustment, Substitution};
use crate::models::{FeedbackSnapshot, TasteAxis, TasteRating};

/// English cues are matched as whole words, Korean ones as substrings.
struct Cues {
    en: &'static [&'static str],
    ko: &'static [&'static str],
}

impl Cues {
    fn matches(&self, clause: &Clause) -> bool {
        self.en.iter().any(|w| clause.padded.contains(&format!(" {} ", w)))
            || self.ko.iter().any(|w| clause.raw.contains(w))
    }
}

const SALTY: Cues = Cues {
    en: &["salty", "salt", "saltier", "salted", "sodium", "bland"],
    ko: &["짜", "짰", "짭", "싱거", "싱겁", "간이"],
};
const SWEET: Cues = Cues {
    en: &["sweet", "sweeter", "sugary", "sugar"],
    ko: &["달아", "달다", "달고", "달았", "달게", "단맛", "달달"],
};
const SPICY: Cues = Cues {
    en: &["spicy", "spicier", "hot", "heat", "fiery", "chili"],
    ko: &["맵", "매워", "매운", "매콤", "얼큰"],
};
const SOUR: Cues = Cues {
    en: &["sour", "sourer", "tangy", "tart", "acidic", "vinegary"],
    ko: &["시큼", "셔", "새콤", "신맛", "시어"],
};
const BLAND: Cues = Cues {
    en: &["bland", "flavorless", "tasteless"],
    ko: &["싱거", "싱겁"],
};
const INCREASE: Cues = Cues {
    en: &["more", "enough", "needs", "need", "add", "extra", "lacking", "increase", "stronger"],
    ko: &["더 ", "더넣", "부족", "약해", "약했"],
};
const DECREASE: Cues = Cues {
    en: &["less", "too", "reduce", "cut", "lower", "overpowering", "milder", "tone"],
    ko: &["덜", "줄여", "줄이", "너무", "과해", "강해", "강했"],
};
const SLIGHT: Cues = Cues {
    en: &["a bit", "a little", "slightly", "bit", "little", "somewhat", "touch"],
    ko: &["조금", "약간", "살짝", "좀"],
};
const STRONG: Cues = Cues {
    en: &["much", "way", "very", "far", "extremely", "really", "a lot", "so"],
    ko: &["너무", "많이", "훨씬", "엄청", "진짜", "정말", "매우"],
};

fn axis_cues(axis: TasteAxis) -> &'static Cues {
    match axis {
        TasteAxis::Saltiness => &SALTY,
        TasteAxis::Sweetness => &SWEET,
        TasteAxis::Spiciness => &SPICY,
        TasteAxis::Sourness => &SOUR,
    }
}

/// Swaps applied for "dairy-free" style requests.
const DAIRY_SWAPS: &[(&str, &str)] = &[
    ("milk", "oat milk"),
    ("butter", "olive oil"),
    ("cream", "coconut cream"),
    ("cheese", "nutritional yeast"),
    ("yogurt", "coconut yogurt"),
    ("우유", "두유"),
    ("버터", "식물성 버터"),
    ("생크림", "코코넛 크림"),
    ("치즈", "비건 치즈"),
];

static REPLACE_WITH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:replace|swap|substitute)\s+(?:the\s+)?(.+?)\s+(?:with|for)\s+(.+)").unwrap()
});
static INSTEAD_OF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:use\s+|try\s+)?(.+?)\s+instead\s+of\s+(?:the\s+)?(.+)").unwrap()
});
static WITHOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:without|skip|omit|leave\s+out|hold\s+the)\s+(?:the\s+)?(.+)").unwrap()
});
static CONJUNCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(?:but|and|also)\s+").unwrap());
static KO_INSTEAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+?)\s*대신(?:에)?\s*(\S+)").unwrap());
static KO_WITHOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+?)\s*(?:빼고|빼주|빼서|빼면|없이|제외)").unwrap());

const DAIRY_FREE_PHRASES: &[&str] = &["dairy-free", "dairy free", "no dairy", "without dairy", "유제품"];

/// Words that end an ingredient name captured from free text.
const NAME_STOPWORDS: &[&str] = &["please", "next", "time", "and", "but", "because", "if", "so"];

/// One fragment of feedback text.
struct Clause {
    raw: String,
    /// Lowercase words joined by single spaces, padded with a space each side.
    padded: String,
}

impl Clause {
    fn new(text: &str) -> Self {
        let raw = text.trim().to_lowercase();
        let words: Vec<&str> = raw
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .filter(|w| !w.is_empty())
            .collect();
        Self {
            padded: format!(" {} ", words.join(" ")),
            raw,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackInterpreter;

impl FeedbackInterpreter {
    pub fn new() -> Self {
        Self
    }

    pub fn interpret(&self, snapshot: &FeedbackSnapshot) -> Result<StructuredAdjustment, StageError> {
        let clauses = split_clauses(&snapshot.text);
        let mut text_signals: Vec<AxisAdjustment> = Vec::new();
        let mut substitutions: Vec<Substitution> = Vec::new();
        let mut notes = Vec::new();

        for request in &snapshot.substitutions {
            substitutions.push(Substitution {
                ingredient: request.ingredient.trim().to_string(),
                replacement: request
                    .replacement
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
                reason: "requested substitution".to_string(),
            });
        }

        for clause_text in &clauses {
            let clause = Clause::new(clause_text);
            let found = text_substitutions(clause_text, &clause);
            if !found.is_empty() {
                substitutions.extend(found);
                continue;
            }
            let signals = axis_signals(&clause);
            if signals.is_empty() {
                notes.push(clause_text.trim().to_string());
                continue;
            }
            for signal in signals {
                if !text_signals.iter().any(|s| s.axis == signal.axis) {
                    text_signals.push(signal);
                }
            }
        }

        let mut adjustments = Vec::new();
        for axis in TasteAxis::ALL {
            let from_text = text_signals.iter().find(|s| s.axis == axis);
            let adjustment = match snapshot.ratings.get(axis) {
                Some(TasteRating::JustRight) => None,
                Some(rating) => {
                    let direction = if rating == TasteRating::TooMuch {
                        Direction::Decrease
                    } else {
                        Direction::Increase
                    };
                    let magnitude = from_text
                        .filter(|s| s.direction == direction)
                        .map(|s| s.magnitude)
                        .unwrap_or(Magnitude::Moderate);
                    Some(AxisAdjustment {
                        axis,
                        direction,
                        magnitude,
                    })
                }
                None => from_text.cloned(),
            };
            adjustments.extend(adjustment);
        }

        let mut seen = HashSet::new();
        substitutions.retain(|s| !s.ingredient.is_empty() && seen.insert(s.ingredient.to_lowercase()));

        let structured = StructuredAdjustment {
            adjustments,
            substitutions,
            notes,
        };
        if structured.is_empty() {
            return Err(StageError::Interpretation(
                "feedback names no taste change or substitution".to_string(),
            ));
        }
        Ok(structured)
    }
}

fn split_clauses(text: &str) -> Vec<String> {
    text.split(['.', ',', '!', '?', ';', '\n'])
        .flat_map(|part| CONJUNCTION.split(part).map(str::to_string).collect::<Vec<_>>())
        .filter(|c| !c.trim().is_empty())
        .collect()
}

fn axis_signals(clause: &Clause) -> Vec<AxisAdjustment> {
    let magnitude = if SLIGHT.matches(clause) {
        Magnitude::Slight
    } else if STRONG.matches(clause) {
        Magnitude::Strong
    } else {
        Magnitude::Moderate
    };
    let increase = INCREASE.matches(clause);
    let decrease = DECREASE.matches(clause);

    TasteAxis::ALL
        .into_iter()
        .filter(|axis| axis_cues(*axis).matches(clause))
        .map(|axis| {
            let direction = if axis == TasteAxis::Saltiness && BLAND.matches(clause) {
                Direction::Increase
            } else if increase && !decrease {
                Direction::Increase
            } else {
                // Naming a taste in feedback usually means there was too much of it.
                Direction::Decrease
            };
            AxisAdjustment {
                axis,
                direction,
                magnitude,
            }
        })
        .collect()
}

fn text_substitutions(text: &str, clause: &Clause) -> Vec<Substitution> {
    if DAIRY_FREE_PHRASES.iter().any(|p| clause.raw.contains(p)) {
        return DAIRY_SWAPS
            .iter()
            .map(|(ingredient, replacement)| Substitution {
                ingredient: ingredient.to_string(),
                replacement: Some(replacement.to_string()),
                reason: "dairy-free".to_string(),
            })
            .collect();
    }

    let text = text.trim();
    if let Some(caps) = REPLACE_WITH.captures(text) {
        return swap(&caps[1], Some(&caps[2]));
    }
    if let Some(caps) = INSTEAD_OF.captures(text) {
        return swap(&caps[2], Some(&caps[1]));
    }
    if let Some(caps) = WITHOUT.captures(text) {
        return swap(&caps[1], None);
    }
    if let Some(caps) = KO_INSTEAD.captures(text) {
        return swap(&strip_particle(&caps[1]), Some(strip_particle(&caps[2]).as_str()));
    }
    if let Some(caps) = KO_WITHOUT.captures(text) {
        return swap(&strip_particle(&caps[1]), None);
    }
    Vec::new()
}

fn swap(ingredient: &str, replacement: Option<&str>) -> Vec<Substitution> {
    let ingredient = clean_name(ingredient);
    if ingredient.is_empty() {
        return Vec::new();
    }
    let replacement = replacement.map(clean_name).filter(|r| !r.is_empty());
    let reason = match replacement {
        Some(ref r) => format!("swap {} for {}", ingredient, r),
        None => format!("leave out {}", ingredient),
    };
    vec![Substitution {
        ingredient,
        replacement,
        reason,
    }]
}

/// At most three words, stopping at filler.
fn clean_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-'))
        .take_while(|w| !NAME_STOPWORDS.contains(&w.to_lowercase().as_str()))
        .filter(|w| !w.is_empty())
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop a trailing Korean object/topic particle or instrumental ending.
fn strip_particle(word: &str) -> String {
    for suffix in ["으로", "로", "을", "를", "은", "는", "이", "가"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            if stem.chars().count() >= 1 {
                return stem.to_string();
            }
        }
    }
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SubstitutionRequest, TasteRatings};

    fn interpret(text: &str) -> StructuredAdjustment {
        FeedbackInterpreter::new()
            .interpret(&FeedbackSnapshot::from_text("fb", text))
            .unwrap()
    }

    #[test]
    fn test_much_less_salty_is_a_strong_decrease() {
        let result = interpret("Much less salty please");
        assert_eq!(
            result.adjustments,
            vec![AxisAdjustment {
                axis: TasteAxis::Saltiness,
                direction: Direction::Decrease,
                magnitude: Magnitude::Strong,
            }]
        );
    }

    #[test]
    fn test_intensifiers() {
        let slight = interpret("a bit more spicy");
        assert_eq!(slight.adjustments[0].axis, TasteAxis::Spiciness);
        assert_eq!(slight.adjustments[0].direction, Direction::Increase);
        assert_eq!(slight.adjustments[0].magnitude, Magnitude::Slight);

        let strong = interpret("way too sweet");
        assert_eq!(strong.adjustments[0].direction, Direction::Decrease);
        assert_eq!(strong.adjustments[0].magnitude, Magnitude::Strong);
    }

    #[test]
    fn test_korean_feedback() {
        let salty = interpret("너무 짜요");
        assert_eq!(salty.adjustments[0].axis, TasteAxis::Saltiness);
        assert_eq!(salty.adjustments[0].direction, Direction::Decrease);
        assert_eq!(salty.adjustments[0].magnitude, Magnitude::Strong);

        let bland = interpret("조금 싱거워요");
        assert_eq!(bland.adjustments[0].direction, Direction::Increase);
        assert_eq!(bland.adjustments[0].magnitude, Magnitude::Slight);
    }

    #[test]
    fn test_ratings_take_precedence_over_text() {
        let snapshot = FeedbackSnapshot {
            text: "a bit too salty, and way too spicy".to_string(),
            ratings: TasteRatings {
                saltiness: Some(TasteRating::TooMuch),
                spiciness: Some(TasteRating::JustRight),
                sweetness: Some(TasteRating::TooLittle),
                sourness: None,
            },
            ..Default::default()
        };
        let result = FeedbackInterpreter::new().interpret(&snapshot).unwrap();

        let salt = result.adjustment_for(TasteAxis::Saltiness).unwrap();
        assert_eq!(salt.direction, Direction::Decrease);
        assert_eq!(salt.magnitude, Magnitude::Slight);
        assert!(result.adjustment_for(TasteAxis::Spiciness).is_none());
        let sweet = result.adjustment_for(TasteAxis::Sweetness).unwrap();
        assert_eq!(sweet.direction, Direction::Increase);
        assert_eq!(sweet.magnitude, Magnitude::Moderate);
    }

    #[test]
    fn test_text_substitutions() {
        let result = interpret("Replace the butter with olive oil. Make it without cilantro");
        assert_eq!(result.substitutions.len(), 2);
        assert_eq!(result.substitutions[0].ingredient, "butter");
        assert_eq!(result.substitutions[0].replacement.as_deref(), Some("olive oil"));
        assert_eq!(result.substitutions[1].ingredient, "cilantro");
        assert_eq!(result.substitutions[1].replacement, None);

        let instead = interpret("use honey instead of sugar");
        assert_eq!(instead.substitutions[0].ingredient, "sugar");
        assert_eq!(instead.substitutions[0].replacement.as_deref(), Some("honey"));
        assert!(instead.adjustments.is_empty());

        let korean = interpret("버터 대신 올리브유로 해주세요");
        assert_eq!(korean.substitutions[0].ingredient, "버터");
        assert_eq!(korean.substitutions[0].replacement.as_deref(), Some("올리브유"));
    }

    #[test]
    fn test_dairy_free_expands_to_swaps() {
        let result = interpret("I need this dairy-free");
        assert!(result.substitutions.iter().any(|s| s.ingredient == "milk"));
        assert!(result.substitutions.iter().all(|s| s.reason == "dairy-free"));
    }

    #[test]
    fn test_explicit_substitutions_are_kept() {
        let snapshot = FeedbackSnapshot {
            substitutions: vec![SubstitutionRequest {
                ingredient: "pork".to_string(),
                replacement: Some("tofu".to_string()),
            }],
            ..Default::default()
        };
        let result = FeedbackInterpreter::new().interpret(&snapshot).unwrap();
        assert_eq!(result.substitutions[0].replacement.as_deref(), Some("tofu"));
    }

    #[test]
    fn test_case_folding_that_changes_byte_length_splits_cleanly() {
        assert_eq!(
            split_clauses("\u{212A} and too salty"),
            vec!["\u{212A}".to_string(), "too salty".to_string()]
        );
        assert_eq!(split_clauses("İ AND 너무 짜요"), vec!["İ", "너무 짜요"]);

        let result = interpret("\u{212A} and too salty");
        let salt = result.adjustment_for(TasteAxis::Saltiness).unwrap();
        assert_eq!(salt.direction, Direction::Decrease);
        // must not panic whether or not anything is actionable
        let _ = FeedbackInterpreter::new().interpret(&FeedbackSnapshot::from_text("fb-1", "İ and 너무 짜요"));
    }

    #[test]
    fn test_nothing_actionable_is_an_error() {
        let err = FeedbackInterpreter::new()
            .interpret(&FeedbackSnapshot::from_text("fb", "We ate it on Sunday"))
            .unwrap_err();
        assert!(matches!(err, StageError::Interpretation(_)));

        let just_right = FeedbackSnapshot {
            ratings: TasteRatings {
                saltiness: Some(TasteRating::JustRight),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(FeedbackInterpreter::new().interpret(&just_right).is_err());
    }
}
