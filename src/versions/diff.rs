//! Field-level diff between two recipe states.
//!
//! Lists are compared by position. Entries present in both states produce one
//! `modified` record per differing field; extra trailing entries produce a
//! single `added` or `removed` record carrying the whole entry.

use serde_json::Value;
use thiserror::Error;

use crate::models::{ChangeRecord, ChangeType, Ingredient, RecipeContent, Step};

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("Invalid field path: {0}")]
    InvalidPath(String),
    #[error("Change at {path} does not fit the base recipe: {reason}")]
    Mismatch { path: String, reason: String },
    #[error("Invalid value at {path}: {source}")]
    Value {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

const INGREDIENTS: &str = "ingredients";
const STEPS: &str = "steps";

/// Compute change records turning `base` into `target`.
///
/// Record ids are derived from `variation_id` and position, so the same
/// inputs always yield identical output.
pub fn diff(base: &RecipeContent, target: &RecipeContent, variation_id: &str) -> Vec<ChangeRecord> {
    let mut out = DiffBuilder::new(variation_id);

    diff_list(&mut out, INGREDIENTS, &base.ingredients, &target.ingredients, ingredient_fields);
    diff_list(&mut out, STEPS, &base.steps, &target.steps, step_fields);

    out.records
}

struct DiffBuilder<'a> {
    variation_id: &'a str,
    records: Vec<ChangeRecord>,
}

impl<'a> DiffBuilder<'a> {
    fn new(variation_id: &'a str) -> Self {
        Self {
            variation_id,
            records: Vec::new(),
        }
    }

    fn push(
        &mut self,
        field_path: String,
        before_value: Option<Value>,
        after_value: Option<Value>,
        change_type: ChangeType,
    ) {
        let position = self.records.len();
        self.records.push(ChangeRecord {
            id: format!("{}:{}", self.variation_id, position),
            variation_id: self.variation_id.to_string(),
            field_path,
            before_value,
            after_value,
            change_type,
        });
    }
}

fn diff_list<T: serde::Serialize>(
    out: &mut DiffBuilder<'_>,
    section: &str,
    base: &[T],
    target: &[T],
    fields: fn(&T) -> Vec<(&'static str, Value)>,
) {
    let shared = base.len().min(target.len());
    for i in 0..shared {
        let before = fields(&base[i]);
        let after = fields(&target[i]);
        for ((name, b), (_, a)) in before.into_iter().zip(after) {
            if b != a {
                out.push(
                    format!("{}[{}].{}", section, i, name),
                    Some(b),
                    Some(a),
                    ChangeType::Modified,
                );
            }
        }
    }
    for (i, item) in target.iter().enumerate().skip(shared) {
        out.push(
            format!("{}[{}]", section, i),
            None,
            Some(serde_json::to_value(item).unwrap_or(Value::Null)),
            ChangeType::Added,
        );
    }
    for (i, item) in base.iter().enumerate().skip(shared) {
        out.push(
            format!("{}[{}]", section, i),
            Some(serde_json::to_value(item).unwrap_or(Value::Null)),
            None,
            ChangeType::Removed,
        );
    }
}

fn opt_str(v: &Option<String>) -> Value {
    v.as_ref().map(|s| Value::String(s.clone())).unwrap_or(Value::Null)
}

fn ingredient_fields(i: &Ingredient) -> Vec<(&'static str, Value)> {
    vec![
        ("name", Value::String(i.name.clone())),
        ("amount", opt_str(&i.amount)),
        ("unit", opt_str(&i.unit)),
        ("note", opt_str(&i.note)),
    ]
}

fn step_fields(s: &Step) -> Vec<(&'static str, Value)> {
    vec![
        ("description", Value::String(s.description.clone())),
        (
            "duration_seconds",
            s.duration_seconds.map(Value::from).unwrap_or(Value::Null),
        ),
        ("tip", opt_str(&s.tip)),
    ]
}

/// Parsed form of a field path like `steps[3].tip`.
#[derive(Debug, PartialEq, Eq)]
struct FieldPath<'a> {
    section: &'a str,
    index: usize,
    field: Option<&'a str>,
}

fn parse_path(path: &str) -> Result<FieldPath<'_>, DiffError> {
    let invalid = || DiffError::InvalidPath(path.to_string());

    let (section, rest) = path.split_once('[').ok_or_else(invalid)?;
    let (index, rest) = rest.split_once(']').ok_or_else(invalid)?;
    let index: usize = index.parse().map_err(|_| invalid())?;
    let field = match rest {
        "" => None,
        _ => Some(rest.strip_prefix('.').ok_or_else(invalid)?),
    };
    if section != INGREDIENTS && section != STEPS {
        return Err(invalid());
    }
    Ok(FieldPath {
        section,
        index,
        field,
    })
}

/// Apply change records to `base`, reconstructing the diffed target.
pub fn apply(base: &RecipeContent, changes: &[ChangeRecord]) -> Result<RecipeContent, DiffError> {
    let mut result = base.clone();

    let mut parsed = Vec::with_capacity(changes.len());
    for change in changes {
        parsed.push((parse_path(&change.field_path)?, change));
    }

    // Removals are always trailing; truncate at the lowest removed index.
    for section in [INGREDIENTS, STEPS] {
        let cut = parsed
            .iter()
            .filter(|(p, c)| p.section == section && c.change_type == ChangeType::Removed)
            .map(|(p, _)| p.index)
            .min();
        if let Some(cut) = cut {
            match section {
                INGREDIENTS => result.ingredients.truncate(cut),
                _ => result.steps.truncate(cut),
            }
        }
    }

    for (path, change) in parsed.iter().filter(|(_, c)| c.change_type == ChangeType::Modified) {
        let field = path.field.ok_or_else(|| DiffError::InvalidPath(change.field_path.clone()))?;
        let value = change.after_value.clone().unwrap_or(Value::Null);
        if path.section == INGREDIENTS {
            let item = result.ingredients.get_mut(path.index).ok_or_else(|| mismatch(change, "index out of range"))?;
            set_ingredient_field(item, field, value, change)?;
        } else {
            let item = result.steps.get_mut(path.index).ok_or_else(|| mismatch(change, "index out of range"))?;
            set_step_field(item, field, value, change)?;
        }
    }

    let mut added: Vec<_> = parsed
        .iter()
        .filter(|(_, c)| c.change_type == ChangeType::Added)
        .collect();
    added.sort_by_key(|(p, _)| (p.section, p.index));
    for (path, change) in added {
        let value = change
            .after_value
            .clone()
            .ok_or_else(|| mismatch(change, "added entry has no value"))?;
        if path.section == INGREDIENTS {
            if path.index != result.ingredients.len() {
                return Err(mismatch(change, "added entries must be contiguous"));
            }
            result.ingredients.push(from_value(value, change)?);
        } else {
            if path.index != result.steps.len() {
                return Err(mismatch(change, "added entries must be contiguous"));
            }
            result.steps.push(from_value(value, change)?);
        }
    }

    Ok(result)
}

fn mismatch(change: &ChangeRecord, reason: &str) -> DiffError {
    DiffError::Mismatch {
        path: change.field_path.clone(),
        reason: reason.to_string(),
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value, change: &ChangeRecord) -> Result<T, DiffError> {
    serde_json::from_value(value).map_err(|source| DiffError::Value {
        path: change.field_path.clone(),
        source,
    })
}

fn set_ingredient_field(
    item: &mut Ingredient,
    field: &str,
    value: Value,
    change: &ChangeRecord,
) -> Result<(), DiffError> {
    match field {
        "name" => item.name = from_value(value, change)?,
        "amount" => item.amount = from_value(value, change)?,
        "unit" => item.unit = from_value(value, change)?,
        "note" => item.note = from_value(value, change)?,
        _ => return Err(DiffError::InvalidPath(change.field_path.clone())),
    }
    Ok(())
}

fn set_step_field(item: &mut Step, field: &str, value: Value, change: &ChangeRecord) -> Result<(), DiffError> {
    match field {
        "description" => item.description = from_value(value, change)?,
        "duration_seconds" => item.duration_seconds = from_value(value, change)?,
        "tip" => item.tip = from_value(value, change)?,
        _ => return Err(DiffError::InvalidPath(change.field_path.clone())),
    }
    Ok(())
}
