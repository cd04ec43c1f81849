//! Free-text ingredient amounts.
//!
//! Recognised: integers and decimals ("300", "0.5"), fractions ("1/2"),
//! mixed numbers ("1 1/2"), ranges ("2-3", "2~3"), a numeric prefix followed
//! by a unit ("300g", "2큰술"), and qualitative amounts ("to taste",
//! "pinch", "약간", "적당량").

use std::fmt;

/// Amounts that carry no number but are still valid measurements.
const QUALITATIVE: &[&str] = &[
    "to taste",
    "as needed",
    "pinch",
    "a pinch",
    "dash",
    "a dash",
    "handful",
    "a handful",
    "some",
    "약간",
    "적당량",
    "조금",
    "한꼬집",
    "한 꼬집",
    "소량",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Quantity {
    Exact(f64),
    Range(f64, f64),
    Qualitative(String),
}

/// A parsed amount: the quantity plus any trailing unit text.
#[derive(Debug, Clone, PartialEq)]
pub struct Amount {
    pub quantity: Quantity,
    pub suffix: String,
}

impl Amount {
    /// Upper bound of the numeric value, if any.
    pub fn max_value(&self) -> Option<f64> {
        match self.quantity {
            Quantity::Exact(v) => Some(v),
            Quantity::Range(_, hi) => Some(hi),
            Quantity::Qualitative(_) => None,
        }
    }

    pub fn scaled(&self, factor: f64) -> Amount {
        let quantity = match &self.quantity {
            Quantity::Exact(v) => Quantity::Exact(v * factor),
            Quantity::Range(lo, hi) => Quantity::Range(lo * factor, hi * factor),
            Quantity::Qualitative(q) => Quantity::Qualitative(q.clone()),
        };
        Amount {
            quantity,
            suffix: self.suffix.clone(),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.quantity {
            Quantity::Exact(v) => write!(f, "{}", format_number(*v))?,
            Quantity::Range(lo, hi) => write!(f, "{}-{}", format_number(*lo), format_number(*hi))?,
            Quantity::Qualitative(q) => write!(f, "{}", q)?,
        }
        write!(f, "{}", self.suffix)
    }
}

/// Parse an amount. Returns `None` when it is not a recognisable measurement.
pub fn parse(amount: &str) -> Option<Amount> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if QUALITATIVE.iter().any(|q| lower == *q) {
        return Some(Amount {
            quantity: Quantity::Qualitative(trimmed.to_string()),
            suffix: String::new(),
        });
    }
    // "반" (half) as in "반 컵"
    if let Some(rest) = trimmed.strip_prefix('반') {
        return Some(Amount {
            quantity: Quantity::Exact(0.5),
            suffix: rest.to_string(),
        });
    }

    let numeric_end = trimmed
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | '/' | ' ' | '-' | '~')))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    let number_part = trimmed[..numeric_end].trim_end();
    // Keep the space between number and unit ("2 cups").
    let suffix = &trimmed[number_part.len()..];

    let quantity = parse_number_part(number_part)?;
    Some(Amount {
        quantity,
        suffix: suffix.to_string(),
    })
}

fn parse_number_part(s: &str) -> Option<Quantity> {
    if s.is_empty() {
        return None;
    }
    for sep in ['-', '~'] {
        if let Some((lo, hi)) = s.split_once(sep) {
            let lo = parse_value(lo.trim())?;
            let hi = parse_value(hi.trim())?;
            return (lo <= hi).then_some(Quantity::Range(lo, hi));
        }
    }
    parse_value(s).map(Quantity::Exact)
}

/// "3", "0.5", "1/2", "1 1/2"
fn parse_value(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some((whole, frac)) = s.split_once(' ') {
        let whole: f64 = whole.trim().parse().ok()?;
        return Some(whole + parse_fraction(frac.trim())?);
    }
    if s.contains('/') {
        return parse_fraction(s);
    }
    let v: f64 = s.parse().ok()?;
    (v.is_finite() && v >= 0.0).then_some(v)
}

fn parse_fraction(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    (den > 0.0).then(|| num / den)
}

/// Render a number the way a recipe would: common fractions where close,
/// otherwise at most two decimals.
pub fn format_number(value: f64) -> String {
    const FRACTIONS: &[(f64, &str)] = &[
        (0.25, "1/4"),
        (1.0 / 3.0, "1/3"),
        (0.5, "1/2"),
        (2.0 / 3.0, "2/3"),
        (0.75, "3/4"),
    ];
    let whole = value.trunc();
    let frac = value - whole;
    if frac.abs() < 0.01 {
        return format!("{}", whole as i64);
    }
    if whole < 10.0 {
        if let Some((_, label)) = FRACTIONS.iter().find(|(f, _)| (frac - f).abs() < 0.02) {
            return if whole == 0.0 {
                label.to_string()
            } else {
                format!("{} {}", whole as i64, label)
            };
        }
    }
    let rounded = format!("{:.2}", value);
    rounded.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Scale an amount string. Qualitative or unparseable amounts come back
/// unchanged.
pub fn scale(amount: &str, factor: f64) -> String {
    match parse(amount) {
        Some(parsed) if parsed.max_value().is_some() => parsed.scaled(factor).to_string(),
        _ => amount.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_common_forms() {
        assert_eq!(parse("300").unwrap().quantity, Quantity::Exact(300.0));
        assert_eq!(parse("0.5").unwrap().quantity, Quantity::Exact(0.5));
        assert_eq!(parse("1/2").unwrap().quantity, Quantity::Exact(0.5));
        assert_eq!(parse("1 1/2").unwrap().quantity, Quantity::Exact(1.5));
        assert_eq!(parse("2-3").unwrap().quantity, Quantity::Range(2.0, 3.0));
        assert_eq!(parse("2~3").unwrap().quantity, Quantity::Range(2.0, 3.0));
    }

    #[test]
    fn test_parses_units_and_qualitative() {
        let grams = parse("300g").unwrap();
        assert_eq!(grams.quantity, Quantity::Exact(300.0));
        assert_eq!(grams.suffix, "g");

        let spoons = parse("2큰술").unwrap();
        assert_eq!(spoons.quantity, Quantity::Exact(2.0));
        assert_eq!(spoons.suffix, "큰술");

        assert!(matches!(parse("to taste").unwrap().quantity, Quantity::Qualitative(_)));
        assert!(matches!(parse("약간").unwrap().quantity, Quantity::Qualitative(_)));
        assert!(matches!(parse("Pinch").unwrap().quantity, Quantity::Qualitative(_)));
        assert_eq!(parse("반 컵").unwrap().quantity, Quantity::Exact(0.5));
    }

    #[test]
    fn test_rejects_non_measurements() {
        assert!(parse("").is_none());
        assert!(parse("lots and lots").is_none());
        assert!(parse("3-1").is_none());
        assert!(parse("1/0").is_none());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(2.0), "2");
        assert_eq!(format_number(0.5), "1/2");
        assert_eq!(format_number(1.5), "1 1/2");
        assert_eq!(format_number(0.3333), "1/3");
        assert_eq!(format_number(1.4), "1.4");
        assert_eq!(format_number(150.0), "150");
    }

    #[test]
    fn test_scale() {
        assert_eq!(scale("2", 0.5), "1");
        assert_eq!(scale("1", 0.5), "1/2");
        assert_eq!(scale("300g", 0.7), "210g");
        assert_eq!(scale("2-3", 2.0), "4-6");
        assert_eq!(scale("to taste", 0.5), "to taste");
    }
}
