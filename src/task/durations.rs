//! Per-operator execution budgets.
//!
//! Each arithmetic operator carries a configurable synthetic cost. The agent
//! multiplies those costs by the operator counts of an expression to derive
//! the deadline for one evaluation attempt.
//!
//! Durations travel as Go-style strings (`"2s"`, `"150ms"`, `"1m30s"`).
//! An empty string means "not configured".

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The four arithmetic operators that carry a cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Summation,
    Subtraction,
    Multiplication,
    Division,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        Self::Summation,
        Self::Subtraction,
        Self::Multiplication,
        Self::Division,
    ];

    /// The operator character counted in expression text.
    pub fn symbol(&self) -> char {
        match self {
            Self::Summation => '+',
            Self::Subtraction => '-',
            Self::Multiplication => '*',
            Self::Division => '/',
        }
    }
}

/// Singleton configuration record: one synthetic cost per operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDurations {
    #[serde(default, with = "go_duration")]
    pub summation: Option<Duration>,
    #[serde(default, with = "go_duration")]
    pub subtraction: Option<Duration>,
    #[serde(default, with = "go_duration")]
    pub multiplication: Option<Duration>,
    #[serde(default, with = "go_duration")]
    pub division: Option<Duration>,
}

impl OperationDurations {
    /// Same cost for every operator.
    pub fn uniform(cost: Duration) -> Self {
        Self {
            summation: Some(cost),
            subtraction: Some(cost),
            multiplication: Some(cost),
            division: Some(cost),
        }
    }

    pub fn get(&self, kind: OperationKind) -> Option<Duration> {
        match kind {
            OperationKind::Summation => self.summation,
            OperationKind::Subtraction => self.subtraction,
            OperationKind::Multiplication => self.multiplication,
            OperationKind::Division => self.division,
        }
    }

    /// True when no operator has a configured cost.
    pub fn is_unset(&self) -> bool {
        OperationKind::ALL.iter().all(|k| self.get(*k).is_none())
    }

    /// Deadline for one evaluation of `expression`.
    ///
    /// Sum over operators of (occurrences of the symbol in the raw text ×
    /// the operator's cost). Counting is textual, so a unary minus counts as
    /// a subtraction. Unset costs count as zero; the sum saturates.
    pub fn budget_for(&self, expression: &str) -> Duration {
        OperationKind::ALL
            .iter()
            .fold(Duration::ZERO, |total, kind| {
                let cost = self.get(*kind).unwrap_or_default();
                let count = expression.chars().filter(|c| *c == kind.symbol()).count();
                let count = u32::try_from(count).unwrap_or(u32::MAX);
                total.saturating_add(cost.saturating_mul(count))
            })
    }
}

/// Parse a Go-style duration string: a sequence of decimal numbers with unit
/// suffixes (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`). `"0"` is accepted bare.
/// Negative values are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".into());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        return Err(format!("negative duration '{input}'"));
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let (int_part, after) = rest.split_at(int_len);
        let (frac_part, after) = match after.strip_prefix('.') {
            Some(tail) => {
                let len = tail.find(|c: char| !c.is_ascii_digit()).unwrap_or(tail.len());
                tail.split_at(len)
            }
            None => ("", after),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(format!("invalid duration '{input}'"));
        }

        let unit_len = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let (unit, tail) = after.split_at(unit_len);
        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "" => return Err(format!("missing unit in duration '{input}'")),
            other => return Err(format!("unknown unit '{other}' in duration '{input}'")),
        };

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| format!("invalid duration '{input}'"))?
        };
        let mut component = whole
            .checked_mul(scale)
            .ok_or_else(|| format!("duration '{input}' overflows"))?;
        if !frac_part.is_empty() {
            let digits = frac_part.len().min(18);
            let frac: u128 = frac_part[..digits]
                .parse()
                .map_err(|_| format!("invalid duration '{input}'"))?;
            component += frac * scale / 10u128.pow(digits as u32);
        }

        total = total
            .checked_add(component)
            .ok_or_else(|| format!("duration '{input}' overflows"))?;
        rest = tail;
    }

    let nanos = u64::try_from(total).map_err(|_| format!("duration '{input}' overflows"))?;
    Ok(Duration::from_nanos(nanos))
}

/// Render a duration with the largest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    const UNITS: [(&str, u128); 6] = [
        ("h", 3_600_000_000_000),
        ("m", 60_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
        ("ns", 1),
    ];

    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".into();
    }
    for (suffix, scale) in UNITS {
        if nanos % scale == 0 {
            return format!("{}{suffix}", nanos / scale);
        }
    }
    format!("{nanos}ns")
}

/// Serde helper: `Option<Duration>` as a Go-style string, `""` for `None`.
pub(crate) mod go_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_str(&super::format_duration(*d)),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        if raw.trim().is_empty() {
            return Ok(None);
        }
        super::parse_duration(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}
