// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Configuration predicates: `key=value`, `key>n`, `key:` and friends.

use std::cmp::Ordering;

use crate::config::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equal,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    /// `key:` is set; `key:value` is set and contains `value`.
    Has,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub key: Key,
    pub op: Op,
    pub value: String,
}

impl Predicate {
    pub fn parse(s: &str) -> Result<Self, String> {
        let Some(pos) = s.find(['=', ':', '>', '<']) else {
            return Err("no operator".to_string());
        };
        let rest = &s[pos..];
        let (op, len) = if rest.starts_with(">=") {
            (Op::GreaterOrEqual, 2)
        } else if rest.starts_with("<=") {
            (Op::LessOrEqual, 2)
        } else if rest.starts_with('>') {
            (Op::Greater, 1)
        } else if rest.starts_with('<') {
            (Op::Less, 1)
        } else if rest.starts_with(':') {
            (Op::Has, 1)
        } else {
            (Op::Equal, 1)
        };

        let key = s[..pos].trim();
        if key.is_empty() {
            return Err("missing key".to_string());
        }
        let key = Key::parse(key).ok_or_else(|| format!("invalid key \"{key}\""))?;

        Ok(Self {
            key,
            op,
            value: s[pos + len..].trim().to_string(),
        })
    }

    /// Test the value stored under `self.key`, if any.
    pub fn test(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self.op {
            Op::Equal => actual == self.value,
            Op::Has => {
                self.value.is_empty()
                    || actual
                        .to_lowercase()
                        .contains(&self.value.to_lowercase())
            }
            Op::Greater => compare(actual, &self.value) == Ordering::Greater,
            Op::Less => compare(actual, &self.value) == Ordering::Less,
            Op::GreaterOrEqual => compare(actual, &self.value) != Ordering::Less,
            Op::LessOrEqual => compare(actual, &self.value) != Ordering::Greater,
        }
    }
}

/// Numeric comparison when both sides are numbers, lexical otherwise.
fn compare(actual: &str, expected: &str) -> Ordering {
    match (actual.trim().parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => actual.cmp(expected),
    }
}
