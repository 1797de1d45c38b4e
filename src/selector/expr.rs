// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Parsing and local evaluation of selector expressions.
//!
//! An expression is a `,`-separated union of terms. A term is a `+`-separated intersection of
//! clauses. A clause prefixed with `!` selects the installed universe minus the clause's positive
//! matches.

use std::collections::HashSet;

use crate::path::Identifier;
use crate::selector::glob::Glob;
use crate::selector::keyop::Predicate;
use crate::selector::{SelectError, Subject, Universe};

#[derive(Debug, Clone, PartialEq)]
enum Matcher {
    Glob(Glob),
    Predicate(Predicate),
    Exact(Identifier),
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    negated: bool,
    matcher: Matcher,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    terms: Vec<Vec<Clause>>,
}

impl Expression {
    pub fn parse(expression: &str, subject: Subject) -> Result<Self, SelectError> {
        let mut terms = Vec::new();
        for term in expression.split(',') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let clauses = term
                .split('+')
                .map(|clause| parse_clause(clause.trim(), subject))
                .collect::<Result<Vec<_>, _>>()?;
            terms.push(clauses);
        }
        Ok(Self { terms })
    }

    /// Evaluate against the `installed` universe. Identifiers come out in first-insertion order
    /// with duplicates dropped.
    pub fn evaluate(
        &self,
        installed: &[Identifier],
        universe: &dyn Universe,
        pinned: bool,
    ) -> Result<Vec<Identifier>, SelectError> {
        let mut selected = Vec::new();
        let mut seen = HashSet::new();

        for term in self.terms.iter() {
            let mut working: Option<Vec<Identifier>> = None;
            for clause in term.iter() {
                let matched = clause.select(installed, universe, pinned)?;
                working = Some(match working {
                    None => matched,
                    Some(working) => {
                        let matched: HashSet<&Identifier> = matched.iter().collect();
                        working
                            .into_iter()
                            .filter(|id| matched.contains(id))
                            .collect()
                    }
                });
            }
            for id in working.unwrap_or_default() {
                if seen.insert(id.clone()) {
                    selected.push(id);
                }
            }
        }

        Ok(selected)
    }
}

fn parse_clause(clause: &str, subject: Subject) -> Result<Clause, SelectError> {
    if clause.is_empty() {
        return Err(SelectError::parse(clause, "empty clause"));
    }
    let (negated, positive) = match clause.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, clause),
    };
    if positive.is_empty() {
        return Err(SelectError::parse(clause, "nothing to negate"));
    }

    let matcher = if positive.contains(['?', '*', '[', ']']) {
        Matcher::Glob(Glob::new(positive, subject).map_err(|e| SelectError::parse(clause, e))?)
    } else if positive.contains(['=', ':', '>', '<']) {
        Matcher::Predicate(Predicate::parse(positive).map_err(|e| SelectError::parse(clause, e))?)
    } else {
        let id = match subject {
            Subject::Objects => Identifier::parse_path(positive),
            Subject::Nodes => Identifier::node(positive),
        };
        Matcher::Exact(id.map_err(|e| SelectError::parse(clause, e.to_string()))?)
    };

    Ok(Clause { negated, matcher })
}

impl Clause {
    fn select(
        &self,
        installed: &[Identifier],
        universe: &dyn Universe,
        pinned: bool,
    ) -> Result<Vec<Identifier>, SelectError> {
        let positive = self.positive(installed, universe, pinned)?;
        if !self.negated {
            return Ok(positive);
        }
        let positive: HashSet<Identifier> = positive.into_iter().collect();
        Ok(installed
            .iter()
            .filter(|id| !positive.contains(*id))
            .cloned()
            .collect())
    }

    fn positive(
        &self,
        installed: &[Identifier],
        universe: &dyn Universe,
        pinned: bool,
    ) -> Result<Vec<Identifier>, SelectError> {
        match &self.matcher {
            Matcher::Glob(glob) => Ok(installed
                .iter()
                .filter(|id| glob.matches(id))
                .cloned()
                .collect()),
            Matcher::Predicate(predicate) => {
                let mut matched = Vec::new();
                for id in installed.iter() {
                    let value = universe.value(id, &predicate.key)?;
                    if predicate.test(value.as_deref()) {
                        matched.push(id.clone());
                    }
                }
                Ok(matched)
            }
            Matcher::Exact(id) => {
                let exists = if pinned {
                    installed.contains(id)
                } else {
                    universe.exists(id)?
                };
                Ok(if exists { vec![id.clone()] } else { Vec::new() })
            }
        }
    }
}
