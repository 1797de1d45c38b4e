// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Shell-style wildcard matching for selector clauses.

use crate::path::{Identifier, ROOT_NAMESPACE};
use crate::selector::Subject;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(char),
    AnyChar,
    Star,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

/// A single compiled wildcard pattern. Matching ignores ASCII case.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, String> {
        let chars: Vec<char> = pattern.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '*' => tokens.push(Token::Star),
                '?' => tokens.push(Token::AnyChar),
                '[' => {
                    let (token, next) = parse_class(&chars, i + 1)
                        .ok_or_else(|| format!("unterminated character class in \"{pattern}\""))?;
                    tokens.push(token);
                    i = next;
                    continue;
                }
                c => tokens.push(Token::Literal(c.to_ascii_lowercase())),
            }
            i += 1;
        }
        Ok(Self { tokens })
    }

    /// Iterative wildcard matching, backtracking to the last `*` on a mismatch.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
        let mut pi = 0;
        let mut ti = 0;
        let mut star_pi = None;
        let mut star_ti = 0;

        while ti < text.len() {
            if pi < self.tokens.len() && single_match(&self.tokens[pi], text[ti]) {
                pi += 1;
                ti += 1;
            } else if pi < self.tokens.len() && self.tokens[pi] == Token::Star {
                star_pi = Some(pi);
                star_ti = ti;
                pi += 1;
            } else if let Some(sp) = star_pi {
                pi = sp + 1;
                star_ti += 1;
                ti = star_ti;
            } else {
                return false;
            }
        }

        while pi < self.tokens.len() && self.tokens[pi] == Token::Star {
            pi += 1;
        }

        pi == self.tokens.len()
    }
}

fn single_match(token: &Token, c: char) -> bool {
    match token {
        Token::Literal(l) => *l == c,
        Token::AnyChar => true,
        Token::Star => false,
        Token::Class { negated, ranges } => {
            let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
            hit != *negated
        }
    }
}

/// Parse a bracket class whose body starts at `start`. Returns the token and the index just past
/// the closing `]`, or None if the class is never closed.
fn parse_class(chars: &[char], start: usize) -> Option<(Token, usize)> {
    let mut i = start;
    let negated = matches!(chars.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }
    let mut ranges = Vec::new();
    let mut first = true;
    loop {
        let c = *chars.get(i)?;
        // A `]` right after the opening bracket is a literal member.
        if c == ']' && !first {
            return Some((Token::Class { negated, ranges }, i + 1));
        }
        first = false;
        let lo = c.to_ascii_lowercase();
        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|c| *c != ']') {
            let hi = chars[i + 2].to_ascii_lowercase();
            ranges.push((lo, hi));
            i += 3;
        } else {
            ranges.push((lo, lo));
            i += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    /// `**`: every object.
    All,
    /// `name`: services of the root namespace.
    Name(Pattern),
    /// `kind/name`: objects of the root namespace.
    KindName(Pattern, Pattern),
    /// `namespace/kind/name`
    Full(Pattern, Pattern, Pattern),
    /// Node names.
    Node(Pattern),
}

/// A glob clause, compiled for the subject it selects.
#[derive(Debug, Clone, PartialEq)]
pub struct Glob {
    shape: Shape,
}

impl Glob {
    pub fn new(pattern: &str, subject: Subject) -> Result<Self, String> {
        if subject == Subject::Nodes {
            return Ok(Self {
                shape: Shape::Node(Pattern::new(pattern)?),
            });
        }
        if pattern == "**" {
            return Ok(Self { shape: Shape::All });
        }
        let segments: Vec<&str> = pattern.split('/').collect();
        let shape = match segments.as_slice() {
            [name] => Shape::Name(Pattern::new(name)?),
            [kind, name] => Shape::KindName(Pattern::new(kind)?, Pattern::new(name)?),
            [namespace, kind, name] => Shape::Full(
                Pattern::new(namespace)?,
                Pattern::new(kind)?,
                Pattern::new(name)?,
            ),
            _ => return Err(format!("too many path segments in \"{pattern}\"")),
        };
        Ok(Self { shape })
    }

    pub fn matches(&self, id: &Identifier) -> bool {
        match &self.shape {
            Shape::All => !id.is_node(),
            Shape::Name(name) => {
                id.namespace() == ROOT_NAMESPACE
                    && id.kind() == crate::path::Kind::Svc
                    && name.matches(id.name())
            }
            Shape::KindName(kind, name) => {
                !id.is_node()
                    && id.namespace() == ROOT_NAMESPACE
                    && kind.matches(id.kind().as_str())
                    && name.matches(id.name())
            }
            Shape::Full(namespace, kind, name) => {
                !id.is_node()
                    && namespace.matches(id.namespace())
                    && kind.matches(id.kind().as_str())
                    && name.matches(id.name())
            }
            Shape::Node(name) => id.is_node() && name.matches(id.name()),
        }
    }
}
