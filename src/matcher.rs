//! Attribute resolution and value matching
//!
//! Attribute letters in a query (`w`, `l`, `p`, ...) are resolved to an
//! [`Attribute`] once at compile time, and literal/regex/wildcard values to a
//! [`Matcher`]. Evaluation then only compares strings.

use regex::{Regex, RegexBuilder};
use std::fmt::Debug;

/// Token field addressed by an attribute prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Word,
    Lemma,
    Upos,
    Xpos,
    Morph,
    DepRel,
    Governor,
    Index,
    Sequence,
    /// Phrase label of a tree position (word form at leaves)
    Label,
}

impl Attribute {
    /// Resolve a query prefix letter
    pub fn from_letter(letter: char) -> Option<Self> {
        Some(match letter {
            'w' => Attribute::Word,
            'l' => Attribute::Lemma,
            'p' => Attribute::Upos,
            'x' => Attribute::Xpos,
            'm' => Attribute::Morph,
            'f' => Attribute::DepRel,
            'g' => Attribute::Governor,
            'i' => Attribute::Index,
            's' => Attribute::Sequence,
            _ => return None,
        })
    }

    pub fn letter(self) -> Option<char> {
        match self {
            Attribute::Word => Some('w'),
            Attribute::Lemma => Some('l'),
            Attribute::Upos => Some('p'),
            Attribute::Xpos => Some('x'),
            Attribute::Morph => Some('m'),
            Attribute::DepRel => Some('f'),
            Attribute::Governor => Some('g'),
            Attribute::Index => Some('i'),
            Attribute::Sequence => Some('s'),
            Attribute::Label => None,
        }
    }
}

/// Value test applied to one attribute
#[derive(Clone)]
pub enum Matcher {
    Any,
    /// Exact match against any value; values are stored lower-cased when
    /// the comparison is case-insensitive
    Literal {
        values: Vec<String>,
        case_insensitive: bool,
    },
    Regex(Regex),
}

// Manual Debug implementation
impl Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matcher::Any => f.write_str("Any"),
            Matcher::Literal {
                values,
                case_insensitive,
            } => f
                .debug_struct("Literal")
                .field("values", values)
                .field("case_insensitive", case_insensitive)
                .finish(),
            Matcher::Regex(regex) => f.debug_tuple("Regex").field(&regex.as_str()).finish(),
        }
    }
}

// Compare regex sources, not compiled automata
impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Matcher::Any, Matcher::Any) => true,
            (
                Matcher::Literal {
                    values: a,
                    case_insensitive: ca,
                },
                Matcher::Literal {
                    values: b,
                    case_insensitive: cb,
                },
            ) => a == b && ca == cb,
            (Matcher::Regex(a), Matcher::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Matcher {
    pub fn literal(values: Vec<String>, case_insensitive: bool) -> Self {
        let values = if case_insensitive {
            values.into_iter().map(|v| v.to_lowercase()).collect()
        } else {
            values
        };
        Matcher::Literal {
            values,
            case_insensitive,
        }
    }

    pub fn regex(pattern: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Matcher::Regex(regex))
    }

    /// Test a field value. Regexes search anywhere in the value.
    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Literal {
                values,
                case_insensitive: false,
            } => values.iter().any(|v| v == value),
            Matcher::Literal {
                values,
                case_insensitive: true,
            } => {
                let lowered = value.to_lowercase();
                values.iter().any(|v| *v == lowered)
            }
            Matcher::Regex(regex) => regex.is_match(value),
        }
    }
}
