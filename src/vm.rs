//! Predicate evaluator
//!
//! Interprets a compiled [`Program`] against a navigation context. The only
//! mutable state is the label table, which is reset for every top-level
//! alternative and rolled back whenever a candidate fails.

use thiserror::Error;

use crate::compiler::{Predicate, Program};
use crate::constituency::TreeSyntaxError;
use crate::matcher::{Attribute, Matcher};

/// Per-row evaluation failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("Governor cycle through token {index}")]
    CycleDetected { index: usize },

    #[error("Token {index} has malformed governor {raw:?}")]
    MalformedGovernor { index: usize, raw: String },

    #[error("Token {index} refers to missing governor {governor}")]
    DanglingGovernor { index: usize, governor: usize },

    #[error("Label ={label} is used before it is bound")]
    UnboundLabel { label: String },

    #[error(transparent)]
    Tree(#[from] TreeSyntaxError),

    #[error("Tree has {leaves} leaves but the sentence has {tokens} tokens")]
    LeafMismatch { leaves: usize, tokens: usize },
}

/// Graph access needed by the evaluator
///
/// Nodes are addressed by position: token position for dependency graphs,
/// pre-order position for phrase-structure trees.
pub trait Navigator {
    type Relation;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn attribute_matches(&self, node: usize, attribute: Attribute, matcher: &Matcher) -> bool;

    /// Candidate nodes B for `node R B`, in a stable order
    fn related(&self, node: usize, relation: &Self::Relation) -> Result<Vec<usize>, EvalError>;
}

/// Conjuncts still to be proven after the current predicate
enum Continuation<'c, R> {
    Done,
    /// `parts` at `node`, then `rest`
    All {
        parts: &'c [Predicate<R>],
        node: usize,
        rest: &'c Continuation<'c, R>,
    },
}

/// Evaluator for one navigation context
pub struct VM<'a, N: Navigator> {
    nav: &'a N,
    program: &'a Program<N::Relation>,
    labels: Vec<Option<usize>>,
}

impl<'a, N: Navigator> VM<'a, N> {
    pub fn new(nav: &'a N, program: &'a Program<N::Relation>) -> Self {
        Self {
            nav,
            program,
            labels: vec![None; program.labels.len()],
        }
    }

    /// Does any top-level alternative match at `node`?
    pub fn matches(&mut self, node: usize) -> Result<bool, EvalError> {
        let program = self.program;
        for pattern in &program.patterns {
            self.labels.iter_mut().for_each(|slot| *slot = None);
            if self.eval(pattern, node, &Continuation::Done)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Label bindings left by the last successful match
    pub fn bindings(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.program
            .labels
            .iter()
            .zip(&self.labels)
            .filter_map(|(name, bound)| bound.map(|node| (name.as_str(), node)))
    }

    fn bound(&self, slot: usize) -> Result<usize, EvalError> {
        self.labels
            .get(slot)
            .copied()
            .flatten()
            .ok_or_else(|| EvalError::UnboundLabel {
                label: self.program.labels.get(slot).cloned().unwrap_or_default(),
            })
    }

    /// Evaluate `predicate` at `node`, then `rest`
    ///
    /// Every choice point (relation candidates, disjuncts) runs the rest of
    /// the enclosing conjunction under its own bindings, so a label bound
    /// inside a relation target is retried with the next candidate when a
    /// later conjunct or segment fails.
    fn eval(
        &mut self,
        predicate: &Predicate<N::Relation>,
        node: usize,
        rest: &Continuation<'_, N::Relation>,
    ) -> Result<bool, EvalError> {
        match predicate {
            Predicate::True => self.resume(rest),

            Predicate::Attribute { attribute, matcher } => {
                if self.nav.attribute_matches(node, *attribute, matcher) {
                    self.resume(rest)
                } else {
                    Ok(false)
                }
            }

            Predicate::And(parts) => self.eval_all(parts, node, rest),

            Predicate::Or(parts) => {
                for part in parts {
                    let saved = self.labels.clone();
                    if self.eval(part, node, rest)? {
                        return Ok(true);
                    }
                    self.labels = saved;
                }
                Ok(false)
            }

            // Bindings made under a negation never escape it
            Predicate::Not(inner) => {
                let saved = self.labels.clone();
                let result = self.eval(inner, node, &Continuation::Done)?;
                self.labels = saved;
                if result { Ok(false) } else { self.resume(rest) }
            }

            // Bound before the inner test so the node's own relations can refer to it
            Predicate::Bind { slot, inner } => {
                let previous = self.labels.get(*slot).copied().flatten();
                self.set_label(*slot, Some(node));
                if self.eval(inner, node, rest)? {
                    Ok(true)
                } else {
                    self.set_label(*slot, previous);
                    Ok(false)
                }
            }

            Predicate::SameAs { slot } => {
                if self.bound(*slot)? == node {
                    self.resume(rest)
                } else {
                    Ok(false)
                }
            }

            Predicate::AtLabel { slot, inner } => {
                let target = self.bound(*slot)?;
                self.eval(inner, target, rest)
            }

            Predicate::Relation { relation, target } => {
                let candidates = self.nav.related(node, relation)?;
                for candidate in candidates {
                    let saved = self.labels.clone();
                    if self.eval(target, candidate, rest)? {
                        return Ok(true);
                    }
                    self.labels = saved;
                }
                Ok(false)
            }
        }
    }

    fn eval_all(
        &mut self,
        parts: &[Predicate<N::Relation>],
        node: usize,
        rest: &Continuation<'_, N::Relation>,
    ) -> Result<bool, EvalError> {
        match parts.split_first() {
            None => self.resume(rest),
            Some((first, others)) => {
                let next = Continuation::All {
                    parts: others,
                    node,
                    rest,
                };
                self.eval(first, node, &next)
            }
        }
    }

    fn resume(&mut self, rest: &Continuation<'_, N::Relation>) -> Result<bool, EvalError> {
        match rest {
            Continuation::Done => Ok(true),
            Continuation::All { parts, node, rest } => self.eval_all(parts, *node, rest),
        }
    }

    fn set_label(&mut self, slot: usize, value: Option<usize>) {
        if let Some(entry) = self.labels.get_mut(slot) {
            *entry = value;
        }
    }
}
