//! Dependency graph navigation
//!
//! [`DepGraph`] indexes one sentence's governor links so the evaluator can
//! walk them in both directions. Nodes are token positions within the
//! sentence. Malformed governor fields are kept as they are and only
//! reported when a walk actually goes through them.

use rustc_hash::FxHashMap;

use crate::compiler::Dialect;
use crate::matcher::{Attribute, Matcher};
use crate::tree::{Governor, Sentence, Token};
use crate::vm::{EvalError, Navigator};

/// depgrep relation operators (`A op B`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepRelation {
    /// `->`: B is a dependent of A
    Dependent,
    /// `<-`: B is A's governor
    Governor,
    /// `->>`
    Descendant,
    /// `<<-`
    Ancestor,
    /// `->:`: B is A's only dependent
    SoleDependent,
    /// `<-:`: A is the only dependent of B
    SoleGovernor,
    /// `->N`: B is A's Nth dependent
    NthDependent(isize),
    /// `<-N`: A is B's Nth dependent
    NthGovernor(isize),
    /// `+`: B is the next token
    Next,
    /// `-`: B is the previous token
    Previous,
    /// `<|`: B is anywhere before A
    Before,
    /// `|>`: B is anywhere after A
    After,
    /// `.N`: B is exactly N tokens to the right, or anywhere right without N
    Right(Option<usize>),
    /// `,N`
    Left(Option<usize>),
    /// `$` or `%`: B shares A's governor
    Sister,
}

impl Dialect for DepRelation {
    const NAME: &'static str = "dependency";
    const DEFAULT_ATTRIBUTE: Attribute = Attribute::Word;

    fn parse_operator(text: &str) -> Option<Self> {
        Some(match text {
            "->" => DepRelation::Dependent,
            "<-" => DepRelation::Governor,
            "->>" => DepRelation::Descendant,
            "<<-" => DepRelation::Ancestor,
            "->:" => DepRelation::SoleDependent,
            "<-:" => DepRelation::SoleGovernor,
            "+" => DepRelation::Next,
            "-" => DepRelation::Previous,
            "<|" => DepRelation::Before,
            "|>" => DepRelation::After,
            "." => DepRelation::Right(None),
            "," => DepRelation::Left(None),
            "$" | "%" => DepRelation::Sister,
            _ => {
                if let Some(n) = text.strip_prefix("->") {
                    DepRelation::NthDependent(parse_ordinal(n)?)
                } else if let Some(n) = text.strip_prefix("<-") {
                    DepRelation::NthGovernor(parse_ordinal(n)?)
                } else if let Some(n) = text.strip_prefix('.') {
                    DepRelation::Right(Some(parse_distance(n)?))
                } else if let Some(n) = text.strip_prefix(',') {
                    DepRelation::Left(Some(parse_distance(n)?))
                } else {
                    return None;
                }
            }
        })
    }
}

/// Non-zero, possibly negative, 1-based ordinal
fn parse_ordinal(text: &str) -> Option<isize> {
    text.parse::<isize>().ok().filter(|&n| n != 0)
}

/// Positive token distance
fn parse_distance(text: &str) -> Option<usize> {
    text.parse::<usize>().ok().filter(|&n| n != 0)
}

/// Pick the `n`th element, 1-based, negative counting from the end
fn nth<T: Copy>(items: &[T], n: isize) -> Option<T> {
    let index = if n > 0 {
        n.unsigned_abs() - 1
    } else {
        items.len().checked_sub(n.unsigned_abs())?
    };
    items.get(index).copied()
}

/// Governor links of one sentence
#[derive(Debug)]
pub struct DepGraph<'a> {
    tokens: &'a [Token],
    /// Sentence-local index to position
    positions: FxHashMap<usize, usize>,
    /// Dependents of each position, in sentence order
    dependents: Vec<Vec<usize>>,
    /// Tokens attached to the root
    roots: Vec<usize>,
}

impl<'a> DepGraph<'a> {
    pub fn build(sentence: &'a Sentence) -> Self {
        let tokens = sentence.tokens();
        let positions: FxHashMap<usize, usize> = tokens
            .iter()
            .enumerate()
            .map(|(position, token)| (token.index, position))
            .collect();

        let mut dependents = vec![Vec::new(); tokens.len()];
        let mut roots = Vec::new();
        for (position, token) in tokens.iter().enumerate() {
            match &token.head {
                Governor::Root => roots.push(position),
                Governor::Index(index) => {
                    if let Some(&head) = positions.get(index) {
                        dependents[head].push(position);
                    }
                }
                Governor::Invalid(_) => {}
            }
        }

        Self {
            tokens,
            positions,
            dependents,
            roots,
        }
    }

    /// Position of the node's governor, `None` at the root
    pub fn governor(&self, node: usize) -> Result<Option<usize>, EvalError> {
        let Some(token) = self.tokens.get(node) else {
            return Ok(None);
        };
        match &token.head {
            Governor::Root => Ok(None),
            Governor::Index(index) => match self.positions.get(index) {
                Some(&head) => Ok(Some(head)),
                None => Err(EvalError::DanglingGovernor {
                    index: token.index,
                    governor: *index,
                }),
            },
            Governor::Invalid(raw) => Err(EvalError::MalformedGovernor {
                index: token.index,
                raw: raw.clone(),
            }),
        }
    }

    pub fn dependents(&self, node: usize) -> &[usize] {
        self.dependents.get(node).map(Vec::as_slice).unwrap_or_default()
    }

    /// Governor chain up to the root, nearest first
    pub fn ancestors(&self, node: usize) -> Result<Vec<usize>, EvalError> {
        let mut seen = vec![false; self.tokens.len()];
        let mut chain = Vec::new();
        let mut current = node;
        seen[node] = true;

        while let Some(head) = self.governor(current)? {
            if seen[head] {
                return Err(self.cycle_at(head));
            }
            seen[head] = true;
            chain.push(head);
            current = head;
        }
        Ok(chain)
    }

    /// Transitive dependents in depth-first pre-order
    pub fn descendants(&self, node: usize) -> Result<Vec<usize>, EvalError> {
        let mut seen = vec![false; self.tokens.len()];
        let mut result = Vec::new();
        let mut stack: Vec<usize> = self.dependents(node).iter().rev().copied().collect();
        seen[node] = true;

        while let Some(current) = stack.pop() {
            if seen[current] {
                return Err(self.cycle_at(current));
            }
            seen[current] = true;
            result.push(current);
            stack.extend(self.dependents(current).iter().rev());
        }
        Ok(result)
    }

    /// Other tokens with the same governor; root tokens are sisters of each other
    pub fn sisters(&self, node: usize) -> Result<Vec<usize>, EvalError> {
        let siblings = match self.governor(node)? {
            Some(head) => self.dependents(head),
            None => self.roots.as_slice(),
        };
        Ok(siblings.iter().copied().filter(|&s| s != node).collect())
    }

    pub fn nth_dependent(&self, node: usize, n: isize) -> Option<usize> {
        nth(self.dependents(node), n)
    }

    /// The governor of `node` if `node` is its `n`th dependent
    pub fn nth_governor(&self, node: usize, n: isize) -> Result<Option<usize>, EvalError> {
        Ok(self
            .governor(node)?
            .filter(|&head| self.nth_dependent(head, n) == Some(node)))
    }

    /// The next token in the sentence
    pub fn immediately_follows(&self, node: usize) -> Option<usize> {
        let next = node.checked_add(1)?;
        (next < self.tokens.len()).then_some(next)
    }

    /// The previous token in the sentence
    pub fn immediately_precedes(&self, node: usize) -> Option<usize> {
        node.checked_sub(1).filter(|&previous| previous < self.tokens.len())
    }

    /// Tokens `k` positions to the left, or all tokens before without `k`
    pub fn preceding(&self, node: usize, k: Option<usize>) -> Vec<usize> {
        match k {
            Some(k) => node.checked_sub(k).into_iter().collect(),
            None => (0..node).collect(),
        }
    }

    /// Tokens `k` positions to the right, or all tokens after without `k`
    pub fn following(&self, node: usize, k: Option<usize>) -> Vec<usize> {
        let len = self.tokens.len();
        match k {
            Some(k) => node
                .checked_add(k)
                .filter(|&position| position < len)
                .into_iter()
                .collect(),
            None => (node + 1..len).collect(),
        }
    }

    fn cycle_at(&self, node: usize) -> EvalError {
        EvalError::CycleDetected {
            index: self.tokens.get(node).map(|t| t.index).unwrap_or(node),
        }
    }
}

impl Navigator for DepGraph<'_> {
    type Relation = DepRelation;

    fn len(&self) -> usize {
        self.tokens.len()
    }

    fn attribute_matches(&self, node: usize, attribute: Attribute, matcher: &Matcher) -> bool {
        self.tokens
            .get(node)
            .is_some_and(|token| matcher.is_match(&token.attribute(attribute)))
    }

    fn related(&self, node: usize, relation: &DepRelation) -> Result<Vec<usize>, EvalError> {
        Ok(match *relation {
            DepRelation::Dependent => self.dependents(node).to_vec(),
            DepRelation::Governor => self.governor(node)?.into_iter().collect(),
            DepRelation::Descendant => self.descendants(node)?,
            DepRelation::Ancestor => self.ancestors(node)?,
            DepRelation::SoleDependent => match self.dependents(node) {
                [only] => vec![*only],
                _ => Vec::new(),
            },
            DepRelation::SoleGovernor => self
                .governor(node)?
                .filter(|&head| self.dependents(head) == [node])
                .into_iter()
                .collect(),
            DepRelation::NthDependent(n) => self.nth_dependent(node, n).into_iter().collect(),
            DepRelation::NthGovernor(n) => self.nth_governor(node, n)?.into_iter().collect(),
            DepRelation::Next => self.immediately_follows(node).into_iter().collect(),
            DepRelation::Previous => self.immediately_precedes(node).into_iter().collect(),
            DepRelation::Before => self.preceding(node, None),
            DepRelation::After => self.following(node, None),
            DepRelation::Right(k) => self.following(node, k),
            DepRelation::Left(k) => self.preceding(node, k),
            DepRelation::Sister => self.sisters(node)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::fixtures;

    #[test]
    fn test_parse_operators() {
        assert_eq!(DepRelation::parse_operator("->"), Some(DepRelation::Dependent));
        assert_eq!(DepRelation::parse_operator("%"), Some(DepRelation::Sister));
        assert_eq!(DepRelation::parse_operator("$"), Some(DepRelation::Sister));
        assert_eq!(
            DepRelation::parse_operator("->2"),
            Some(DepRelation::NthDependent(2))
        );
        assert_eq!(
            DepRelation::parse_operator("->-1"),
            Some(DepRelation::NthDependent(-1))
        );
        assert_eq!(
            DepRelation::parse_operator("<-3"),
            Some(DepRelation::NthGovernor(3))
        );
        assert_eq!(DepRelation::parse_operator(".2"), Some(DepRelation::Right(Some(2))));
        assert_eq!(DepRelation::parse_operator(","), Some(DepRelation::Left(None)));
        assert_eq!(DepRelation::parse_operator("->0"), None);
        assert_eq!(DepRelation::parse_operator(".-1"), None);
        assert_eq!(DepRelation::parse_operator("<<"), None);
        assert_eq!(DepRelation::parse_operator("$."), None);
    }

    #[test]
    fn test_nth() {
        let items = [10, 20, 30];
        assert_eq!(nth(&items, 1), Some(10));
        assert_eq!(nth(&items, 3), Some(30));
        assert_eq!(nth(&items, 4), None);
        assert_eq!(nth(&items, -1), Some(30));
        assert_eq!(nth(&items, -3), Some(10));
        assert_eq!(nth(&items, -4), None);
    }

    #[test]
    fn test_governor_and_dependents() {
        let sentence = fixtures::the_dog_barks();
        let graph = DepGraph::build(&sentence);

        assert_eq!(graph.governor(0).unwrap(), Some(1));
        assert_eq!(graph.governor(2).unwrap(), None);
        assert_eq!(graph.dependents(2), &[1, 3]);
        assert_eq!(graph.dependents(1), &[0]);
        assert!(graph.dependents(0).is_empty());
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let sentence = fixtures::two_clauses();
        let graph = DepGraph::build(&sentence);

        assert_eq!(graph.ancestors(6).unwrap(), vec![5, 1]);
        assert_eq!(graph.ancestors(1).unwrap(), Vec::<usize>::new());
        assert_eq!(graph.descendants(1).unwrap(), vec![0, 2, 5, 3, 4, 6, 7]);
        assert_eq!(graph.descendants(5).unwrap(), vec![3, 4, 6]);
    }

    #[test]
    fn test_cycle_detection() {
        let sentence = fixtures::sentence(
            "cyc",
            &[
                ("a", "a", "X", "3", "dep"),
                ("b", "b", "X", "1", "dep"),
                ("c", "c", "X", "2", "dep"),
            ],
        );
        let graph = DepGraph::build(&sentence);

        assert!(matches!(
            graph.ancestors(0),
            Err(EvalError::CycleDetected { .. })
        ));
        assert!(matches!(
            graph.descendants(1),
            Err(EvalError::CycleDetected { .. })
        ));
        // One step is still fine
        assert_eq!(graph.governor(0).unwrap(), Some(2));
    }

    #[test]
    fn test_malformed_and_dangling_governors() {
        let sentence = fixtures::sentence(
            "bad",
            &[
                ("a", "a", "X", "oops", "dep"),
                ("b", "b", "X", "9", "dep"),
                ("c", "c", "X", "0", "root"),
            ],
        );
        let graph = DepGraph::build(&sentence);

        assert_eq!(
            graph.governor(0),
            Err(EvalError::MalformedGovernor {
                index: 1,
                raw: "oops".to_string()
            })
        );
        assert_eq!(
            graph.governor(1),
            Err(EvalError::DanglingGovernor {
                index: 2,
                governor: 9
            })
        );
        // Navigation that never touches the broken heads still works
        assert_eq!(graph.descendants(2).unwrap(), Vec::<usize>::new());
        assert_eq!(graph.sisters(2).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_sisters() {
        let sentence = fixtures::the_dog_barks();
        let graph = DepGraph::build(&sentence);

        assert_eq!(graph.sisters(1).unwrap(), vec![3]);
        assert_eq!(graph.sisters(3).unwrap(), vec![1]);
        assert_eq!(graph.sisters(0).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_ordinal_dependents() {
        let sentence = fixtures::two_clauses();
        let graph = DepGraph::build(&sentence);

        assert_eq!(graph.nth_dependent(1, 1), Some(0));
        assert_eq!(graph.nth_dependent(1, -1), Some(7));
        assert_eq!(graph.nth_dependent(1, 9), None);
        assert_eq!(graph.nth_governor(2, 2).unwrap(), Some(1));
        assert_eq!(graph.nth_governor(2, 1).unwrap(), None);
    }

    #[test]
    fn test_sole_relations() {
        let sentence = fixtures::the_dog_barks();
        let graph = DepGraph::build(&sentence);

        assert_eq!(graph.related(1, &DepRelation::SoleDependent).unwrap(), vec![0]);
        assert!(graph.related(2, &DepRelation::SoleDependent).unwrap().is_empty());
        assert_eq!(graph.related(0, &DepRelation::SoleGovernor).unwrap(), vec![1]);
        assert!(graph.related(1, &DepRelation::SoleGovernor).unwrap().is_empty());
    }

    #[test]
    fn test_linear_order() {
        let sentence = fixtures::the_dog_barks();
        let graph = DepGraph::build(&sentence);

        assert_eq!(graph.immediately_follows(1), Some(2));
        assert_eq!(graph.immediately_precedes(1), Some(0));
        assert_eq!(graph.immediately_precedes(0), None);
        assert_eq!(graph.immediately_follows(3), None);

        assert_eq!(graph.preceding(2, None), vec![0, 1]);
        assert_eq!(graph.preceding(2, Some(2)), vec![0]);
        assert_eq!(graph.preceding(1, Some(2)), Vec::<usize>::new());
        assert_eq!(graph.following(1, None), vec![2, 3]);
        assert_eq!(graph.following(1, Some(2)), vec![3]);
        assert_eq!(graph.following(2, Some(2)), Vec::<usize>::new());
    }

    #[test]
    fn test_adjacency_ignores_sequence_numbers() {
        let mut sentence = fixtures::the_dog_barks();
        for token in &mut sentence.tokens {
            token.seq = 0;
        }
        let graph = DepGraph::build(&sentence);

        assert_eq!(graph.related(0, &DepRelation::Next).unwrap(), vec![1]);
        assert_eq!(graph.related(3, &DepRelation::Previous).unwrap(), vec![2]);
        assert!(graph.related(3, &DepRelation::Next).unwrap().is_empty());
        assert!(graph.related(0, &DepRelation::Previous).unwrap().is_empty());
    }

    #[test]
    fn test_attribute_matches() {
        let sentence = fixtures::the_dog_barks();
        let graph = DepGraph::build(&sentence);
        let matcher = Matcher::literal(vec!["nsubj".into()], false);

        assert!(graph.attribute_matches(1, Attribute::DepRel, &matcher));
        assert!(!graph.attribute_matches(0, Attribute::DepRel, &matcher));
        assert!(!graph.attribute_matches(99, Attribute::DepRel, &matcher));
    }
}
