//! Phrase-structure trees
//!
//! Parses Penn-style bracketed trees and provides TGrep2 navigation over
//! them. Positions are numbered in pre-order; every position knows its
//! parent, its ordered children and the half-open range of leaves it
//! dominates. Leaves correspond one-to-one with the sentence's tokens.

use thiserror::Error;

use crate::compiler::Dialect;
use crate::matcher::{Attribute, Matcher};
use crate::tree::Token;
use crate::vm::{EvalError, Navigator};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed tree at byte {offset}: {message}")]
pub struct TreeSyntaxError {
    pub message: String,
    pub offset: usize,
}

impl TreeSyntaxError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// TGrep2 relation operators (`A op B`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeRelation {
    /// `<`
    Child,
    /// `>`
    Parent,
    /// `<N`: B is A's Nth child
    NthChild(isize),
    /// `>N`: A is B's Nth child
    NthChildOf(isize),
    /// `<,`
    FirstChild,
    /// `<'`
    LastChild,
    /// `>,`
    FirstChildOf,
    /// `>'`
    LastChildOf,
    /// `<:`
    OnlyChild,
    /// `>:`
    OnlyChildOf,
    /// `<<`
    Dominates,
    /// `>>`
    DominatedBy,
    /// `<<,`
    LeftmostDescendant,
    /// `<<'`
    RightmostDescendant,
    /// `>>,`
    LeftmostDescendantOf,
    /// `>>'`
    RightmostDescendantOf,
    /// `.`
    ImmediatelyPrecedes,
    /// `,`
    ImmediatelyFollows,
    /// `..`
    Precedes,
    /// `,,`
    Follows,
    /// `$`
    Sister,
    /// `$.`: B is the next sister
    ImmediateRightSister,
    /// `$,`: B is the previous sister
    ImmediateLeftSister,
    /// `$..`
    RightSister,
    /// `$,,`
    LeftSister,
}

impl Dialect for TreeRelation {
    const NAME: &'static str = "constituency";
    const DEFAULT_ATTRIBUTE: Attribute = Attribute::Label;

    fn parse_operator(text: &str) -> Option<Self> {
        Some(match text {
            "<" => TreeRelation::Child,
            ">" => TreeRelation::Parent,
            "<," => TreeRelation::FirstChild,
            "<'" => TreeRelation::LastChild,
            ">," => TreeRelation::FirstChildOf,
            ">'" => TreeRelation::LastChildOf,
            "<:" => TreeRelation::OnlyChild,
            ">:" => TreeRelation::OnlyChildOf,
            "<<" => TreeRelation::Dominates,
            ">>" => TreeRelation::DominatedBy,
            "<<," => TreeRelation::LeftmostDescendant,
            "<<'" => TreeRelation::RightmostDescendant,
            ">>," => TreeRelation::LeftmostDescendantOf,
            ">>'" => TreeRelation::RightmostDescendantOf,
            "." => TreeRelation::ImmediatelyPrecedes,
            "," => TreeRelation::ImmediatelyFollows,
            ".." => TreeRelation::Precedes,
            ",," => TreeRelation::Follows,
            "$" => TreeRelation::Sister,
            "$." => TreeRelation::ImmediateRightSister,
            "$," => TreeRelation::ImmediateLeftSister,
            "$.." => TreeRelation::RightSister,
            "$,," => TreeRelation::LeftSister,
            _ => {
                if let Some(n) = text.strip_prefix('<') {
                    TreeRelation::NthChild(parse_ordinal(n)?)
                } else if let Some(n) = text.strip_prefix('>') {
                    TreeRelation::NthChildOf(parse_ordinal(n)?)
                } else {
                    return None;
                }
            }
        })
    }
}

fn parse_ordinal(text: &str) -> Option<isize> {
    text.parse::<isize>().ok().filter(|&n| n != 0)
}

#[derive(Debug, Clone, PartialEq)]
struct Position {
    label: String,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Leaf range dominated by this position
    first_leaf: usize,
    end_leaf: usize,
    /// Leaf number for leaves
    leaf: Option<usize>,
}

/// A parsed bracketed tree
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseTree {
    positions: Vec<Position>,
    leaves: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Lexeme<'s> {
    Open,
    Close,
    Atom(&'s str),
}

fn tokenize(text: &str) -> Vec<(usize, Lexeme<'_>)> {
    let mut lexemes = Vec::new();
    let mut atom_start = None;

    for (offset, c) in text.char_indices() {
        if c == '(' || c == ')' || c.is_whitespace() {
            if let Some(start) = atom_start.take() {
                lexemes.push((start, Lexeme::Atom(&text[start..offset])));
            }
            if c == '(' {
                lexemes.push((offset, Lexeme::Open));
            } else if c == ')' {
                lexemes.push((offset, Lexeme::Close));
            }
        } else if atom_start.is_none() {
            atom_start = Some(offset);
        }
    }
    if let Some(start) = atom_start {
        lexemes.push((start, Lexeme::Atom(&text[start..])));
    }
    lexemes
}

impl PhraseTree {
    /// Parse `(S (NP (DT The) (NN dog)) (VP (VBZ barks)))`
    ///
    /// An opening bracket directly followed by another bracket gives an
    /// unlabelled position, as in the PTB's `( (S ...) )` wrapper.
    pub fn parse(text: &str) -> Result<Self, TreeSyntaxError> {
        let lexemes = tokenize(text);
        let mut positions: Vec<Position> = Vec::new();
        let mut open: Vec<usize> = Vec::new();
        let mut leaves = 0;
        let mut finished = false;
        let mut iter = lexemes.iter().peekable();

        while let Some(&(offset, lexeme)) = iter.next() {
            if finished {
                return Err(TreeSyntaxError::new(offset, "text after the end of the tree"));
            }
            match lexeme {
                Lexeme::Open => {
                    let label = match iter.peek() {
                        Some(&&(_, Lexeme::Atom(label))) => {
                            iter.next();
                            label.to_string()
                        }
                        _ => String::new(),
                    };
                    let id = push_position(&mut positions, open.last().copied(), label, leaves, None);
                    open.push(id);
                }
                Lexeme::Close => {
                    let Some(id) = open.pop() else {
                        return Err(TreeSyntaxError::new(offset, "unbalanced ')'"));
                    };
                    positions[id].end_leaf = leaves;
                    finished = open.is_empty();
                }
                Lexeme::Atom(word) => {
                    if open.is_empty() {
                        return Err(TreeSyntaxError::new(offset, "leaf outside brackets"));
                    }
                    push_position(
                        &mut positions,
                        open.last().copied(),
                        word.to_string(),
                        leaves,
                        Some(leaves),
                    );
                    leaves += 1;
                }
            }
        }

        if positions.is_empty() {
            return Err(TreeSyntaxError::new(0, "empty tree"));
        }
        if !open.is_empty() {
            return Err(TreeSyntaxError::new(text.len(), "missing ')'"));
        }

        Ok(Self { positions, leaves })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves
    }

    pub fn label(&self, position: usize) -> Option<&str> {
        self.positions.get(position).map(|p| p.label.as_str())
    }

    pub fn parent(&self, position: usize) -> Option<usize> {
        self.positions.get(position)?.parent
    }

    pub fn children(&self, position: usize) -> &[usize] {
        self.positions
            .get(position)
            .map(|p| p.children.as_slice())
            .unwrap_or_default()
    }

    /// Half-open range of leaves (token positions) under `position`
    pub fn leaf_span(&self, position: usize) -> std::ops::Range<usize> {
        self.positions
            .get(position)
            .map(|p| p.first_leaf..p.end_leaf)
            .unwrap_or(0..0)
    }

    /// Token position of a leaf
    pub fn leaf(&self, position: usize) -> Option<usize> {
        self.positions.get(position)?.leaf
    }

    /// Attach the tree to its sentence's tokens
    pub fn anchor(self, tokens: &[Token]) -> Result<AnchoredTree<'_>, EvalError> {
        if self.leaves != tokens.len() {
            return Err(EvalError::LeafMismatch {
                leaves: self.leaves,
                tokens: tokens.len(),
            });
        }
        Ok(AnchoredTree { tree: self, tokens })
    }

    fn nth_child(&self, position: usize, n: isize) -> Option<usize> {
        let children = self.children(position);
        let index = if n > 0 {
            n.unsigned_abs() - 1
        } else {
            children.len().checked_sub(n.unsigned_abs())?
        };
        children.get(index).copied()
    }

    /// Descendants in pre-order: the contiguous block after `position`
    fn descendants(&self, position: usize) -> Vec<usize> {
        let mut end = position + 1;
        while end < self.positions.len() && self.is_ancestor(position, end) {
            end += 1;
        }
        (position + 1..end).collect()
    }

    fn ancestors(&self, position: usize) -> Vec<usize> {
        std::iter::successors(self.parent(position), |&p| self.parent(p)).collect()
    }

    fn is_ancestor(&self, ancestor: usize, position: usize) -> bool {
        self.ancestors(position).contains(&ancestor)
    }

    /// Chain of first (or last) children below `position`
    fn edge_descendants(&self, position: usize, last: bool) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = position;
        loop {
            let children = self.children(current);
            let next = if last { children.last() } else { children.first() };
            let Some(&next) = next else { break };
            chain.push(next);
            current = next;
        }
        chain
    }

    /// Ancestors reached while `position` stays on their first (or last) edge
    fn edge_ancestors(&self, position: usize, last: bool) -> Vec<usize> {
        let mut chain = Vec::new();
        let mut current = position;
        while let Some(parent) = self.parent(current) {
            let children = self.children(parent);
            let edge = if last { children.last() } else { children.first() };
            if edge != Some(&current) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Sisters of `position` with its own index among them
    fn sisters(&self, position: usize) -> (&[usize], Option<usize>) {
        match self.parent(position) {
            Some(parent) => {
                let siblings = self.children(parent);
                let index = siblings.iter().position(|&s| s == position);
                (siblings, index)
            }
            None => (&[][..], None),
        }
    }

    /// Positions with a non-empty leaf span satisfying `keep`
    fn spanning(&self, keep: impl Fn(std::ops::Range<usize>) -> bool) -> Vec<usize> {
        (0..self.positions.len())
            .filter(|&p| {
                let span = self.leaf_span(p);
                !span.is_empty() && keep(span)
            })
            .collect()
    }

    pub fn related(&self, position: usize, relation: TreeRelation) -> Vec<usize> {
        let span = self.leaf_span(position);
        let children = self.children(position);

        match relation {
            TreeRelation::Child => children.to_vec(),
            TreeRelation::Parent => self.parent(position).into_iter().collect(),
            TreeRelation::NthChild(n) => self.nth_child(position, n).into_iter().collect(),
            TreeRelation::NthChildOf(n) => self
                .parent(position)
                .filter(|&p| self.nth_child(p, n) == Some(position))
                .into_iter()
                .collect(),
            TreeRelation::FirstChild => children.first().copied().into_iter().collect(),
            TreeRelation::LastChild => children.last().copied().into_iter().collect(),
            TreeRelation::FirstChildOf => self.edge_ancestors(position, false).into_iter().take(1).collect(),
            TreeRelation::LastChildOf => self.edge_ancestors(position, true).into_iter().take(1).collect(),
            TreeRelation::OnlyChild => match children {
                [only] => vec![*only],
                _ => Vec::new(),
            },
            TreeRelation::OnlyChildOf => self
                .parent(position)
                .filter(|&p| self.children(p).len() == 1)
                .into_iter()
                .collect(),
            TreeRelation::Dominates => self.descendants(position),
            TreeRelation::DominatedBy => self.ancestors(position),
            TreeRelation::LeftmostDescendant => self.edge_descendants(position, false),
            TreeRelation::RightmostDescendant => self.edge_descendants(position, true),
            TreeRelation::LeftmostDescendantOf => self.edge_ancestors(position, false),
            TreeRelation::RightmostDescendantOf => self.edge_ancestors(position, true),
            TreeRelation::ImmediatelyPrecedes if !span.is_empty() => {
                self.spanning(|other| other.start == span.end)
            }
            TreeRelation::ImmediatelyFollows if !span.is_empty() => {
                self.spanning(|other| other.end == span.start)
            }
            TreeRelation::Precedes if !span.is_empty() => {
                self.spanning(|other| other.start >= span.end)
            }
            TreeRelation::Follows if !span.is_empty() => {
                self.spanning(|other| other.end <= span.start)
            }
            TreeRelation::ImmediatelyPrecedes
            | TreeRelation::ImmediatelyFollows
            | TreeRelation::Precedes
            | TreeRelation::Follows => Vec::new(),
            TreeRelation::Sister => {
                let (siblings, _) = self.sisters(position);
                siblings.iter().copied().filter(|&s| s != position).collect()
            }
            TreeRelation::ImmediateRightSister => {
                let (siblings, index) = self.sisters(position);
                index
                    .and_then(|i| siblings.get(i + 1))
                    .copied()
                    .into_iter()
                    .collect()
            }
            TreeRelation::ImmediateLeftSister => {
                let (siblings, index) = self.sisters(position);
                index
                    .and_then(|i| i.checked_sub(1))
                    .and_then(|i| siblings.get(i))
                    .copied()
                    .into_iter()
                    .collect()
            }
            TreeRelation::RightSister => {
                let (siblings, index) = self.sisters(position);
                index.map(|i| siblings[i + 1..].to_vec()).unwrap_or_default()
            }
            TreeRelation::LeftSister => {
                let (siblings, index) = self.sisters(position);
                index.map(|i| siblings[..i].to_vec()).unwrap_or_default()
            }
        }
    }
}

fn push_position(
    positions: &mut Vec<Position>,
    parent: Option<usize>,
    label: String,
    first_leaf: usize,
    leaf: Option<usize>,
) -> usize {
    let id = positions.len();
    positions.push(Position {
        label,
        parent,
        children: Vec::new(),
        first_leaf,
        end_leaf: first_leaf + usize::from(leaf.is_some()),
        leaf,
    });
    if let Some(parent) = parent {
        positions[parent].children.push(id);
    }
    id
}

/// A tree whose leaves are bound to the sentence's tokens
#[derive(Debug)]
pub struct AnchoredTree<'a> {
    tree: PhraseTree,
    tokens: &'a [Token],
}

impl AnchoredTree<'_> {
    pub fn tree(&self) -> &PhraseTree {
        &self.tree
    }
}

impl Navigator for AnchoredTree<'_> {
    type Relation = TreeRelation;

    fn len(&self) -> usize {
        self.tree.len()
    }

    /// Unprefixed tests see the position's label; prefixed attributes only
    /// exist at leaves
    fn attribute_matches(&self, node: usize, attribute: Attribute, matcher: &Matcher) -> bool {
        match attribute {
            Attribute::Label => self.tree.label(node).is_some_and(|l| matcher.is_match(l)),
            _ => self
                .tree
                .leaf(node)
                .and_then(|leaf| self.tokens.get(leaf))
                .is_some_and(|token| matcher.is_match(&token.attribute(attribute))),
        }
    }

    fn related(&self, node: usize, relation: &TreeRelation) -> Result<Vec<usize>, EvalError> {
        Ok(self.tree.related(node, *relation))
    }
}
