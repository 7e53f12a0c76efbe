//! Query AST
//!
//! The parser produces these types; the compiler resolves attributes,
//! operators, macros and labels and turns them into predicates. Nothing in
//! here is dialect-specific: relation operators are kept as source text
//! until the compiler knows which target the query runs against.

use std::ops::Range;

/// Byte range into the query string
pub type Span = Range<usize>;

/// A parsed query: macro definitions plus one or more alternative patterns
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub macros: Vec<MacroDefinition>,
    pub patterns: Vec<Pattern>,
}

/// `@NAME pattern`
#[derive(Debug, Clone, PartialEq)]
pub struct MacroDefinition {
    pub name: String,
    pub body: Pattern,
    pub span: Span,
}

/// A node expression with optional relations and segments
///
/// `node relations : =label relations : =label relations ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub node: NodeExpr,
    pub relations: Option<RelationExpr>,
    pub segments: Vec<Segment>,
}

/// `: =label relations`: further constraints on a previously bound node
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub label: String,
    pub relations: RelationExpr,
    pub span: Span,
}

/// Attribute letter as written in the query (resolved by the compiler)
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRef {
    pub letter: char,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeExpr {
    /// `a"x,y,z"`: exact match against any of the comma-separated values
    Literal {
        attribute: Option<AttributeRef>,
        values: Vec<String>,
        case_insensitive: bool,
    },
    /// `a/regex/`
    Regex {
        attribute: Option<AttributeRef>,
        pattern: String,
        case_insensitive: bool,
        span: Span,
    },
    /// `*` or `__`
    Wildcard { attribute: Option<AttributeRef> },
    Disjunction(Vec<NodeExpr>),
    Conjunction(Vec<NodeExpr>),
    Negation(Box<NodeExpr>),
    /// `( pattern )`
    Group(Box<Pattern>),
    MacroUse { name: String, span: Span },
    LabelBind { node: Box<NodeExpr>, label: String },
    LabelUse { label: String, span: Span },
}

/// Relation operator as written in the query
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelationExpr {
    Relation {
        negated: bool,
        operator: Operator,
        target: Box<NodeExpr>,
    },
    /// `[ relations ]`, optionally negated as a whole
    Group {
        negated: bool,
        inner: Box<RelationExpr>,
    },
    Conjunction(Vec<RelationExpr>),
    Disjunction(Vec<RelationExpr>),
}
