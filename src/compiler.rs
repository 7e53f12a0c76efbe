//! Query compilation
//!
//! Turns the parsed AST into an immutable predicate tree for one dialect.
//! Attribute letters and operators are resolved here, macros are inlined,
//! and every distinct label name gets one slot in the evaluator's table.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::constituency::TreeRelation;
use crate::graph::DepRelation;
use crate::matcher::{Attribute, Matcher};
use crate::parser::{QuerySyntaxError, parse_query};
use crate::pattern::{AttributeRef, MacroDefinition, NodeExpr, Pattern, RelationExpr, Span};

/// Nesting limit for macro expansion
const MAX_MACRO_DEPTH: usize = 64;

/// Which structure a query runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Target {
    /// depgrep: one row per token, dependency relations
    #[default]
    Dependency,
    /// tgrep: every phrase-structure position, TGrep2 relations
    Constituency,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown search target {0:?}")]
pub struct UnknownTarget(pub String);

impl FromStr for Target {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dependency" | "depgrep" => Ok(Target::Dependency),
            "constituency" | "tgrep" => Ok(Target::Constituency),
            _ => Err(UnknownTarget(s.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Dependency => f.write_str("dependency"),
            Target::Constituency => f.write_str("constituency"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] QuerySyntaxError),

    #[error("Unknown attribute '{letter}' at {}..{}", .span.start, .span.end)]
    AttributeNotFound { letter: char, span: Span },

    #[error("Undefined macro @{name} at {}..{}", .span.start, .span.end)]
    UndefinedMacro { name: String, span: Span },

    #[error("Label ={label} is never bound in its pattern")]
    UnboundLabel { label: String, span: Span },

    #[error("Macro @{name} expands into itself")]
    MacroCycle { name: String, span: Span },
}

/// Relation vocabulary of one query dialect
pub trait Dialect: Sized {
    const NAME: &'static str;

    /// Attribute tested by an unprefixed literal
    const DEFAULT_ATTRIBUTE: Attribute;

    fn parse_operator(text: &str) -> Option<Self>;
}

/// Compiled node predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate<R> {
    True,
    Attribute { attribute: Attribute, matcher: Matcher },
    And(Vec<Predicate<R>>),
    Or(Vec<Predicate<R>>),
    Not(Box<Predicate<R>>),
    /// Record the current node in `slot` if `inner` holds
    Bind { slot: usize, inner: Box<Predicate<R>> },
    /// The current node is the one bound in `slot`
    SameAs { slot: usize },
    /// Evaluate `inner` at the node bound in `slot`
    AtLabel { slot: usize, inner: Box<Predicate<R>> },
    /// Some node related to the current one satisfies `target`
    Relation { relation: R, target: Box<Predicate<R>> },
}

/// Top-level alternatives plus the label names behind each slot
#[derive(Debug, Clone, PartialEq)]
pub struct Program<R> {
    pub patterns: Vec<Predicate<R>>,
    pub labels: Vec<String>,
}

/// A query compiled for one target
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledQuery {
    Dependency(Program<DepRelation>),
    Constituency(Program<TreeRelation>),
}

impl CompiledQuery {
    /// Parse and compile a query
    ///
    /// With `case_sensitive == false` every literal and regex compares
    /// lower-cased, as if written with `i@`.
    pub fn compile(query: &str, target: Target, case_sensitive: bool) -> Result<Self, CompileError> {
        let compiled = match target {
            Target::Dependency => {
                CompiledQuery::Dependency(compile_program(query, case_sensitive)?)
            }
            Target::Constituency => {
                CompiledQuery::Constituency(compile_program(query, case_sensitive)?)
            }
        };
        debug!(
            "Compiled {} query with {} pattern(s) and {} label(s)",
            target,
            compiled.pattern_count(),
            compiled.label_count()
        );
        Ok(compiled)
    }

    pub fn target(&self) -> Target {
        match self {
            CompiledQuery::Dependency(_) => Target::Dependency,
            CompiledQuery::Constituency(_) => Target::Constituency,
        }
    }

    fn pattern_count(&self) -> usize {
        match self {
            CompiledQuery::Dependency(program) => program.patterns.len(),
            CompiledQuery::Constituency(program) => program.patterns.len(),
        }
    }

    fn label_count(&self) -> usize {
        match self {
            CompiledQuery::Dependency(program) => program.labels.len(),
            CompiledQuery::Constituency(program) => program.labels.len(),
        }
    }
}

/// Compile a query string for dialect `R`
pub fn compile_program<R: Dialect>(query: &str, case_sensitive: bool) -> Result<Program<R>, CompileError> {
    let ast = parse_query(query)?;
    let mut compiler = Compiler::<R>::new(query, &ast.macros, case_sensitive);

    let mut patterns = Vec::with_capacity(ast.patterns.len());
    for pattern in &ast.patterns {
        compiler.bound.clear();
        compiler.used.clear();

        let predicate = compiler.compile_pattern(pattern)?;
        compiler.check_labels()?;
        patterns.push(predicate);
    }

    Ok(Program {
        patterns,
        labels: compiler.labels,
    })
}

struct Compiler<'q, R> {
    input: &'q str,
    macros: FxHashMap<&'q str, &'q MacroDefinition>,
    case_sensitive: bool,
    labels: Vec<String>,
    slots: FxHashMap<String, usize>,
    /// Labels bound / referenced in the current top-level pattern
    bound: FxHashSet<usize>,
    used: Vec<(usize, Span)>,
    /// Macros currently being expanded
    expanding: Vec<&'q str>,
    dialect: PhantomData<R>,
}

impl<'q, R: Dialect> Compiler<'q, R> {
    fn new(input: &'q str, macros: &'q [MacroDefinition], case_sensitive: bool) -> Self {
        Self {
            input,
            macros: macros.iter().map(|m| (m.name.as_str(), m)).collect(),
            case_sensitive,
            labels: Vec::new(),
            slots: FxHashMap::default(),
            bound: FxHashSet::default(),
            used: Vec::new(),
            expanding: Vec::new(),
            dialect: PhantomData,
        }
    }

    fn slot(&mut self, label: &str) -> usize {
        if let Some(&slot) = self.slots.get(label) {
            return slot;
        }
        let slot = self.labels.len();
        self.labels.push(label.to_string());
        self.slots.insert(label.to_string(), slot);
        slot
    }

    /// Every label referenced in the pattern must be bound somewhere in it
    fn check_labels(&self) -> Result<(), CompileError> {
        for (slot, span) in &self.used {
            if !self.bound.contains(slot) {
                return Err(CompileError::UnboundLabel {
                    label: self.labels[*slot].clone(),
                    span: span.clone(),
                });
            }
        }
        Ok(())
    }

    fn compile_pattern(&mut self, pattern: &'q Pattern) -> Result<Predicate<R>, CompileError> {
        let mut parts = vec![self.compile_node(&pattern.node)?];

        if let Some(relations) = &pattern.relations {
            parts.push(self.compile_relations(relations)?);
        }

        for segment in &pattern.segments {
            let slot = self.slot(&segment.label);
            self.used.push((slot, segment.span.clone()));
            parts.push(Predicate::AtLabel {
                slot,
                inner: Box::new(self.compile_relations(&segment.relations)?),
            });
        }

        Ok(conjoin(parts))
    }

    fn compile_node(&mut self, node: &'q NodeExpr) -> Result<Predicate<R>, CompileError> {
        match node {
            NodeExpr::Literal {
                attribute,
                values,
                case_insensitive,
            } => Ok(Predicate::Attribute {
                attribute: self.resolve(attribute)?,
                matcher: Matcher::literal(
                    values.clone(),
                    *case_insensitive || !self.case_sensitive,
                ),
            }),

            NodeExpr::Regex {
                attribute,
                pattern,
                case_insensitive,
                span,
            } => {
                let attribute = self.resolve(attribute)?;
                let matcher = Matcher::regex(pattern, *case_insensitive || !self.case_sensitive)
                    .map_err(|e| {
                        QuerySyntaxError::new(
                            self.input,
                            span.clone(),
                            format!("Invalid regular expression: {}", e),
                        )
                    })?;
                Ok(Predicate::Attribute { attribute, matcher })
            }

            // A prefixed wildcard still requires the attribute to exist at the node
            NodeExpr::Wildcard { attribute: None } => Ok(Predicate::True),
            NodeExpr::Wildcard { attribute } => Ok(Predicate::Attribute {
                attribute: self.resolve(attribute)?,
                matcher: Matcher::Any,
            }),

            NodeExpr::Disjunction(alternatives) => Ok(Predicate::Or(
                alternatives
                    .iter()
                    .map(|alternative| self.compile_node(alternative))
                    .collect::<Result<_, _>>()?,
            )),

            NodeExpr::Conjunction(parts) => Ok(conjoin(
                parts
                    .iter()
                    .map(|part| self.compile_node(part))
                    .collect::<Result<_, _>>()?,
            )),

            NodeExpr::Negation(inner) => Ok(Predicate::Not(Box::new(self.compile_node(inner)?))),

            NodeExpr::Group(pattern) => self.compile_pattern(pattern),

            NodeExpr::MacroUse { name, span } => self.expand_macro(name, span),

            NodeExpr::LabelBind { node, label } => {
                let slot = self.slot(label);
                self.bound.insert(slot);
                Ok(Predicate::Bind {
                    slot,
                    inner: Box::new(self.compile_node(node)?),
                })
            }

            NodeExpr::LabelUse { label, span } => {
                let slot = self.slot(label);
                self.used.push((slot, span.clone()));
                Ok(Predicate::SameAs { slot })
            }
        }
    }

    fn expand_macro(&mut self, name: &'q str, span: &Span) -> Result<Predicate<R>, CompileError> {
        let Some(definition) = self.macros.get(name).copied() else {
            return Err(CompileError::UndefinedMacro {
                name: name.to_string(),
                span: span.clone(),
            });
        };

        if self.expanding.contains(&name) || self.expanding.len() >= MAX_MACRO_DEPTH {
            return Err(CompileError::MacroCycle {
                name: name.to_string(),
                span: span.clone(),
            });
        }

        self.expanding.push(name);
        let body = self.compile_pattern(&definition.body);
        self.expanding.pop();
        body
    }

    fn compile_relations(&mut self, relations: &'q RelationExpr) -> Result<Predicate<R>, CompileError> {
        match relations {
            RelationExpr::Relation {
                negated,
                operator,
                target,
            } => {
                let Some(relation) = R::parse_operator(&operator.text) else {
                    return Err(QuerySyntaxError::new(
                        self.input,
                        operator.span.clone(),
                        format!("'{}' is not a {} relation", operator.text, R::NAME),
                    )
                    .into());
                };
                let predicate = Predicate::Relation {
                    relation,
                    target: Box::new(self.compile_node(target)?),
                };
                Ok(negate_if(*negated, predicate))
            }

            RelationExpr::Group { negated, inner } => {
                let predicate = self.compile_relations(inner)?;
                Ok(negate_if(*negated, predicate))
            }

            RelationExpr::Conjunction(parts) => Ok(conjoin(
                parts
                    .iter()
                    .map(|part| self.compile_relations(part))
                    .collect::<Result<_, _>>()?,
            )),

            RelationExpr::Disjunction(alternatives) => Ok(Predicate::Or(
                alternatives
                    .iter()
                    .map(|alternative| self.compile_relations(alternative))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }

    fn resolve(&self, attribute: &Option<AttributeRef>) -> Result<Attribute, CompileError> {
        match attribute {
            None => Ok(R::DEFAULT_ATTRIBUTE),
            Some(AttributeRef { letter, span }) => {
                Attribute::from_letter(*letter).ok_or_else(|| CompileError::AttributeNotFound {
                    letter: *letter,
                    span: span.clone(),
                })
            }
        }
    }
}

fn conjoin<R>(mut parts: Vec<Predicate<R>>) -> Predicate<R> {
    parts.retain(|part| !matches!(part, Predicate::True));
    match parts.len() {
        0 => Predicate::True,
        1 => parts.remove(0),
        _ => Predicate::And(parts),
    }
}

fn negate_if<R>(negated: bool, predicate: Predicate<R>) -> Predicate<R> {
    if negated {
        Predicate::Not(Box::new(predicate))
    } else {
        predicate
    }
}
