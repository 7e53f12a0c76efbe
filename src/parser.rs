//! Query language parser
//!
//! Parses query strings into the Query AST using pest grammar.

use pest::Parser;
use pest::error::InputLocation;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;
use thiserror::Error;

use crate::pattern::{
    AttributeRef, MacroDefinition, NodeExpr, Operator, Pattern, Query, RelationExpr, Segment,
    Span,
};

#[derive(Parser)]
#[grammar = "query.pest"]
struct QueryParser;

/// Error type for malformed queries
///
/// `span` is a byte range into the query string and `fragment` is the text
/// found there.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Query syntax error at {}..{} ({:?}): {}", .span.start, .span.end, .fragment, .message)]
pub struct QuerySyntaxError {
    pub message: String,
    pub span: Span,
    pub fragment: String,
}

impl QuerySyntaxError {
    pub(crate) fn new(input: &str, span: Span, message: impl Into<String>) -> Self {
        let fragment = input.get(span.clone()).unwrap_or_default().to_string();
        Self {
            message: message.into(),
            span,
            fragment,
        }
    }

    fn from_pest(input: &str, err: pest::error::Error<Rule>) -> Self {
        let err = err.renamed_rules(describe_rule);
        let span = match err.location {
            InputLocation::Pos(pos) => offending_token(input, pos),
            InputLocation::Span((start, end)) => start..end,
        };
        Self::new(input, span, err.variant.message())
    }
}

/// Human-readable names for grammar rules in error messages
fn describe_rule(rule: &Rule) -> String {
    let name = match rule {
        Rule::EOI => "end of query",
        Rule::pattern => "pattern",
        Rule::node | Rule::target | Rule::node_conj | Rule::node_atom => "node expression",
        Rule::relations | Rule::rel_conj | Rule::relation => "relation",
        Rule::rel_op => "relation operator",
        Rule::literal => "literal",
        Rule::quoted => "quoted string",
        Rule::regex => "regular expression",
        Rule::label_bind => "label binding",
        Rule::label_name | Rule::segment_label => "label name",
        Rule::macro_name => "macro name",
        Rule::segment => "segment",
        other => return format!("{:?}", other),
    };
    name.to_string()
}

/// Span of the whitespace-delimited token starting at `pos`
fn offending_token(input: &str, pos: usize) -> Span {
    let rest = input.get(pos..).unwrap_or_default();
    let len = rest
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    pos..pos + len
}

fn span_of(pair: &Pair<Rule>) -> Span {
    let span = pair.as_span();
    span.start()..span.end()
}

/// Take the next inner pair, failing with a syntax error naming the parent span
fn expect_next<'i>(
    pairs: &mut Pairs<'i, Rule>,
    input: &str,
    parent: &Span,
    what: &str,
) -> Result<Pair<'i, Rule>, QuerySyntaxError> {
    pairs
        .next()
        .ok_or_else(|| QuerySyntaxError::new(input, parent.clone(), format!("Expected {}", what)))
}

fn unexpected(input: &str, pair: &Pair<Rule>) -> QuerySyntaxError {
    QuerySyntaxError::new(
        input,
        span_of(pair),
        format!("Unexpected {}", describe_rule(&pair.as_rule())),
    )
}

/// Parse a query string into a Query
pub fn parse_query(input: &str) -> Result<Query, QuerySyntaxError> {
    let mut pairs =
        QueryParser::parse(Rule::query, input).map_err(|e| QuerySyntaxError::from_pest(input, e))?;

    // Get the query rule (there should be exactly one)
    let Some(query_pair) = pairs.next() else {
        return Err(QuerySyntaxError::new(input, 0..input.len(), "No query found"));
    };

    let mut macros: Vec<MacroDefinition> = Vec::new();
    let mut patterns = Vec::new();

    for statement in query_pair.into_inner() {
        match statement.as_rule() {
            Rule::macro_def => {
                let definition = parse_macro_def(input, statement)?;
                if macros.iter().any(|m| m.name == definition.name) {
                    return Err(QuerySyntaxError::new(
                        input,
                        definition.span,
                        format!("Macro @{} is defined more than once", definition.name),
                    ));
                }
                macros.push(definition);
            }
            Rule::pattern => patterns.push(parse_pattern(input, statement)?),
            Rule::EOI => {} // End of input
            _ => return Err(unexpected(input, &statement)),
        }
    }

    if patterns.is_empty() {
        return Err(QuerySyntaxError::new(
            input,
            0..input.len(),
            "Query defines macros but no pattern",
        ));
    }

    Ok(Query { macros, patterns })
}

/// Parse a macro definition: @NAME pattern
fn parse_macro_def(input: &str, pair: Pair<Rule>) -> Result<MacroDefinition, QuerySyntaxError> {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();

    let name = expect_next(&mut inner, input, &span, "macro name")?
        .as_str()
        .to_string();
    let body = parse_pattern(input, expect_next(&mut inner, input, &span, "macro body")?)?;

    Ok(MacroDefinition { name, body, span })
}

/// Parse a pattern: node [relations] [: =label relations]*
fn parse_pattern(input: &str, pair: Pair<Rule>) -> Result<Pattern, QuerySyntaxError> {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();

    let node = parse_node(input, expect_next(&mut inner, input, &span, "node expression")?)?;
    let mut relations = None;
    let mut segments = Vec::new();

    for part in inner {
        match part.as_rule() {
            Rule::relations => relations = Some(parse_relations(input, part)?),
            Rule::segment => segments.push(parse_segment(input, part)?),
            _ => return Err(unexpected(input, &part)),
        }
    }

    Ok(Pattern {
        node,
        relations,
        segments,
    })
}

/// Parse a segment: : =label relations
fn parse_segment(input: &str, pair: Pair<Rule>) -> Result<Segment, QuerySyntaxError> {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();

    let label_pair = expect_next(&mut inner, input, &span, "label name")?;
    let label_span = span_of(&label_pair);
    let label = label_text(input, label_pair)?;
    let relations = parse_relations(
        input,
        expect_next(&mut inner, input, &span, "relation")?,
    )?;

    Ok(Segment {
        label,
        relations,
        span: label_span,
    })
}

/// The label_name inside segment_label, label_use or label_bind
fn label_text(input: &str, pair: Pair<Rule>) -> Result<String, QuerySyntaxError> {
    let span = span_of(&pair);
    let name = expect_next(&mut pair.into_inner(), input, &span, "label name")?;
    Ok(name.as_str().to_string())
}

/// Parse a node expression or relation target: disjunction of conjunctions,
/// optionally labelled
fn parse_node(input: &str, pair: Pair<Rule>) -> Result<NodeExpr, QuerySyntaxError> {
    let mut alternatives = Vec::new();
    let mut label = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::node_conj => alternatives.push(parse_node_conj(input, part)?),
            Rule::label_bind => label = Some(label_text(input, part)?),
            _ => return Err(unexpected(input, &part)),
        }
    }

    let node = if alternatives.len() == 1 {
        alternatives.remove(0)
    } else {
        NodeExpr::Disjunction(alternatives)
    };

    Ok(match label {
        Some(label) => NodeExpr::LabelBind {
            node: Box::new(node),
            label,
        },
        None => node,
    })
}

fn parse_node_conj(input: &str, pair: Pair<Rule>) -> Result<NodeExpr, QuerySyntaxError> {
    let mut atoms: Vec<NodeExpr> = pair
        .into_inner()
        .map(|atom| parse_node_atom(input, atom))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(if atoms.len() == 1 {
        atoms.remove(0)
    } else {
        NodeExpr::Conjunction(atoms)
    })
}

/// Parse a single node atom: [!] (group | @macro | =label | literal)
fn parse_node_atom(input: &str, pair: Pair<Rule>) -> Result<NodeExpr, QuerySyntaxError> {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();

    let mut part = expect_next(&mut inner, input, &span, "node expression")?;
    let negated = part.as_rule() == Rule::negation;
    if negated {
        part = expect_next(&mut inner, input, &span, "node expression")?;
    }

    let node = match part.as_rule() {
        Rule::group => {
            let group_span = span_of(&part);
            let pattern = expect_next(&mut part.into_inner(), input, &group_span, "pattern")?;
            NodeExpr::Group(Box::new(parse_pattern(input, pattern)?))
        }
        Rule::macro_use => {
            let use_span = span_of(&part);
            let name = expect_next(&mut part.into_inner(), input, &use_span, "macro name")?;
            NodeExpr::MacroUse {
                name: name.as_str().to_string(),
                span: use_span,
            }
        }
        Rule::label_use => {
            let use_span = span_of(&part);
            NodeExpr::LabelUse {
                label: label_text(input, part)?,
                span: use_span,
            }
        }
        Rule::literal => parse_literal(input, part)?,
        _ => return Err(unexpected(input, &part)),
    };

    Ok(if negated {
        NodeExpr::Negation(Box::new(node))
    } else {
        node
    })
}

/// Parse a literal: [i@][attr] ("a,b" | /re/ | * | __) or [i@]bareword
fn parse_literal(input: &str, pair: Pair<Rule>) -> Result<NodeExpr, QuerySyntaxError> {
    let mut case_insensitive = false;
    let mut attribute = None;

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::case_flag => case_insensitive = true,
            Rule::attribute => {
                attribute = Some(AttributeRef {
                    letter: part.as_str().chars().next().unwrap_or('w'),
                    span: span_of(&part),
                });
            }
            Rule::quoted => {
                let span = span_of(&part);
                let text = expect_next(&mut part.into_inner(), input, &span, "string")?;
                let values = unescape(text.as_str(), '"')
                    .split(',')
                    .map(str::to_string)
                    .collect();
                return Ok(NodeExpr::Literal {
                    attribute,
                    values,
                    case_insensitive,
                });
            }
            Rule::regex => {
                let span = span_of(&part);
                let text = expect_next(&mut part.into_inner(), input, &span, "regex")?;
                return Ok(NodeExpr::Regex {
                    attribute,
                    pattern: text.as_str().replace("\\/", "/"),
                    case_insensitive,
                    span,
                });
            }
            Rule::wildcard => return Ok(NodeExpr::Wildcard { attribute }),
            Rule::bare_word => {
                return Ok(NodeExpr::Literal {
                    attribute,
                    values: vec![part.as_str().to_string()],
                    case_insensitive,
                });
            }
            _ => return Err(unexpected(input, &part)),
        }
    }

    Err(QuerySyntaxError::new(input, 0..input.len(), "Empty literal"))
}

/// Resolve backslash escapes inside a quoted string
fn unescape(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) if next == quote || next == '\\' => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse relations: conjunctions separated by '|'
fn parse_relations(input: &str, pair: Pair<Rule>) -> Result<RelationExpr, QuerySyntaxError> {
    let mut alternatives: Vec<RelationExpr> = pair
        .into_inner()
        .map(|conj| parse_rel_conj(input, conj))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(if alternatives.len() == 1 {
        alternatives.remove(0)
    } else {
        RelationExpr::Disjunction(alternatives)
    })
}

fn parse_rel_conj(input: &str, pair: Pair<Rule>) -> Result<RelationExpr, QuerySyntaxError> {
    let mut relations: Vec<RelationExpr> = pair
        .into_inner()
        .map(|relation| parse_relation(input, relation))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(if relations.len() == 1 {
        relations.remove(0)
    } else {
        RelationExpr::Conjunction(relations)
    })
}

/// Parse a relation: [!] op node, or [!] [ relations ]
fn parse_relation(input: &str, pair: Pair<Rule>) -> Result<RelationExpr, QuerySyntaxError> {
    let span = span_of(&pair);
    let mut inner = pair.into_inner();

    let mut part = expect_next(&mut inner, input, &span, "relation")?;
    let negated = part.as_rule() == Rule::negation;
    if negated {
        part = expect_next(&mut inner, input, &span, "relation")?;
    }

    match part.as_rule() {
        Rule::rel_group => {
            let group_span = span_of(&part);
            let relations = expect_next(&mut part.into_inner(), input, &group_span, "relation")?;
            Ok(RelationExpr::Group {
                negated,
                inner: Box::new(parse_relations(input, relations)?),
            })
        }
        Rule::rel_op => {
            let operator = Operator {
                text: part.as_str().to_string(),
                span: span_of(&part),
            };
            let target = parse_node(input, expect_next(&mut inner, input, &span, "node")?)?;
            Ok(RelationExpr::Relation {
                negated,
                operator,
                target: Box::new(target),
            })
        }
        _ => Err(unexpected(input, &part)),
    }
}
