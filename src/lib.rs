//! Depgrep: TGrep2-style pattern search over annotated corpora
//!
//! Queries are matched against dependency graphs (depgrep) or
//! phrase-structure trees (tgrep), one result row per token.

pub mod compiler; // Query compilation to predicate trees
pub mod conllu; // CoNLL-U file parsing
pub mod constituency; // Bracketed trees and TGrep2 relations
pub mod corpus; // Sentence collections
pub mod graph; // Dependency graph navigation
pub mod matcher; // Attribute letters and value matching
pub mod parser; // Query language parser
pub mod pattern; // Query AST
pub mod searcher; // Parallel corpus search
pub mod tree; // Tokens and sentences
pub mod vm; // Predicate evaluator

// Re-exports for convenience
pub use compiler::{CompileError, CompiledQuery, Target};
pub use conllu::{CoNLLUReader, ReadError};
pub use corpus::{Corpus, CorpusProvider};
pub use parser::{QuerySyntaxError, parse_query};
pub use searcher::{
    Diagnostic, MatchResult, Matches, SearchError, SearchOptions, TaggedRow, search, search_query,
};
pub use tree::{Governor, Sentence, SentenceId, Token};
pub use vm::EvalError;
