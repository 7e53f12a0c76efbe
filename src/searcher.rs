//! End-to-end corpus search
//!
//! The search pipeline:
//! 1. Parse and compile the query for the selected target
//! 2. Split the corpus into ordered chunks of sentences
//! 3. Evaluate each chunk on the rayon pool, one row per token
//! 4. Merge chunk results in corpus order

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};
use rayon::prelude::*;
use thiserror::Error;

use crate::compiler::{CompileError, CompiledQuery, Program, Target};
use crate::constituency::{PhraseTree, TreeRelation};
use crate::corpus::CorpusProvider;
use crate::graph::{DepGraph, DepRelation};
use crate::tree::{Sentence, SentenceId};
use crate::vm::{EvalError, Navigator, VM};

/// Default number of sentences per parallel work unit
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Error during search
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("Search did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Error in sentence {sentence} at row {row}: {source}")]
    Row {
        sentence: SentenceId,
        row: usize,
        #[source]
        source: EvalError,
    },

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Options for one search call
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub target: Target,
    pub case_sensitive: bool,
    /// Return the complement of the matching rows
    pub inverse: bool,
    /// Whole-search time limit, checked between chunks
    pub timeout: Option<Duration>,
    /// Fail on the first malformed row instead of recording a diagnostic
    pub abort_on_error: bool,
    pub chunk_size: usize,
    /// Dedicated pool size; `None` uses the global rayon pool
    pub threads: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            target: Target::Dependency,
            case_sensitive: true,
            inverse: false,
            timeout: None,
            abort_on_error: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            threads: None,
        }
    }
}

impl SearchOptions {
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_inverse(mut self, inverse: bool) -> Self {
        self.inverse = inverse;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_abort_on_error(mut self, abort_on_error: bool) -> Self {
        self.abort_on_error = abort_on_error;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}

/// A row that could not be evaluated
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Corpus-wide row (token) number
    pub row: usize,
    pub sentence: SentenceId,
    pub error: EvalError,
}

/// Constituency result row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaggedRow {
    pub row: usize,
    /// Match group, 1-based; `None` for rows returned by an inverse search
    pub group: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Matches {
    /// One flag per token, in corpus order
    Dependency(Vec<bool>),
    /// The selected tokens, in corpus order
    Constituency { rows: Vec<TaggedRow>, total: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matches: Matches,
    pub diagnostics: Vec<Diagnostic>,
}

impl MatchResult {
    /// Boolean view over all rows for either target
    pub fn mask(&self) -> Vec<bool> {
        match &self.matches {
            Matches::Dependency(mask) => mask.clone(),
            Matches::Constituency { rows, total } => {
                let mut mask = vec![false; *total];
                for row in rows {
                    mask[row.row] = true;
                }
                mask
            }
        }
    }

    /// Indices of the selected rows
    pub fn rows(&self) -> Vec<usize> {
        match &self.matches {
            Matches::Dependency(mask) => mask
                .iter()
                .enumerate()
                .filter_map(|(row, &hit)| hit.then_some(row))
                .collect(),
            Matches::Constituency { rows, .. } => rows.iter().map(|r| r.row).collect(),
        }
    }

    pub fn count(&self) -> usize {
        match &self.matches {
            Matches::Dependency(mask) => mask.iter().filter(|&&hit| hit).count(),
            Matches::Constituency { rows, .. } => rows.len(),
        }
    }
}

/// Search a corpus with a query string
pub fn search_query<C>(corpus: &C, query: &str, options: &SearchOptions) -> Result<MatchResult, SearchError>
where
    C: CorpusProvider + ?Sized,
{
    let compiled = CompiledQuery::compile(query, options.target, options.case_sensitive)?;
    search(corpus, &compiled, options)
}

/// Search a corpus with a pre-compiled query
///
/// The compiled query decides the target; `options.target` and
/// `options.case_sensitive` only matter to [`search_query`].
pub fn search<C>(corpus: &C, compiled: &CompiledQuery, options: &SearchOptions) -> Result<MatchResult, SearchError>
where
    C: CorpusProvider + ?Sized,
{
    let sentences: Vec<&Sentence> = corpus.sentences().collect();
    let started = Instant::now();

    let outcomes = match options.threads {
        Some(threads) => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?
            .install(|| evaluate_chunks(&sentences, compiled, options, started)),
        None => evaluate_chunks(&sentences, compiled, options, started),
    }?;

    let result = merge(outcomes, compiled.target(), options.inverse);
    debug!(
        "Searched {} sentences in {:?}: {} rows selected, {} diagnostics",
        sentences.len(),
        started.elapsed(),
        result.count(),
        result.diagnostics.len()
    );
    Ok(result)
}

/// Result of evaluating one sentence
#[derive(Debug)]
struct SentenceOutcome {
    sentence: SentenceId,
    /// Per token: `None` for no match, otherwise the sentence-local group
    /// (always 1 for dependency matches)
    tags: Vec<Option<usize>>,
    groups: usize,
    /// Sentence-local token position and error
    errors: Vec<(usize, EvalError)>,
}

impl SentenceOutcome {
    fn new(sentence: &Sentence) -> Self {
        Self {
            sentence: sentence.id.clone(),
            tags: vec![None; sentence.len()],
            groups: 0,
            errors: Vec::new(),
        }
    }
}

enum ChunkError {
    Cancelled,
    Row {
        /// Corpus position of the failing sentence
        index: usize,
        token: usize,
        sentence: SentenceId,
        error: EvalError,
    },
}

fn evaluate_chunks(
    sentences: &[&Sentence],
    compiled: &CompiledQuery,
    options: &SearchOptions,
    started: Instant,
) -> Result<Vec<SentenceOutcome>, SearchError> {
    let chunk_size = options.chunk_size.max(1);
    let cancelled = AtomicBool::new(false);

    let chunks: Vec<Result<Vec<SentenceOutcome>, ChunkError>> = sentences
        .par_chunks(chunk_size)
        .enumerate()
        .map(|(chunk_index, chunk)| {
            if cancelled.load(Ordering::Relaxed)
                || options.timeout.is_some_and(|limit| started.elapsed() >= limit)
            {
                cancelled.store(true, Ordering::Relaxed);
                return Err(ChunkError::Cancelled);
            }
            chunk
                .iter()
                .enumerate()
                .map(|(i, sentence)| {
                    evaluate_sentence(sentence, compiled, options.abort_on_error).map_err(
                        |(token, error)| ChunkError::Row {
                            index: chunk_index * chunk_size + i,
                            token,
                            sentence: sentence.id.clone(),
                            error,
                        },
                    )
                })
                .collect()
        })
        .collect();

    let mut outcomes = Vec::with_capacity(sentences.len());
    for chunk in chunks {
        match chunk {
            Ok(chunk) => outcomes.extend(chunk),
            Err(ChunkError::Cancelled) => {
                return Err(SearchError::Timeout(options.timeout.unwrap_or_default()));
            }
            Err(ChunkError::Row {
                index,
                token,
                sentence,
                error,
            }) => {
                let row = sentences[..index].iter().map(|s| s.len()).sum::<usize>() + token;
                return Err(SearchError::Row {
                    sentence,
                    row,
                    source: error,
                });
            }
        }
    }
    Ok(outcomes)
}

/// Evaluate every row of one sentence; with `abort_on_error` the first row
/// error is returned as (token position, error)
fn evaluate_sentence(
    sentence: &Sentence,
    compiled: &CompiledQuery,
    abort_on_error: bool,
) -> Result<SentenceOutcome, (usize, EvalError)> {
    let mut outcome = SentenceOutcome::new(sentence);
    match compiled {
        CompiledQuery::Dependency(program) => evaluate_dependency(sentence, program, &mut outcome),
        CompiledQuery::Constituency(program) => evaluate_constituency(sentence, program, &mut outcome),
    }

    // No row to carry the diagnostic
    if sentence.is_empty() {
        for (_, error) in outcome.errors.drain(..) {
            warn!("Sentence {} has no tokens: {}", outcome.sentence, error);
        }
    }

    if let Some((token, error)) = outcome.errors.first() {
        if abort_on_error {
            return Err((*token, error.clone()));
        }
        for (token, error) in &outcome.errors {
            warn!("Sentence {} token {}: {}", outcome.sentence, token + 1, error);
        }
    }
    Ok(outcome)
}

fn evaluate_dependency(sentence: &Sentence, program: &Program<DepRelation>, outcome: &mut SentenceOutcome) {
    let graph = DepGraph::build(sentence);
    let mut vm = VM::new(&graph, program);

    for node in 0..graph.len() {
        match vm.matches(node) {
            Ok(true) => outcome.tags[node] = Some(1),
            Ok(false) => {}
            Err(error) => outcome.errors.push((node, error)),
        }
    }
    outcome.groups = usize::from(outcome.tags.iter().any(Option::is_some));
}

/// Tag the leaves under every matching tree position; later positions in
/// pre-order overwrite earlier tags
fn evaluate_constituency(sentence: &Sentence, program: &Program<TreeRelation>, outcome: &mut SentenceOutcome) {
    let Some(text) = sentence.constituency_tree() else {
        return;
    };
    let anchored = match PhraseTree::parse(text)
        .map_err(EvalError::from)
        .and_then(|tree| tree.anchor(sentence.tokens()))
    {
        Ok(anchored) => anchored,
        Err(error) => {
            outcome.errors.push((0, error));
            return;
        }
    };

    let mut vm = VM::new(&anchored, program);
    for position in 0..anchored.len() {
        match vm.matches(position) {
            Ok(true) => {
                outcome.groups += 1;
                for leaf in anchored.tree().leaf_span(position) {
                    outcome.tags[leaf] = Some(outcome.groups);
                }
            }
            Ok(false) => {}
            Err(error) => {
                let token = anchored.tree().leaf_span(position).start;
                outcome.errors.push((token.min(sentence.len().saturating_sub(1)), error));
            }
        }
    }
}

/// Concatenate sentence outcomes, numbering groups across the corpus
fn merge(outcomes: Vec<SentenceOutcome>, target: Target, inverse: bool) -> MatchResult {
    let mut diagnostics = Vec::new();
    let mut offset = 0;
    let mut group_base = 0;

    let total = outcomes.iter().map(|o| o.tags.len()).sum();
    let mut mask = Vec::with_capacity(total);
    let mut rows = Vec::new();

    for outcome in outcomes {
        for (token, error) in outcome.errors {
            diagnostics.push(Diagnostic {
                row: offset + token,
                sentence: outcome.sentence.clone(),
                error,
            });
        }

        for (token, tag) in outcome.tags.iter().enumerate() {
            let row = offset + token;
            match target {
                Target::Dependency => mask.push(tag.is_some() != inverse),
                Target::Constituency => match (tag, inverse) {
                    (Some(group), false) => rows.push(TaggedRow {
                        row,
                        group: Some(group_base + group),
                    }),
                    (None, true) => rows.push(TaggedRow { row, group: None }),
                    _ => {}
                },
            }
        }

        offset += outcome.tags.len();
        group_base += outcome.groups;
    }

    let matches = match target {
        Target::Dependency => Matches::Dependency(mask),
        Target::Constituency => Matches::Constituency { rows, total },
    };
    MatchResult {
        matches,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;
    use crate::tree::fixtures;

    fn corpus() -> Corpus {
        vec![fixtures::the_dog_barks(), fixtures::two_clauses()]
            .into_iter()
            .collect()
    }

    fn dep_rows(query: &str) -> Vec<usize> {
        search_query(&corpus(), query, &SearchOptions::default())
            .unwrap()
            .rows()
    }

    fn tgrep(sentences: Vec<Sentence>, query: &str, inverse: bool) -> MatchResult {
        let options = SearchOptions::default()
            .with_target(Target::Constituency)
            .with_inverse(inverse);
        search_query(&sentences, query, &options).unwrap()
    }

    fn dog_with_tree() -> Sentence {
        fixtures::the_dog_barks().with_constituency("(S (NP (DT The) (NN dog)) (VP (VBZ barks)) (. .))")
    }

    #[test]
    fn test_the_dog_barks() {
        // Rows: 0 The, 1 dog, 2 barks, 3 .
        assert_eq!(dep_rows(r#"p"VERB" -> f"nsubj""#), vec![2, 5, 9]);
        let rows = dep_rows(r#"p"NOUN" -> f"nsubj""#);
        assert!(!rows.contains(&1));
    }

    #[test]
    fn test_case_sensitivity() {
        let sentences = vec![fixtures::sentence(
            "c",
            &[("Dog", "dog", "NOUN", "0", "root"), ("dog", "dog", "NOUN", "1", "dep")],
        )];

        let exact = search_query(&sentences, r#"w"dog""#, &SearchOptions::default()).unwrap();
        assert_eq!(exact.rows(), vec![1]);

        let flagged = search_query(&sentences, r#"i@w"DOG""#, &SearchOptions::default()).unwrap();
        assert_eq!(flagged.rows(), vec![0, 1]);

        let options = SearchOptions::default().with_case_sensitive(false);
        let global = search_query(&sentences, r#"w"DOG""#, &options).unwrap();
        assert_eq!(global.rows(), vec![0, 1]);
    }

    #[test]
    fn test_negated_pattern_is_complement() {
        let corpus = corpus();
        let options = SearchOptions::default();
        let positive = search_query(&corpus, r#"l"eat" -> f"nsubj""#, &options).unwrap();
        let negative = search_query(&corpus, r#"!(l"eat" -> f"nsubj")"#, &options).unwrap();

        assert_eq!(positive.rows(), vec![5, 9]);
        let complement: Vec<bool> = positive.mask().iter().map(|hit| !hit).collect();
        assert_eq!(negative.mask(), complement);
    }

    #[test]
    fn test_inverse_partitions_rows() {
        let corpus = corpus();
        for query in [r#"p"NOUN""#, r#"* -> *"#, r#"f"punct" $ f"nsubj""#] {
            let options = SearchOptions::default();
            let hits = search_query(&corpus, query, &options).unwrap().mask();
            let misses = search_query(&corpus, query, &options.clone().with_inverse(true))
                .unwrap()
                .mask();

            assert_eq!(hits.len(), corpus.token_count());
            for (hit, miss) in hits.iter().zip(&misses) {
                assert_ne!(hit, miss, "query {}", query);
            }
        }
    }

    #[test]
    fn test_deterministic_across_threads_and_chunks() {
        let sentences: Vec<Sentence> = (0..50)
            .map(|i| {
                if i % 2 == 0 {
                    fixtures::the_dog_barks()
                } else {
                    fixtures::two_clauses()
                }
            })
            .collect();
        let corpus: Corpus = sentences.into_iter().collect();
        let query = r#"p"VERB" -> (f"nsubj" . *)"#;

        let baseline = search_query(&corpus, query, &SearchOptions::default()).unwrap();
        let parallel = search_query(
            &corpus,
            query,
            &SearchOptions::default().with_chunk_size(3).with_threads(4),
        )
        .unwrap();

        assert_eq!(baseline, parallel);
        assert_eq!(baseline.count(), 75);
    }

    #[test]
    fn test_macro_and_label_queries() {
        assert_eq!(
            dep_rows(r#"@SUBJ f"nsubj"; p"VERB" -> @SUBJ"#),
            dep_rows(r#"p"VERB" -> f"nsubj""#)
        );
        assert_eq!(
            dep_rows(r#"f"root"=r : r -> l"dog""#),
            dep_rows(r#"f"root"=head : =head -> l"dog""#)
        );
        assert_eq!(dep_rows(r#"f"root"=r : r -> l"dog""#), vec![2]);
    }

    #[test]
    fn test_labelled_segment_matches_like_nested_relation() {
        let nested = dep_rows(r#"w"eats" -> (* -> *)"#);
        assert_eq!(nested, vec![5]);
        assert_eq!(dep_rows(r#"w"eats" -> *=n : =n -> *"#), nested);
    }

    #[test]
    fn test_bar_and_semicolon_combine_patterns_alike() {
        let sentences = vec![fixtures::two_clauses()];
        let options = SearchOptions::default();

        let bar = search_query(&sentences, r#"w"She" -> * | w"pears""#, &options).unwrap();
        let semicolon = search_query(&sentences, r#"w"She" -> *; w"pears""#, &options).unwrap();
        assert_eq!(bar.rows(), vec![6]);
        assert_eq!(bar, semicolon);
    }

    #[test]
    fn test_compile_errors_abort_before_scan() {
        let result = search_query(&corpus(), r#"p"VERB" -> @MISSING"#, &SearchOptions::default());
        assert!(matches!(
            result,
            Err(SearchError::Compile(CompileError::UndefinedMacro { .. }))
        ));
    }

    #[test]
    fn test_malformed_rows_become_diagnostics() {
        let sentences = vec![
            fixtures::sentence(
                "bad",
                &[("a", "a", "X", "2", "dep"), ("b", "b", "X", "1", "dep")],
            ),
            fixtures::the_dog_barks(),
        ];

        let result = search_query(&sentences, r#"* <<- *"#, &SearchOptions::default()).unwrap();
        assert_eq!(result.mask(), vec![false, false, true, true, false, true]);
        assert_eq!(result.diagnostics.len(), 2);
        assert_eq!(result.diagnostics[0].row, 0);
        assert_eq!(result.diagnostics[0].sentence.sentence, "bad");
        assert!(matches!(
            result.diagnostics[1].error,
            EvalError::CycleDetected { .. }
        ));
    }

    #[test]
    fn test_abort_on_error() {
        let sentences = vec![
            fixtures::the_dog_barks(),
            fixtures::sentence("bad", &[("a", "a", "X", "7", "dep")]),
        ];
        let options = SearchOptions::default().with_abort_on_error(true);

        match search_query(&sentences, r#"* <- *"#, &options) {
            Err(SearchError::Row { sentence, row, source }) => {
                assert_eq!(sentence.sentence, "bad");
                assert_eq!(row, 4);
                assert_eq!(
                    source,
                    EvalError::DanglingGovernor {
                        index: 1,
                        governor: 7
                    }
                );
            }
            other => panic!("Expected row error, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout() {
        let sentences: Vec<Sentence> = (0..20).map(|_| fixtures::two_clauses()).collect();
        let options = SearchOptions::default()
            .with_timeout(Duration::ZERO)
            .with_chunk_size(1);

        let result = search_query(&sentences, r#"* ->> *"#, &options);
        assert!(matches!(result, Err(SearchError::Timeout(_))));
    }

    #[test]
    fn test_tgrep_np_scenario() {
        let result = tgrep(vec![dog_with_tree()], "NP", false);
        assert_eq!(
            result.matches,
            Matches::Constituency {
                rows: vec![
                    TaggedRow { row: 0, group: Some(1) },
                    TaggedRow { row: 1, group: Some(1) },
                ],
                total: 4,
            }
        );
        assert_eq!(result.mask(), vec![true, true, false, false]);
    }

    #[test]
    fn test_tgrep_inverse() {
        let result = tgrep(vec![dog_with_tree()], "NP", true);
        assert_eq!(
            result.matches,
            Matches::Constituency {
                rows: vec![
                    TaggedRow { row: 2, group: None },
                    TaggedRow { row: 3, group: None },
                ],
                total: 4,
            }
        );
    }

    #[test]
    fn test_tgrep_groups_are_global_and_last_wins() {
        let sentences = vec![dog_with_tree(), dog_with_tree()];

        // S and NP both match; NP comes later in pre-order and overwrites S on its leaves
        let result = tgrep(sentences, "S | NP", false);
        let groups: Vec<Option<usize>> = match &result.matches {
            Matches::Constituency { rows, .. } => rows.iter().map(|r| r.group).collect(),
            other => panic!("Expected constituency rows, got {:?}", other),
        };
        assert_eq!(
            groups,
            vec![Some(2), Some(2), Some(1), Some(1), Some(4), Some(4), Some(3), Some(3)]
        );
    }

    #[test]
    fn test_tgrep_relations_and_leaf_attributes() {
        let result = tgrep(vec![dog_with_tree()], r#"NP < (NN < l"dog")"#, false);
        assert_eq!(result.rows(), vec![0, 1]);

        let result = tgrep(vec![dog_with_tree()], r#"p"VERB""#, false);
        assert_eq!(result.rows(), vec![2]);

        let result = tgrep(vec![dog_with_tree()], r#"VP , NP"#, false);
        assert_eq!(result.rows(), vec![2]);
    }

    #[test]
    fn test_tgrep_bad_trees() {
        let sentences = vec![
            fixtures::the_dog_barks().with_constituency("(S (NP"),
            fixtures::the_dog_barks().with_constituency("(S (NN dog))"),
            fixtures::the_dog_barks(),
            dog_with_tree(),
        ];
        let result = tgrep(sentences, "NP", false);

        assert_eq!(result.rows(), vec![12, 13]);
        assert_eq!(result.diagnostics.len(), 2);
        assert!(matches!(result.diagnostics[0].error, EvalError::Tree(_)));
        assert_eq!(result.diagnostics[1].row, 4);
        assert!(matches!(
            result.diagnostics[1].error,
            EvalError::LeafMismatch { leaves: 1, tokens: 4 }
        ));
    }

    #[test]
    fn test_tree_errors_on_empty_sentences_stay_off_later_rows() {
        let sentences = vec![Sentence::default().with_constituency("(S (NN x))"), dog_with_tree()];

        let result = tgrep(sentences.clone(), "NP", false);
        assert_eq!(result.rows(), vec![0, 1]);
        assert!(result.diagnostics.is_empty());

        let options = SearchOptions::default()
            .with_target(Target::Constituency)
            .with_abort_on_error(true);
        assert!(search_query(&sentences, "NP", &options).is_ok());
    }

    #[test]
    fn test_search_with_precompiled_query() {
        let compiled = CompiledQuery::compile(r#"p"NOUN""#, Target::Dependency, true).unwrap();
        let corpus = corpus();
        let first = search(&corpus, &compiled, &SearchOptions::default()).unwrap();
        let second = search(&corpus, &compiled, &SearchOptions::default()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.rows(), vec![1, 6, 10]);
    }
}
