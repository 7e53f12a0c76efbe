//! Sentence collections
//!
//! [`CorpusProvider`] is what the searcher consumes: an ordered sequence of
//! sentences. [`Corpus`] is the in-memory implementation, built directly or
//! loaded from CoNLL-U files.

use std::path::{Path, PathBuf};

use log::warn;

use crate::conllu::{CoNLLUReader, ReadError};
use crate::tree::Sentence;

/// Ordered source of sentences
pub trait CorpusProvider {
    fn sentences(&self) -> impl Iterator<Item = &Sentence>;
}

impl CorpusProvider for [Sentence] {
    fn sentences(&self) -> impl Iterator<Item = &Sentence> {
        self.iter()
    }
}

impl CorpusProvider for Vec<Sentence> {
    fn sentences(&self) -> impl Iterator<Item = &Sentence> {
        self.iter()
    }
}

/// In-memory corpus with corpus-wide token sequence numbers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    sentences: Vec<Sentence>,
    next_seq: usize,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sentence, renumbering its tokens after the last one
    pub fn push(&mut self, mut sentence: Sentence) {
        self.next_seq = sentence.renumber(self.next_seq);
        self.sentences.push(sentence);
    }

    /// Parse CoNLL-U text, failing on the first malformed sentence
    pub fn from_conllu_str(text: &str) -> Result<Self, ReadError> {
        let mut corpus = Self::new();
        for sentence in CoNLLUReader::from_str(text) {
            corpus.push(sentence?);
        }
        Ok(corpus)
    }

    /// Load CoNLL-U files in the given order
    ///
    /// Unreadable files and malformed sentences are logged and skipped.
    pub fn from_paths<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Self {
        let mut corpus = Self::new();
        for path in paths {
            corpus.load_file(path.as_ref());
        }
        corpus
    }

    /// Load every file in a directory whose name ends in `.conllu` or
    /// `.conllu.gz`, in sorted order
    pub fn from_dir(dir: &Path) -> std::io::Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(".conllu") || name.ends_with(".conllu.gz"))
            })
            .collect();
        paths.sort();
        Ok(Self::from_paths(paths))
    }

    fn load_file(&mut self, path: &Path) {
        let reader = match CoNLLUReader::from_file(path) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Failed to open {:?}: {}", path, e);
                return;
            }
        };
        for result in reader {
            match result {
                Ok(sentence) => self.push(sentence),
                Err(e) => warn!("Skipping sentence in {:?}: {}", path, e),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Total number of tokens (result rows)
    pub fn token_count(&self) -> usize {
        self.next_seq
    }

    pub fn get(&self, index: usize) -> Option<&Sentence> {
        self.sentences.get(index)
    }
}

impl CorpusProvider for Corpus {
    fn sentences(&self) -> impl Iterator<Item = &Sentence> {
        self.sentences.iter()
    }
}

impl FromIterator<Sentence> for Corpus {
    fn from_iter<I: IntoIterator<Item = Sentence>>(iter: I) -> Self {
        let mut corpus = Self::new();
        for sentence in iter {
            corpus.push(sentence);
        }
        corpus
    }
}
