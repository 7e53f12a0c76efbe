//! Corpus data model
//!
//! A [`Sentence`] owns its tokens in order and, optionally, one bracketed
//! constituency tree whose leaves correspond to the tokens.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use crate::matcher::Attribute;

/// Head field of a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Governor {
    Root,
    /// Sentence-local (1-based) index of the governing token
    Index(usize),
    /// Field text that is not a token index
    Invalid(String),
}

impl Governor {
    pub fn parse(field: &str) -> Self {
        match field.trim().parse::<usize>() {
            Ok(0) => Governor::Root,
            Ok(index) => Governor::Index(index),
            Err(_) => Governor::Invalid(field.to_string()),
        }
    }
}

impl fmt::Display for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Governor::Root => f.write_str("0"),
            Governor::Index(index) => write!(f, "{}", index),
            Governor::Invalid(raw) => f.write_str(raw),
        }
    }
}

/// A single annotated token
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Corpus-wide sequence number
    pub seq: usize,
    /// Sentence-local index, 1-based
    pub index: usize,
    pub form: String,
    pub lemma: String,
    pub upos: String,
    pub xpos: String,
    pub feats: String,
    pub head: Governor,
    pub deprel: String,
    /// Remaining columns (`deps`, `misc`) and any caller-supplied fields
    pub extra: BTreeMap<String, String>,
}

impl Token {
    pub fn new(
        index: usize,
        form: &str,
        lemma: &str,
        upos: &str,
        head: Governor,
        deprel: &str,
    ) -> Self {
        Self {
            seq: 0,
            index,
            form: form.to_string(),
            lemma: lemma.to_string(),
            upos: upos.to_string(),
            xpos: "_".to_string(),
            feats: "_".to_string(),
            head,
            deprel: deprel.to_string(),
            extra: BTreeMap::new(),
        }
    }

    /// Field value for an attribute test
    pub fn attribute(&self, attribute: Attribute) -> Cow<'_, str> {
        match attribute {
            Attribute::Word | Attribute::Label => Cow::Borrowed(&self.form),
            Attribute::Lemma => Cow::Borrowed(&self.lemma),
            Attribute::Upos => Cow::Borrowed(&self.upos),
            Attribute::Xpos => Cow::Borrowed(&self.xpos),
            Attribute::Morph => Cow::Borrowed(&self.feats),
            Attribute::DepRel => Cow::Borrowed(&self.deprel),
            Attribute::Governor => match &self.head {
                Governor::Invalid(raw) => Cow::Borrowed(raw),
                head => Cow::Owned(head.to_string()),
            },
            Attribute::Index => Cow::Owned(self.index.to_string()),
            Attribute::Sequence => Cow::Owned(self.seq.to_string()),
        }
    }
}

/// Document and sentence identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SentenceId {
    pub document: String,
    pub sentence: String,
}

impl SentenceId {
    pub fn new(document: &str, sentence: &str) -> Self {
        Self {
            document: document.to_string(),
            sentence: sentence.to_string(),
        }
    }
}

impl fmt::Display for SentenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.document.is_empty() {
            f.write_str(&self.sentence)
        } else {
            write!(f, "{}/{}", self.document, self.sentence)
        }
    }
}

/// An ordered sequence of tokens sharing one identifier
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sentence {
    pub id: SentenceId,
    pub tokens: Vec<Token>,
    pub text: Option<String>,
    /// Bracketed phrase-structure tree over the tokens
    pub constituency: Option<String>,
}

impl Sentence {
    pub fn new(id: SentenceId, tokens: Vec<Token>) -> Self {
        Self {
            id,
            tokens,
            text: None,
            constituency: None,
        }
    }

    pub fn with_constituency(mut self, tree: &str) -> Self {
        self.constituency = Some(tree.to_string());
        self
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn constituency_tree(&self) -> Option<&str> {
        self.constituency.as_deref()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Assign consecutive sequence numbers starting at `first`; returns the
    /// next free number
    pub fn renumber(&mut self, first: usize) -> usize {
        for (offset, token) in self.tokens.iter_mut().enumerate() {
            token.seq = first + offset;
        }
        first + self.tokens.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governor_parse() {
        assert_eq!(Governor::parse("0"), Governor::Root);
        assert_eq!(Governor::parse("3"), Governor::Index(3));
        assert_eq!(Governor::parse("x"), Governor::Invalid("x".to_string()));
        assert_eq!(Governor::parse("-1"), Governor::Invalid("-1".to_string()));
        assert_eq!(Governor::Root.to_string(), "0");
        assert_eq!(Governor::Index(7).to_string(), "7");
    }

    #[test]
    fn test_token_attributes() {
        let mut token = Token::new(2, "dogs", "dog", "NOUN", Governor::Index(3), "nsubj");
        token.seq = 41;
        token.feats = "Number=Plur".to_string();

        assert_eq!(token.attribute(Attribute::Word), "dogs");
        assert_eq!(token.attribute(Attribute::Label), "dogs");
        assert_eq!(token.attribute(Attribute::Lemma), "dog");
        assert_eq!(token.attribute(Attribute::Upos), "NOUN");
        assert_eq!(token.attribute(Attribute::Xpos), "_");
        assert_eq!(token.attribute(Attribute::Morph), "Number=Plur");
        assert_eq!(token.attribute(Attribute::DepRel), "nsubj");
        assert_eq!(token.attribute(Attribute::Governor), "3");
        assert_eq!(token.attribute(Attribute::Index), "2");
        assert_eq!(token.attribute(Attribute::Sequence), "41");

        token.head = Governor::Invalid("??".to_string());
        assert_eq!(token.attribute(Attribute::Governor), "??");
    }

    #[test]
    fn test_renumber() {
        let mut sentence = fixtures::the_dog_barks();
        let next = sentence.renumber(10);

        assert_eq!(next, 14);
        let seqs: Vec<usize> = sentence.tokens().iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_sentence_accessors() {
        let sentence = fixtures::the_dog_barks().with_constituency("(S (NN dog))");
        assert_eq!(sentence.len(), 4);
        assert!(!sentence.is_empty());
        assert_eq!(sentence.constituency_tree(), Some("(S (NN dog))"));
        assert_eq!(sentence.id.to_string(), "doc/s1");
        assert_eq!(SentenceId::new("", "7").to_string(), "7");
    }
}
