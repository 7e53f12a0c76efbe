//! CoNLL-U file parsing
//!
//! Parses CoNLL-U text into [`Sentence`]s. Multiword-token ranges and empty
//! nodes are skipped, so every sentence holds exactly its surface tokens.
//! Files ending in `.gz` are decompressed on the fly.
//!
//! Recognised comments: `# sent_id`, `# newdoc id`, `# text`, and
//! `# constituency` (or `# parse`) holding a bracketed tree over the tokens.
//!
//! CoNLL-U format: https://universaldependencies.org/format.html

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Lines};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use thiserror::Error;

use crate::tree::{Governor, Sentence, SentenceId, Token};

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Parse error at line {line_num}: {message}")]
    Format { line_num: usize, message: String },

    #[error("I/O error at line {line_num}: {source}")]
    Io {
        line_num: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Token ID column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenId {
    Single(usize),
    /// Multiword token `1-2`
    Range(usize, usize),
    /// Empty node `2.1`
    Decimal(usize, usize),
}

/// CoNLL-U reader that iterates over sentences
pub struct CoNLLUReader<R: BufRead> {
    lines: Lines<R>,
    line_num: usize,
    /// Next corpus-wide sequence number
    next_seq: usize,
    document: String,
    sentences_read: usize,
}

impl<R: BufRead> CoNLLUReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_num: 0,
            next_seq: 0,
            document: String::new(),
            sentences_read: 0,
        }
    }
}

impl CoNLLUReader<Box<dyn BufRead>> {
    /// Create a reader from a file path, decompressing `.gz` files
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let reader: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self::new(reader))
    }
}

impl CoNLLUReader<Cursor<String>> {
    /// Create a reader from a string
    pub fn from_str(text: &str) -> Self {
        Self::new(Cursor::new(text.to_string()))
    }
}

/// Lines collected for one sentence
#[derive(Default)]
struct Block {
    tokens: Vec<(usize, String)>,
    sent_id: Option<String>,
    text: Option<String>,
    constituency: Option<String>,
}

impl<R: BufRead> Iterator for CoNLLUReader<R> {
    type Item = Result<Sentence, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut block = Block::default();

        // Read lines until we hit a blank line (sentence boundary) or EOF
        loop {
            self.line_num += 1;
            match self.lines.next() {
                None => {
                    if block.tokens.is_empty() {
                        return None;
                    }
                    break;
                }
                Some(Err(source)) => {
                    return Some(Err(ReadError::Io {
                        line_num: self.line_num,
                        source,
                    }));
                }
                Some(Ok(line)) => {
                    let line = line.trim_end_matches(['\r', '\n']);

                    if line.trim().is_empty() {
                        if !block.tokens.is_empty() {
                            break;
                        }
                        // Comments without tokens belong to nothing
                        block = Block::default();
                        continue;
                    }

                    if let Some(comment) = line.strip_prefix('#') {
                        self.parse_comment(comment, &mut block);
                        continue;
                    }

                    block.tokens.push((self.line_num, line.to_string()));
                }
            }
        }

        Some(self.build_sentence(block))
    }
}

impl<R: BufRead> CoNLLUReader<R> {
    fn parse_comment(&mut self, comment: &str, block: &mut Block) {
        let Some((key, value)) = comment.split_once('=') else {
            if comment.trim() == "newdoc" {
                self.document.clear();
            }
            return;
        };
        let value = value.trim();

        match key.trim() {
            "sent_id" => block.sent_id = Some(value.to_string()),
            "newdoc id" => self.document = value.to_string(),
            "text" => block.text = Some(value.to_string()),
            "constituency" | "parse" => block.constituency = Some(value.to_string()),
            _ => {}
        }
    }

    fn build_sentence(&mut self, block: Block) -> Result<Sentence, ReadError> {
        self.sentences_read += 1;

        let mut tokens = Vec::with_capacity(block.tokens.len());
        for (line_num, line) in &block.tokens {
            if let Some(token) = parse_line(line, *line_num)? {
                tokens.push(token);
            }
        }

        let id = SentenceId {
            document: self.document.clone(),
            sentence: block
                .sent_id
                .unwrap_or_else(|| self.sentences_read.to_string()),
        };
        let mut sentence = Sentence::new(id, tokens);
        sentence.text = block.text;
        sentence.constituency = block.constituency;
        self.next_seq = sentence.renumber(self.next_seq);

        Ok(sentence)
    }
}

/// Parse a token line; `None` for multiword tokens and empty nodes
fn parse_line(line: &str, line_num: usize) -> Result<Option<Token>, ReadError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 10 {
        return Err(ReadError::Format {
            line_num,
            message: format!("Expected 10 fields, found {}", fields.len()),
        });
    }

    let index = match parse_id(fields[0], line_num)? {
        TokenId::Single(index) => index,
        TokenId::Range(..) | TokenId::Decimal(..) => return Ok(None),
    };

    let mut extra = BTreeMap::new();
    for (key, value) in [("deps", fields[8]), ("misc", fields[9])] {
        if value != "_" {
            extra.insert(key.to_string(), value.to_string());
        }
    }

    Ok(Some(Token {
        seq: 0,
        index,
        form: fields[1].to_string(),
        lemma: fields[2].to_string(),
        upos: fields[3].to_string(),
        xpos: fields[4].to_string(),
        feats: fields[5].to_string(),
        head: Governor::parse(fields[6]),
        deprel: fields[7].to_string(),
        extra,
    }))
}

fn parse_id(s: &str, line_num: usize) -> Result<TokenId, ReadError> {
    let invalid = || ReadError::Format {
        line_num,
        message: format!("Invalid token ID: {}", s),
    };
    let number = |part: &str| part.parse::<usize>().map_err(|_| invalid());

    if let Some((start, end)) = s.split_once('-') {
        Ok(TokenId::Range(number(start)?, number(end)?))
    } else if let Some((major, minor)) = s.split_once('.') {
        Ok(TokenId::Decimal(number(major)?, number(minor)?))
    } else {
        Ok(TokenId::Single(number(s)?))
    }
}
