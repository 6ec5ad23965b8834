//! Recursive character text splitting with overlap
//!
//! Text is split on the first separator it contains, pieces that are still too
//! large are split again with the remaining separators, and the small pieces
//! are merged back greedily into chunks of at most `chunk_size` characters.
//! Each new chunk starts with the tail of the previous one (at most
//! `chunk_overlap` characters). Sizes are counted in Unicode scalar values.

use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};

/// Recursive character splitter
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    /// Splitter with the default separators: paragraph, line, word, character
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::with_separators(
            chunk_size,
            chunk_overlap,
            ["\n\n", "\n", " ", ""].into_iter().map(String::from).collect(),
        )
    }

    /// Splitter with custom separators, tried in order.
    ///
    /// Without a trailing `""` a single unsplittable piece larger than
    /// `chunk_size` is emitted whole.
    pub fn with_separators(
        chunk_size: usize,
        chunk_overlap: usize,
        separators: Vec<String>,
    ) -> Result<Self> {
        let config = ChunkingConfig {
            chunk_size,
            chunk_overlap,
            separators,
        };
        Self::from_config(&config)
    }

    /// Build from configuration
    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        config.validate().map_err(|e| match e {
            Error::Config(msg) => Error::config(format!("Invalid splitter settings: {}", msg)),
            other => other,
        })?;

        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separators: config.separators.clone(),
        })
    }

    /// Split one text into chunks
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split every segment of a loaded file, concatenating the chunks in
    /// segment order. A missing segment list stays missing.
    pub fn split_segments(&self, segments: Option<&[String]>) -> Option<Vec<String>> {
        segments.map(|segments| {
            segments
                .iter()
                .flat_map(|segment| self.split_text(segment))
                .collect()
        })
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];

        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let splits: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut small: Vec<&str> = Vec::new();

        for piece in splits {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }

            if !small.is_empty() {
                chunks.extend(self.merge_splits(&small, separator));
                small.clear();
            }

            if remaining.is_empty() {
                // Nothing left to split on: keep the piece whole
                if let Some(piece) = clean(piece) {
                    chunks.push(piece);
                }
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !small.is_empty() {
            chunks.extend(self.merge_splits(&small, separator));
        }

        chunks
    }

    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in splits {
            let len = char_len(piece);
            let joined_len = |current: &VecDeque<&str>, total: usize| {
                total + len + if current.is_empty() { 0 } else { separator_len }
            };

            if joined_len(&current, total) > self.chunk_size {
                if total > self.chunk_size {
                    tracing::warn!(
                        "Created a chunk of {} characters, longer than the limit of {}",
                        total,
                        self.chunk_size
                    );
                }

                if !current.is_empty() {
                    if let Some(chunk) = join(&current, separator) {
                        chunks.push(chunk);
                    }

                    // Keep the tail as overlap for the next chunk
                    while total > self.chunk_overlap
                        || (total > 0 && joined_len(&current, total) > self.chunk_size)
                    {
                        let Some(front) = current.pop_front() else {
                            break;
                        };
                        let dropped = char_len(front)
                            + if current.is_empty() { 0 } else { separator_len };
                        total = total.saturating_sub(dropped);
                    }
                }
            }

            total += len + if current.is_empty() { 0 } else { separator_len };
            current.push_back(piece);
        }

        if let Some(chunk) = join(&current, separator) {
            chunks.push(chunk);
        }

        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn clean(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn join(pieces: &VecDeque<&str>, separator: &str) -> Option<String> {
    let mut out = String::new();
    for (i, piece) in pieces.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        out.push_str(piece);
    }
    clean(&out)
}
