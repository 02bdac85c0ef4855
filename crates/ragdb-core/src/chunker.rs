//! Boundary-aware sliding-window chunker.
//!
//! A token is a maximal run of non-whitespace characters. Windows hold at most
//! `max_tokens` tokens and consecutive windows share exactly `overlap` tokens.
//! Each window ends at the latest paragraph break it can reach, else the latest
//! sentence end, else a hard cut at `max_tokens`. Byte offsets are contiguous:
//! a window runs up to the first byte of the next token after it, so the union
//! of all windows is the whole text.

use crate::error::{Error, Result};
use crate::types::{Chunk, Document, META_CHUNK_INDEX, META_INGESTED_AT, META_SOURCE_URI};

/// A chunk position before ids and metadata are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
    /// Index of the first token of the window.
    pub first_token: usize,
    pub token_count: usize,
}

pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn chunk(text: &str, max_tokens: usize, overlap: usize) -> Result<Vec<ChunkSpan>> {
    if max_tokens == 0 {
        return Err(Error::Chunking("max_tokens must be > 0".into()));
    }
    if overlap >= max_tokens {
        return Err(Error::Chunking(format!("overlap {overlap} must be smaller than max_tokens {max_tokens}")));
    }
    if text.contains('\0') {
        return Err(Error::Chunking("text contains NUL bytes; expected extracted plain text".into()));
    }

    let tokens = token_spans(text);
    let n = tokens.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    if n <= max_tokens {
        return Ok(vec![ChunkSpan { start: 0, end: text.len(), first_token: 0, token_count: n }]);
    }

    let mut spans = Vec::new();
    let mut s = 0;
    loop {
        let hard_end = (s + max_tokens).min(n);
        let e = if hard_end == n { n } else { best_break(text, &tokens, s + overlap, hard_end) };
        let start = if s == 0 { 0 } else { tokens[s].0 };
        let end = if e == n { text.len() } else { tokens[e].0 };
        spans.push(ChunkSpan { start, end, first_token: s, token_count: e - s });
        if e == n {
            break;
        }
        s = e - overlap;
    }
    Ok(spans)
}

/// Chunk a document and attach ids and inherited metadata.
pub fn build_chunks(doc: &Document, max_tokens: usize, overlap: usize) -> Result<Vec<Chunk>> {
    let spans = chunk(&doc.text, max_tokens, overlap)?;
    let ingested_at = doc.ingested_at.to_rfc3339();
    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(chunk_index, span)| {
            let text = doc.text[span.start..span.end].to_string();
            let mut metadata = doc.metadata.clone();
            metadata.insert(META_SOURCE_URI.to_string(), doc.source_uri.clone());
            metadata.insert(META_INGESTED_AT.to_string(), ingested_at.clone());
            metadata.insert(META_CHUNK_INDEX.to_string(), format!("{chunk_index:06}"));
            Chunk {
                chunk_id: Chunk::id_for(&doc.doc_id, span.start, span.end, &text),
                doc_id: doc.doc_id.clone(),
                text,
                offset_start: span.start,
                offset_end: span.end,
                chunk_index,
                token_count: span.token_count,
                embedding: None,
                metadata,
            }
        })
        .collect())
}

fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Latest cut position in `(lo, hi]`; a cut at `b` ends the window before token `b`.
fn best_break(text: &str, tokens: &[(usize, usize)], lo: usize, hi: usize) -> usize {
    let gap = |b: usize| &text[tokens[b - 1].1..tokens[b].0];
    let candidates = || (lo + 1..=hi).rev();

    if let Some(b) = candidates().find(|&b| gap(b).matches('\n').count() >= 2) {
        return b;
    }
    if let Some(b) = candidates().find(|&b| ends_sentence(&text[tokens[b - 1].0..tokens[b - 1].1]) || gap(b).contains('\n')) {
        return b;
    }
    hi
}

fn ends_sentence(token: &str) -> bool {
    let trimmed = token.trim_end_matches(['"', '\'', ')', ']', '»', '”']);
    trimmed.ends_with(['.', '!', '?', '…', '؟', '。'])
}
