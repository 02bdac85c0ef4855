use tracing::debug;

use ragdb_core::config::ContextSettings;
use ragdb_core::types::{Chunk, Citation, ContextBundle, ContextChunk, FusedResult};

/// Packs fused results into a token-budgeted [`ContextBundle`].
///
/// Results are taken in rank order. A candidate whose span is already
/// covered by at least `overlap_dedup_ratio` by an included chunk of the same
/// document is dropped. A candidate that does not fit the remaining budget is
/// skipped, later smaller ones may still fit, and `truncated` is set.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    overlap_dedup_ratio: f64,
}

impl ContextAssembler {
    pub fn new(overlap_dedup_ratio: f64) -> Self {
        Self { overlap_dedup_ratio }
    }

    pub fn from_settings(settings: &ContextSettings) -> Self {
        Self::new(settings.overlap_dedup_ratio)
    }

    pub fn assemble(&self, results: &[FusedResult], token_budget: usize) -> ContextBundle {
        let mut bundle = ContextBundle::default();
        let mut duplicates = 0usize;

        for result in results {
            if self.is_redundant(&result.chunk, &bundle.ordered_chunks) {
                duplicates += 1;
                continue;
            }
            let tokens = result.chunk.token_count;
            if bundle.total_tokens + tokens > token_budget {
                bundle.truncated = true;
                continue;
            }
            bundle.total_tokens += tokens;
            bundle.ordered_chunks.push(ContextChunk {
                citation: Citation::from(&result.chunk),
                chunk: result.chunk.clone(),
                fused_score: result.fused_score,
                tokens,
            });
        }

        debug!(
            included = bundle.len(),
            duplicates,
            total_tokens = bundle.total_tokens,
            token_budget,
            truncated = bundle.truncated,
            "assembled context"
        );
        bundle
    }

    fn is_redundant(&self, candidate: &Chunk, included: &[ContextChunk]) -> bool {
        let span = candidate.span_len();
        included.iter().any(|item| {
            if item.chunk.chunk_id == candidate.chunk_id {
                return true;
            }
            let shared = candidate.overlap_len(&item.chunk);
            shared > 0 && shared as f64 >= self.overlap_dedup_ratio * span as f64
        })
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::from_settings(&ContextSettings::default())
    }
}
