//! Reciprocal rank fusion of the lexical and vector result lists.
//!
//! `rrf(d) = Σ 1 / (c + rank_s(d))` over the sources `s` that returned `d`,
//! with 1-based ranks. Optional recency and authority boosts multiply the sum.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use ragdb_core::config::RetrievalSettings;
use ragdb_core::types::{ChunkId, FusedResult, RankedHit, SourceKind};

#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    pub rank_constant: f64,
    pub recency_weight: f64,
    pub recency_half_life_days: f64,
    pub authority_key: Option<String>,
    pub authority_weight: f64,
}

impl FusionConfig {
    pub fn from_settings(settings: &RetrievalSettings) -> Self {
        Self {
            rank_constant: settings.rank_constant,
            recency_weight: settings.recency_weight,
            recency_half_life_days: settings.recency_half_life_days,
            authority_key: settings.authority_key.clone(),
            authority_weight: settings.authority_weight,
        }
    }

    /// Plain RRF with no boosts.
    pub fn rrf_only(rank_constant: f64) -> Self {
        Self {
            rank_constant,
            recency_weight: 0.0,
            recency_half_life_days: 30.0,
            authority_key: None,
            authority_weight: 0.0,
        }
    }

    fn boost(&self, result: &FusedResult, now: DateTime<Utc>) -> f64 {
        let mut factor = 1.0;
        if self.recency_weight > 0.0 {
            if let Some(at) = result.chunk.ingested_at() {
                let age_days = (now - at).num_seconds().max(0) as f64 / 86_400.0;
                factor *= 1.0 + self.recency_weight * 0.5f64.powf(age_days / self.recency_half_life_days);
            }
        }
        if self.authority_weight > 0.0 {
            let authority = self
                .authority_key
                .as_deref()
                .and_then(|key| result.chunk.metadata.get(key))
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .map(|v| v.clamp(0.0, 1.0));
            if let Some(authority) = authority {
                factor *= 1.0 + self.authority_weight * authority;
            }
        }
        factor
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self::from_settings(&RetrievalSettings::default())
    }
}

pub fn reciprocal_rank_fusion(
    lexical: Vec<RankedHit>,
    vector: Vec<RankedHit>,
    config: &FusionConfig,
    now: DateTime<Utc>,
) -> Vec<FusedResult> {
    debug!(lexical = lexical.len(), vector = vector.len(), "rrf fusion");

    let mut fused: HashMap<ChunkId, FusedResult> = HashMap::new();
    accumulate(&mut fused, lexical, SourceKind::Lexical);
    accumulate(&mut fused, vector, SourceKind::Vector);

    let mut results: Vec<FusedResult> = fused
        .into_values()
        .map(|mut r| {
            let rrf = [r.lexical_rank, r.vector_rank]
                .into_iter()
                .flatten()
                .map(|rank| 1.0 / (config.rank_constant + rank as f64))
                .sum::<f64>();
            r.fused_score = rrf * config.boost(&r, now);
            r
        })
        .collect();

    results.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
    results
}

fn accumulate(fused: &mut HashMap<ChunkId, FusedResult>, hits: Vec<RankedHit>, source: SourceKind) {
    for (i, hit) in hits.into_iter().enumerate() {
        let rank = i + 1;
        let entry = fused.entry(hit.chunk_id.clone()).or_insert_with(|| FusedResult {
            chunk_id: hit.chunk_id,
            fused_score: 0.0,
            contributing_sources: BTreeSet::new(),
            lexical_rank: None,
            vector_rank: None,
            chunk: hit.chunk,
        });
        entry.contributing_sources.insert(source);
        // A source listing the same chunk twice keeps its best rank.
        let slot = match source {
            SourceKind::Lexical => &mut entry.lexical_rank,
            SourceKind::Vector => &mut entry.vector_rank,
        };
        if slot.is_none() {
            *slot = Some(rank);
        }
    }
}
