//! Query-side operations: nearest-neighbor search, subtree-restricted
//! search, and LLM confidence ranking of the returned documents.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::error::{IndexError, Result};
use crate::extract;
use crate::llm::{self, DocConfidence, Generator};
use crate::store::MetadataStore;
use crate::vector::{VectorIndex, NO_RESULT};

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub path: String,
    /// Squared L2 distance, smaller is closer.
    pub distance: f32,
}

/// Embed the query and return up to `top_k` hits, closest first. With a
/// prefix, only records under that directory are candidates. An empty
/// index or an empty candidate set yields no hits rather than an error;
/// the stores are never mutated here.
pub async fn run_search(
    store: &MetadataStore,
    index: &Arc<RwLock<VectorIndex>>,
    embedder: &dyn Embedder,
    query: &str,
    top_k: usize,
    prefix: Option<&Path>,
) -> Result<Vec<SearchHit>> {
    let query_vec = embedder.embed(query).await?;

    let (ids, distances) = {
        let index = index.read().await;
        let result = match prefix {
            Some(dir) => {
                // Stored paths are canonical, so the prefix must be too
                // or the LIKE pattern matches nothing.
                let dir = match std::fs::canonicalize(dir) {
                    Ok(d) => d,
                    Err(e) => {
                        debug!(prefix = %dir.display(), error = %e, "prefix does not resolve");
                        return Ok(Vec::new());
                    }
                };
                let allowed = store.list_ids_under_prefix(&dir.to_string_lossy()).await?;
                if allowed.is_empty() {
                    debug!(prefix = %dir.display(), "no records under prefix");
                    return Ok(Vec::new());
                }
                index.search_subset(&query_vec, top_k, &allowed)
            }
            None => index.search(&query_vec, top_k),
        };
        match result {
            Ok(pair) => pair,
            Err(IndexError::EmptyIndex) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
    };

    // Sentinel rows mark the padded tail; everything before it is real.
    let real_ids: Vec<i64> = ids.iter().copied().take_while(|id| *id != NO_RESULT).collect();
    let paths = store.resolve_paths_by_ids(&real_ids).await?;

    Ok(real_ids
        .iter()
        .zip(distances.iter())
        .zip(paths)
        .filter_map(|((id, dist), path)| {
            path.map(|p| SearchHit {
                id: *id,
                path: p,
                distance: *dist,
            })
        })
        .collect())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RankedHit {
    #[serde(flatten)]
    pub hit: SearchHit,
    /// 0 to 100, from the model.
    pub confidence: u8,
    pub context: String,
}

/// Search, then ask the LLM to score each hit's document against the
/// query. Hits whose file can no longer be read are dropped before
/// ranking. Output is ordered by confidence descending.
pub async fn search_and_rank(
    store: &MetadataStore,
    index: &Arc<RwLock<VectorIndex>>,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    query: &str,
    top_k: usize,
    prefix: Option<&Path>,
) -> Result<Vec<RankedHit>> {
    let hits = run_search(store, index, embedder, query, top_k, prefix).await?;
    if hits.is_empty() {
        return Ok(Vec::new());
    }

    let mut docs = Vec::with_capacity(hits.len());
    let mut kept = Vec::with_capacity(hits.len());
    for hit in hits {
        match extract::extract_text(Path::new(&hit.path)) {
            Ok(text) => {
                docs.push((hit.path.clone(), text));
                kept.push(hit);
            }
            Err(e) => {
                warn!(path = %hit.path, error = %e, "hit unreadable, dropped from ranking");
            }
        }
    }

    let scored = llm::rank_confidence(generator, query, &docs, llm::DEFAULT_RANK_TOKENS).await?;

    let mut ranked: Vec<RankedHit> = kept
        .into_iter()
        .zip(scored)
        .map(|(hit, DocConfidence { confidence, context, .. })| RankedHit {
            hit,
            confidence,
            context,
        })
        .collect();
    ranked.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    Ok(ranked)
}
