//! Reranking of retrieved chunks
//!
//! Candidates arrive in vector-similarity order; a [`Reranker`] scores each
//! one against the query and the final order follows those scores. The
//! original similarity score is kept for comparison.

use crate::core::{RagError, Reranker, Result};

/// A candidate after reranking
#[derive(Debug, Clone, PartialEq)]
pub struct RankedItem<T> {
    /// The candidate
    pub item: T,
    /// Relevance score assigned by the reranker
    pub relevance_score: f32,
    /// Score the candidate had before reranking
    pub original_score: f32,
    /// `relevance_score - original_score`
    pub score_delta: f32,
}

/// Reject input a rerank service cannot score
pub fn validate_rerank_input(query: &str, documents: &[String]) -> Result<()> {
    if query.trim().is_empty() {
        return Err(RagError::Validation {
            message: "rerank query is empty".to_string(),
        });
    }
    if let Some(position) = documents.iter().position(|d| d.trim().is_empty()) {
        return Err(RagError::Validation {
            message: format!("rerank document {position} is empty"),
        });
    }
    Ok(())
}

/// Rerank `items` and keep the top `top_n` by relevance
///
/// `text` gives the document text sent to the service and `score` the
/// pre-rerank score. Items the service does not return are dropped.
pub async fn rerank_items<T, F, S>(
    reranker: &dyn Reranker,
    query: &str,
    items: Vec<T>,
    top_n: usize,
    text: F,
    score: S,
) -> Result<Vec<RankedItem<T>>>
where
    F: Fn(&T) -> String,
    S: Fn(&T) -> f32,
{
    if items.is_empty() || top_n == 0 {
        return Ok(Vec::new());
    }

    let documents: Vec<String> = items.iter().map(&text).collect();
    validate_rerank_input(query, &documents)?;

    let mut scores = reranker.rerank(query, &documents, top_n).await?;
    if let Some(bad) = scores.iter().find(|s| s.index >= items.len()) {
        return Err(RagError::Rerank {
            message: format!(
                "rerank service returned index {} for {} documents",
                bad.index,
                items.len()
            ),
        });
    }
    scores.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut ranked = Vec::with_capacity(top_n.min(scores.len()));
    for rerank_score in scores {
        if ranked.len() == top_n {
            break;
        }
        let Some(item) = slots[rerank_score.index].take() else {
            continue;
        };
        let original_score = score(&item);
        ranked.push(RankedItem {
            item,
            relevance_score: rerank_score.relevance_score,
            original_score,
            score_delta: rerank_score.relevance_score - original_score,
        });
    }

    tracing::debug!(
        candidates = documents.len(),
        kept = ranked.len(),
        "Reranked candidates"
    );
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_providers::ScriptedReranker;
    use crate::core::RerankScore;

    fn candidates() -> Vec<(&'static str, f32)> {
        vec![("C1", 0.9), ("C2", 0.8), ("C3", 0.7)]
    }

    #[tokio::test]
    async fn rerank_order_supersedes_similarity() {
        let reranker = ScriptedReranker::fixed(vec![
            RerankScore {
                index: 2,
                relevance_score: 0.95,
            },
            RerankScore {
                index: 0,
                relevance_score: 0.5,
            },
        ]);
        let ranked = rerank_items(
            &reranker,
            "query",
            candidates(),
            2,
            |c| c.0.to_string(),
            |c| c.1,
        )
        .await
        .unwrap();

        let order: Vec<&str> = ranked.iter().map(|r| r.item.0).collect();
        assert_eq!(order, vec!["C3", "C1"]);
        assert_eq!(ranked[0].original_score, 0.7);
        assert!((ranked[0].score_delta - 0.25).abs() < 1e-6);
    }

    #[tokio::test]
    async fn out_of_range_index_fails() {
        let reranker = ScriptedReranker::fixed(vec![RerankScore {
            index: 7,
            relevance_score: 1.0,
        }]);
        let result = rerank_items(&reranker, "q", candidates(), 2, |c| c.0.to_string(), |c| c.1).await;
        assert!(matches!(result, Err(RagError::Rerank { .. })));
    }

    #[tokio::test]
    async fn empty_document_fails_fast() {
        let reranker = ScriptedReranker::fixed(vec![]);
        let items = vec![("", 0.5)];
        let result = rerank_items(&reranker, "q", items, 1, |c| c.0.to_string(), |c| c.1).await;
        assert!(matches!(result, Err(RagError::Validation { .. })));
        assert!(reranker.calls().is_empty());
    }

    #[test]
    fn blank_query_is_invalid() {
        assert!(validate_rerank_input(" ", &["doc".to_string()]).is_err());
    }
}
