//! Similarity search over text extracted from uploaded documents.
//!
//! Documents are stored in SQLite. With an embedding provider, queries are
//! ranked by cosine similarity against stored vectors; without one (or when
//! embedding the query fails) a token-overlap score is used instead.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::{call_blocking, now_timestamp, Database, IndexedDocument};
use crate::embedding::EmbeddingProvider;
use crate::error::VidharaError;

#[derive(Debug, Clone)]
pub struct Snippet {
    pub file_id: String,
    pub file_name: String,
    pub content: String,
    pub score: f32,
}

#[derive(Clone)]
pub struct DocumentIndex {
    db: Arc<Database>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl DocumentIndex {
    pub fn new(db: Arc<Database>, embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { db, embedder }
    }

    pub async fn add_document(
        &self,
        content: &str,
        file_id: &str,
        file_name: &str,
    ) -> Result<String, VidharaError> {
        let (embedding, embedding_model) = match &self.embedder {
            Some(embedder) => {
                let vector = embedder
                    .embed(content)
                    .await
                    .map_err(|e| VidharaError::Embedding(e.to_string()))?;
                (Some(vector), Some(embedder.model().to_string()))
            }
            None => (None, None),
        };

        let doc = IndexedDocument {
            id: uuid::Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            content: content.to_string(),
            embedding,
            embedding_model,
            created_at: now_timestamp(),
        };
        let id = doc.id.clone();
        call_blocking(self.db.clone(), move |db| db.insert_document(&doc)).await?;
        debug!(doc_id = %id, file_id, "Indexed document");
        Ok(id)
    }

    /// Top `k` stored documents for `query`, best first. Documents with no
    /// overlap at all are never returned.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<Snippet>, VidharaError> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let docs = call_blocking(self.db.clone(), |db| db.list_documents()).await?;
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = match &self.embedder {
            Some(embedder) => match embedder.embed(query).await {
                Ok(v) => Some((v, embedder.model().to_string())),
                Err(e) => {
                    warn!(error = %e, "Query embedding failed, using lexical ranking");
                    None
                }
            },
            None => None,
        };

        let mut scored: Vec<Snippet> = docs
            .into_iter()
            .filter_map(|doc| {
                let score = match (&query_vector, &doc.embedding) {
                    (Some((qv, model)), Some(dv))
                        if doc.embedding_model.as_deref() == Some(model.as_str())
                            && qv.len() == dv.len() =>
                    {
                        cosine_similarity(qv, dv)
                    }
                    _ => lexical_score(&doc.content, query),
                };
                (score > 0.0).then(|| Snippet {
                    file_id: doc.file_id,
                    file_name: doc.file_name,
                    content: doc.content,
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| w.chars().count() > 1)
        .collect()
}

/// Fraction of the query's distinct tokens that also appear in `content`.
fn lexical_score(content: &str, query: &str) -> f32 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens = tokenize(content);
    let hits = query_tokens
        .iter()
        .filter(|t| content_tokens.contains(*t))
        .count();
    hits as f32 / query_tokens.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct AxisEmbedder;

    /// Maps text onto two axes: tenancy words and criminal-law words.
    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let t = text.to_lowercase();
            let tenancy = ["rent", "lease", "tenant"]
                .iter()
                .filter(|w| t.contains(*w))
                .count() as f32;
            let criminal = ["fir", "ipc", "cheating"]
                .iter()
                .filter(|w| t.contains(*w))
                .count() as f32;
            Ok(vec![tenancy, criminal])
        }

        fn model(&self) -> &str {
            "axis"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn test_db() -> (Arc<Database>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("vidharini_rag_{}", uuid::Uuid::new_v4()));
        let db = Database::new(dir.to_str().unwrap()).unwrap();
        (Arc::new(db), dir)
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_lexical_score() {
        assert_eq!(lexical_score("The lease says rent is due", "rent lease"), 1.0);
        assert_eq!(lexical_score("The lease says", "rent lease"), 0.5);
        assert_eq!(lexical_score("unrelated", "rent"), 0.0);
        assert_eq!(lexical_score("anything", "a"), 0.0);
    }

    #[tokio::test]
    async fn test_lexical_search_ranks_and_limits() {
        let (db, dir) = test_db();
        let index = DocumentIndex::new(db, None);
        index
            .add_document("The tenant must pay rent monthly under the lease.", "f1", "lease.pdf")
            .await
            .unwrap();
        index
            .add_document("FIR registered under IPC 420 for cheating.", "f2", "fir.png")
            .await
            .unwrap();
        index
            .add_document("Rent receipts for March.", "f3", "receipt.png")
            .await
            .unwrap();

        let hits = index.search("lease rent dispute", 3).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].file_id, "f1");
        assert_eq!(hits[1].file_id, "f3");

        let hits = index.search("lease rent dispute", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_embedding_search() {
        let (db, dir) = test_db();
        let index = DocumentIndex::new(db, Some(Arc::new(AxisEmbedder)));
        index
            .add_document("Lease agreement between landlord and tenant", "f1", "lease.pdf")
            .await
            .unwrap();
        index
            .add_document("Complaint alleging cheating under IPC", "f2", "complaint.pdf")
            .await
            .unwrap();

        let hits = index.search("my landlord won't return the rent deposit", 3).await.unwrap();
        assert_eq!(hits[0].file_name, "lease.pdf");
        assert!(hits.iter().all(|h| h.file_id != "f2"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let (db, dir) = test_db();
        let index = DocumentIndex::new(db, None);
        assert!(index.search("anything", 3).await.unwrap().is_empty());
        assert!(index.search("   ", 3).await.unwrap().is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }
}
