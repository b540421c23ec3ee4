// Element repository: stored element records keyed by id, ranked by text similarity.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::{LocatorError, LocatorResult};
use crate::locator::element::UiElement;
use crate::rag::embedder::{cosine, Embedder, HashingEmbedder};

#[async_trait]
pub trait ElementRepository: Send + Sync {
    async fn get(&self, id: &str) -> LocatorResult<Option<UiElement>>;

    /// Store a new record; an existing id is an error.
    async fn insert(&self, element: UiElement) -> LocatorResult<()>;

    /// Swap the stored record with the same id for `element`.
    async fn replace(&self, element: UiElement) -> LocatorResult<()>;

    /// Up to `top_n` records scoring at least `min_score`, best first.
    async fn retrieve_candidates(
        &self,
        text: &str,
        top_n: usize,
        min_score: f32,
    ) -> LocatorResult<Vec<(UiElement, f32)>>;
}

struct Entry {
    element: UiElement,
    vector: Vec<f32>,
}

/// Text a record is indexed under.
fn index_text(element: &UiElement) -> String {
    [
        element.name.as_str(),
        element.description.as_str(),
        element.location_details.as_str(),
        element.page_summary.as_str(),
    ]
    .join(" ")
}

pub struct InMemoryElementRepository {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryElementRepository {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryElementRepository {
    fn default() -> Self {
        Self::new(Arc::new(HashingEmbedder::default()))
    }
}

#[async_trait]
impl ElementRepository for InMemoryElementRepository {
    async fn get(&self, id: &str) -> LocatorResult<Option<UiElement>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.element.id == id).map(|e| e.element.clone()))
    }

    async fn insert(&self, element: UiElement) -> LocatorResult<()> {
        let vector = self.embedder.embed(&index_text(&element)).await?;
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.element.id == element.id) {
            return Err(LocatorError::Repository(format!(
                "element id '{}' already stored",
                element.id
            )));
        }
        tracing::debug!(id = %element.id, name = %element.name, "element stored");
        entries.push(Entry { element, vector });
        Ok(())
    }

    async fn replace(&self, element: UiElement) -> LocatorResult<()> {
        let vector = self.embedder.embed(&index_text(&element)).await?;
        let mut entries = self.entries.write().await;
        let Some(slot) = entries.iter_mut().find(|e| e.element.id == element.id) else {
            return Err(LocatorError::Repository(format!(
                "no element with id '{}' to replace",
                element.id
            )));
        };
        tracing::debug!(id = %element.id, "element replaced");
        *slot = Entry { element, vector };
        Ok(())
    }

    async fn retrieve_candidates(
        &self,
        text: &str,
        top_n: usize,
        min_score: f32,
    ) -> LocatorResult<Vec<(UiElement, f32)>> {
        if text.trim().is_empty() {
            return Err(LocatorError::InvalidInput("empty retrieval query".into()));
        }
        let query = self.embedder.embed(text).await?;
        let entries = self.entries.read().await;
        let mut ranked: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine(&query, &e.vector)))
            .filter(|(_, s)| *s >= min_score)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(top_n);
        tracing::debug!(query = text, hits = ranked.len(), "element candidates retrieved");
        Ok(ranked
            .into_iter()
            .map(|(i, s)| (entries[i].element.clone(), s))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (InMemoryElementRepository, UiElement, UiElement) {
        let repo = InMemoryElementRepository::default();
        let save = UiElement::new("save", "Save button in the editor toolbar");
        let search = UiElement::new("search", "Search field on the login page");
        repo.insert(save.clone()).await.unwrap();
        repo.insert(search.clone()).await.unwrap();
        (repo, save, search)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (repo, save, _) = seeded().await;
        assert_eq!(repo.len().await, 2);
        let got = repo.get(&save.id).await.unwrap().unwrap();
        assert_eq!(got.description, save.description);
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (repo, save, _) = seeded().await;
        let err = repo.insert(save).await.unwrap_err();
        assert!(matches!(err, LocatorError::Repository(_)));
    }

    #[tokio::test]
    async fn test_replace_by_id() {
        let (repo, save, _) = seeded().await;
        let refined = save.with_location_details("left of the Undo icon");
        repo.replace(refined).await.unwrap();
        let got = repo.get(&save.id).await.unwrap().unwrap();
        assert_eq!(got.location_details, "left of the Undo icon");
        assert_eq!(repo.len().await, 2);

        let err = repo.replace(UiElement::new("new", "never stored")).await.unwrap_err();
        assert!(matches!(err, LocatorError::Repository(_)));
    }

    #[tokio::test]
    async fn test_retrieve_ranks_best_first() {
        let (repo, save, search) = seeded().await;
        let hits = repo.retrieve_candidates("save button", 5, 0.0).await.unwrap();
        assert_eq!(hits[0].0.id, save.id);
        assert!(hits.iter().all(|(_, s)| *s >= 0.0));

        let hits = repo.retrieve_candidates("login search field", 1, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, search.id);
    }

    #[tokio::test]
    async fn test_min_score_filters() {
        let (repo, _, _) = seeded().await;
        let hits = repo.retrieve_candidates("save button", 5, 0.99).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let repo = InMemoryElementRepository::default();
        assert!(repo.retrieve_candidates(" ", 3, 0.0).await.is_err());
    }
}
