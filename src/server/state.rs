use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::context::CallContext;
use crate::proto::{Entity, Filter};
use crate::{Error, Result};

/// In-memory catalog keyed by entity id.
#[derive(Clone, Default)]
pub struct EntityStore {
    entities: Arc<RwLock<HashMap<String, Entity>>>,
}

impl EntityStore {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a copy of `entity`, rejecting ids already present.
    pub async fn save(&self, entity: &Entity) -> Result<()> {
        let mut entities = self.entities.write().await;

        if entities.contains_key(&entity.id) {
            return Err(Error::AlreadyExists(format!("Entity '{}'", entity.id)));
        }

        entities.insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    /// Returns a copy of the entity with `id`, if any.
    pub async fn find(&self, id: &str) -> Option<Entity> {
        let entities = self.entities.read().await;
        entities.get(id).cloned()
    }

    /// Returns copies of every entity matching `filter`.
    ///
    /// Works on a snapshot taken under the read lock; the context is checked
    /// before each candidate so a cancelled search stops early.
    pub async fn search(&self, ctx: &CallContext, filter: &Filter) -> Result<Vec<Entity>> {
        let snapshot: Vec<Entity> = self.entities.read().await.values().cloned().collect();

        let mut found = Vec::new();
        for entity in snapshot {
            ctx.check()?;

            if is_qualified(filter, &entity) {
                found.push(entity);
            }
        }

        Ok(found)
    }

    /// Returns the number of stored entities.
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    /// Returns `true` if the catalog is empty.
    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

/// Returns `true` if `entity` satisfies every bound set in `filter`.
///
/// Zero bounds are treated as unset.
pub fn is_qualified(filter: &Filter, entity: &Entity) -> bool {
    if filter.max_price_usd > 0.0 && entity.price_usd > filter.max_price_usd {
        return false;
    }
    if entity.cpu_cores < filter.min_cpu_cores {
        return false;
    }
    if entity.cpu_ghz < filter.min_cpu_ghz {
        return false;
    }
    entity.ram_gb >= filter.min_ram_gb
}

/// Running rating aggregate of one entity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rating {
    /// Number of scores applied so far.
    pub count: u32,
    /// Sum of all applied scores.
    pub sum: f64,
}

impl Rating {
    /// Mean score, or `None` before the first rating.
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

/// Owner of every entity's rating aggregate.
///
/// The whole map sits behind one lock, so concurrent streams rating the same
/// entity apply their updates one at a time.
#[derive(Clone, Default)]
pub struct RatingStore {
    ratings: Arc<RwLock<HashMap<String, Rating>>>,
}

impl RatingStore {
    /// Creates an empty rating store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `score` to the entity's aggregate and returns the updated value.
    pub async fn add(&self, entity_id: &str, score: f64) -> Rating {
        let mut ratings = self.ratings.write().await;

        let rating = ratings.entry(entity_id.to_string()).or_default();
        rating.count = rating.count.saturating_add(1);
        rating.sum += score;
        *rating
    }

    /// Returns the current aggregate of an entity.
    pub async fn get(&self, entity_id: &str) -> Option<Rating> {
        self.ratings.read().await.get(entity_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, price: f64, cores: u32, ghz: f64, ram: u32) -> Entity {
        Entity {
            id: id.to_string(),
            brand: "Acme".to_string(),
            name: format!("model-{id}"),
            cpu_cores: cores,
            cpu_ghz: ghz,
            ram_gb: ram,
            price_usd: price,
            release_year: 2024,
        }
    }

    #[tokio::test]
    async fn save_rejects_duplicate_id() {
        let store = EntityStore::new();
        store.save(&entity("a", 1000.0, 4, 2.5, 8)).await.unwrap();

        let err = store.save(&entity("a", 10.0, 1, 1.0, 1)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(store.find("a").await.unwrap().price_usd, 1000.0);
    }

    #[tokio::test]
    async fn search_applies_filter() {
        let store = EntityStore::new();
        store.save(&entity("cheap", 900.0, 4, 2.6, 8)).await.unwrap();
        store.save(&entity("pricey", 4000.0, 8, 3.2, 32)).await.unwrap();
        store.save(&entity("weak", 500.0, 2, 1.8, 4)).await.unwrap();

        let filter = Filter {
            max_price_usd: 3000.0,
            min_cpu_cores: 4,
            min_cpu_ghz: 2.5,
            min_ram_gb: 8,
        };

        let found = store
            .search(&CallContext::background(), &filter)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "cheap");
    }

    #[tokio::test]
    async fn search_stops_when_cancelled() {
        let store = EntityStore::new();
        store.save(&entity("a", 1.0, 1, 1.0, 1)).await.unwrap();

        let ctx = CallContext::background();
        ctx.cancel();

        let result = store.search(&ctx, &Filter::default()).await;
        assert!(matches!(result, Err(Error::Canceled)));
    }

    #[tokio::test]
    async fn ratings_accumulate() {
        let store = RatingStore::new();
        assert!(store.get("a").await.is_none());

        store.add("a", 4.0).await;
        let rating = store.add("a", 8.0).await;

        assert_eq!(rating.count, 2);
        assert_eq!(rating.sum, 12.0);
        assert_eq!(rating.average(), Some(6.0));
        assert_eq!(Rating::default().average(), None);
    }

    #[tokio::test]
    async fn concurrent_ratings_are_not_lost() {
        let store = RatingStore::new();

        let handles = (0..50u32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.add("shared", f64::from(i)).await })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.await.unwrap();
        }

        let rating = store.get("shared").await.unwrap();
        assert_eq!(rating.count, 50);
        assert_eq!(rating.sum, (0..50u32).map(f64::from).sum::<f64>());
    }
}
