use std::collections::{BTreeMap, HashMap};

///
/// TitleCache
///
/// Session-scoped map from `(entity type, id)` to the record's display
/// title. Saves and deletes invalidate the whole type.
///

#[derive(Debug, Default)]
pub struct TitleCache {
    titles: HashMap<String, BTreeMap<String, Option<String>>>,
}

impl TitleCache {
    #[must_use]
    pub fn get(&self, entity: &str, id: &str) -> Option<&Option<String>> {
        self.titles.get(entity)?.get(id)
    }

    pub fn insert(&mut self, entity: &str, id: String, title: Option<String>) {
        self.titles
            .entry(entity.to_string())
            .or_default()
            .insert(id, title);
    }

    pub fn invalidate(&mut self, entity: &str) {
        if self.titles.remove(entity).is_some() {
            tracing::trace!(entity, "title cache invalidated");
        }
    }

    pub fn clear(&mut self) {
        self.titles.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.titles.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidation_is_per_type() {
        let mut cache = TitleCache::default();
        cache.insert("customer", "1".into(), Some("Acme".into()));
        cache.insert("customer", "2".into(), None);
        cache.insert("invoice", "9".into(), Some("INV-9".into()));

        assert_eq!(cache.get("customer", "1"), Some(&Some("Acme".to_string())));
        assert_eq!(cache.get("customer", "2"), Some(&None));
        assert_eq!(cache.len(), 3);

        cache.invalidate("customer");
        assert_eq!(cache.get("customer", "1"), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
