//! Lineage resolution for inheritance widening.
//!
//! Each event type declares its widening lineage through
//! [`Event::widened`]; this module dedupes the declared walk and freezes it
//! so the posting loop can iterate it without recomputation. The cache is
//! shared across bus instances since lineages are pure type data.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::types::{Event, EventTypeId};

/// Memoizes the frozen lineage of each event type.
pub(crate) struct LineageCache {
    entries: Mutex<HashMap<TypeId, Arc<[EventTypeId]>>>,
}

impl LineageCache {
    pub(crate) fn new() -> Self {
        LineageCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the deduplicated lineage of `E`, computing and freezing it
    /// on first lookup.
    ///
    /// The declared walk order is preserved; the first element is always
    /// `E` itself even if an implementation forgot to lead with it.
    pub(crate) fn lineage_of<E: Event>(&self) -> Arc<[EventTypeId]> {
        let key = TypeId::of::<E>();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(lineage) = entries.get(&key) {
            return lineage.clone();
        }

        let own = EventTypeId::of::<E>();
        let mut lineage = vec![own];
        for ty in E::widened() {
            if !lineage.contains(&ty) {
                lineage.push(ty);
            }
        }
        let frozen: Arc<[EventTypeId]> = lineage.into();
        entries.insert(key, frozen.clone());
        frozen
    }
}

/// The process-wide lineage cache.
pub(crate) fn global() -> &'static LineageCache {
    static CACHE: Lazy<LineageCache> = Lazy::new(LineageCache::new);
    &CACHE
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Root;
    impl Event for Root {}

    struct Mid;
    impl Event for Mid {
        fn widened() -> Vec<EventTypeId> {
            let mut types = vec![EventTypeId::of::<Self>()];
            types.extend(Root::widened());
            types
        }
    }

    struct Leaf;
    impl Event for Leaf {
        fn widened() -> Vec<EventTypeId> {
            let mut types = vec![EventTypeId::of::<Self>()];
            types.extend(Mid::widened());
            types
        }
    }

    // Declares Root twice through two branches.
    struct Diamond;
    impl Event for Diamond {
        fn widened() -> Vec<EventTypeId> {
            let mut types = vec![EventTypeId::of::<Self>()];
            types.extend(Mid::widened());
            types.extend(Root::widened());
            types
        }
    }

    #[test]
    fn leaf_lineage_is_transitive_and_leads_with_self() {
        let cache = LineageCache::new();
        let lineage = cache.lineage_of::<Leaf>();
        assert_eq!(lineage.len(), 3);
        assert_eq!(lineage[0], EventTypeId::of::<Leaf>());
        assert!(lineage.contains(&EventTypeId::of::<Mid>()));
        assert!(lineage.contains(&EventTypeId::of::<Root>()));
    }

    #[test]
    fn default_lineage_is_just_the_type() {
        let cache = LineageCache::new();
        let lineage = cache.lineage_of::<Root>();
        assert_eq!(&*lineage, &[EventTypeId::of::<Root>()]);
    }

    #[test]
    fn duplicate_declarations_are_deduped() {
        let cache = LineageCache::new();
        let lineage = cache.lineage_of::<Diamond>();
        assert_eq!(lineage.len(), 3);
        let roots = lineage
            .iter()
            .filter(|ty| **ty == EventTypeId::of::<Root>())
            .count();
        assert_eq!(roots, 1);
    }

    #[test]
    fn lookups_are_memoized() {
        let cache = LineageCache::new();
        let first = cache.lineage_of::<Leaf>();
        let second = cache.lineage_of::<Leaf>();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
