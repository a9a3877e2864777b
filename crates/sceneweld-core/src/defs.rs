//! Annotation-definition resolution.
//!
//! Extraction must turn every annotation descriptor it meets into an
//! [`AnnotationDef`]. Where the schema comes from is the caller's business
//! (a classpath scanner, a fixed table, a stub index), so resolution is a
//! trait, [`DefResolver`], and the engines consume it through a
//! [`DefCatalog`] that adds the process-wide name→definition cache.
//! Resolution is pure, so the cache is shareable across a parallel batch
//! driver via `Arc`; recomputing an entry is harmless.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::annotation::AnnotationDef;

/// Supplies annotation schemas by dotted binary type name.
pub trait DefResolver: Send + Sync {
    /// Resolve `type_name` to its definition, or `None` when the type is
    /// unknown to this resolver.
    fn resolve(&self, type_name: &str) -> Option<AnnotationDef>;
}

impl<F> DefResolver for F
where
    F: Fn(&str) -> Option<AnnotationDef> + Send + Sync,
{
    fn resolve(&self, type_name: &str) -> Option<AnnotationDef> {
        self(type_name)
    }
}

/// A resolver plus the cache of definitions already resolved.
pub struct DefCatalog {
    resolver: Box<dyn DefResolver>,
    cache: Mutex<HashMap<String, Arc<AnnotationDef>>>,
}

impl std::fmt::Debug for DefCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self.cache.lock().unwrap_or_else(|e| e.into_inner()).len();
        f.debug_struct("DefCatalog").field("cached", &cached).finish()
    }
}

impl DefCatalog {
    /// Wrap a resolver.
    pub fn new(resolver: impl DefResolver + 'static) -> Self {
        DefCatalog {
            resolver: Box::new(resolver),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// A catalog over a fixed set of definitions; anything else is
    /// unresolvable. Convenient for drivers with a known annotation
    /// universe, and for tests.
    pub fn fixed(defs: impl IntoIterator<Item = AnnotationDef>) -> Self {
        let table: HashMap<String, AnnotationDef> =
            defs.into_iter().map(|d| (d.name.clone(), d)).collect();
        DefCatalog::new(move |name: &str| table.get(name).cloned())
    }

    /// Resolve `type_name`, consulting the cache first.
    pub fn lookup(&self, type_name: &str) -> Option<Arc<AnnotationDef>> {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(def) = cache.get(type_name) {
                return Some(def.clone());
            }
        }
        let def = Arc::new(self.resolver.resolve(type_name)?);
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        Some(cache.entry(type_name.to_string()).or_insert(def).clone())
    }

    /// Remember a definition the resolver could not supply (used for
    /// synthesized stand-ins, so later sightings agree).
    pub fn remember(&self, def: Arc<AnnotationDef>) -> Arc<AnnotationDef> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.entry(def.name.clone()).or_insert(def).clone()
    }
}
