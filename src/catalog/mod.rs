//! Server catalog: the ordered registry of known MCP servers.
//!
//! Descriptors are immutable once loaded. A catalog is replaced wholesale on
//! reload; components read it through a [`SharedCatalog`] snapshot so a
//! reload never exposes a half-built registry.

pub mod builtin;
pub mod descriptor;
pub mod errors;
pub mod loader;
pub mod registry;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub use descriptor::{LaunchSpec, ServerDescriptor};
pub use errors::CatalogError;
pub use registry::RegistryDiscovery;

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// Ordered set of server descriptors with a case-insensitive name index.
///
/// Insertion order is significant: it breaks recommendation ties.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    servers: Vec<Arc<ServerDescriptor>>,
    /// lowercase name → position in `servers`.
    by_name: HashMap<String, usize>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from descriptors. Later duplicates are dropped.
    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = ServerDescriptor>,
    {
        let mut catalog = Self::new();
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            if !catalog.push(descriptor) {
                tracing::warn!(server = %name, "duplicate catalog entry ignored");
            }
        }
        catalog
    }

    /// The curated built-in server list.
    pub fn builtin() -> Self {
        Self::from_descriptors(builtin::curated_servers())
    }

    /// Append a descriptor. Returns `false` if the name is already present.
    pub fn push(&mut self, descriptor: ServerDescriptor) -> bool {
        let key = descriptor.name.to_lowercase();
        if self.by_name.contains_key(&key) {
            return false;
        }
        self.by_name.insert(key, self.servers.len());
        self.servers.push(Arc::new(descriptor));
        true
    }

    /// Merge two catalogs: entries in `overrides` replace same-named entries
    /// of `base` in place; new names are appended in `overrides` order.
    pub fn merged(base: Catalog, overrides: Catalog) -> Catalog {
        let mut servers = base.servers;
        let mut by_name = base.by_name;

        for descriptor in overrides.servers {
            let key = descriptor.name.to_lowercase();
            match by_name.get(&key) {
                Some(&idx) => servers[idx] = descriptor,
                None => {
                    by_name.insert(key, servers.len());
                    servers.push(descriptor);
                }
            }
        }

        Catalog { servers, by_name }
    }

    /// Look up a descriptor by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&Arc<ServerDescriptor>> {
        self.by_name
            .get(&name.trim().to_lowercase())
            .and_then(|&idx| self.servers.get(idx))
    }

    /// Whether a server with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Descriptors in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServerDescriptor>> {
        self.servers.iter()
    }

    /// Server names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

// ─── SharedCatalog ───────────────────────────────────────────────────────────

/// Cloneable handle to the current catalog image.
///
/// Readers take a cheap `Arc` snapshot; `replace` swaps the whole image.
#[derive(Debug, Clone, Default)]
pub struct SharedCatalog {
    current: Arc<RwLock<Arc<Catalog>>>,
}

impl SharedCatalog {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(catalog))),
        }
    }

    /// Current catalog image.
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the catalog, returning the previous image.
    pub fn replace(&self, catalog: Catalog) -> Arc<Catalog> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(catalog))
    }

    /// Look up a descriptor in the current image.
    pub fn get(&self, name: &str) -> Option<Arc<ServerDescriptor>> {
        self.snapshot().get(name).cloned()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
