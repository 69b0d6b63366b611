//! Definition registry.
//!
//! Built once through [`RegistryBuilder`] and shared read-only afterward.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::definition::{MutationDefinition, QueryDefinition};

/// Errors raised while building a registry.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two queries share a name.
    #[error("query '{0}' is registered twice")]
    DuplicateQuery(String),
    /// Two mutations share a name.
    #[error("mutation '{0}' is registered twice")]
    DuplicateMutation(String),
    /// A mutation invalidates a query that is not registered.
    #[error("mutation '{mutation}' invalidates unknown query '{query}'")]
    UnknownInvalidationTarget {
        /// Mutation declaring the target.
        mutation: String,
        /// Missing query.
        query: String,
    },
}

/// Immutable collection of named queries and mutations.
pub struct DefinitionRegistry<C> {
    queries: BTreeMap<String, Arc<QueryDefinition<C>>>,
    mutations: BTreeMap<String, Arc<MutationDefinition<C>>>,
}

impl<C> DefinitionRegistry<C> {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder<C> {
        RegistryBuilder::new()
    }

    /// Look up a query.
    pub fn query(&self, name: &str) -> Option<&Arc<QueryDefinition<C>>> {
        self.queries.get(name)
    }

    /// Look up a mutation.
    pub fn mutation(&self, name: &str) -> Option<&Arc<MutationDefinition<C>>> {
        self.mutations.get(name)
    }

    /// Registered query names, sorted.
    pub fn query_names(&self) -> Vec<&str> {
        self.queries.keys().map(String::as_str).collect()
    }

    /// Registered mutation names, sorted.
    pub fn mutation_names(&self) -> Vec<&str> {
        self.mutations.keys().map(String::as_str).collect()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty() && self.mutations.is_empty()
    }
}

impl<C> fmt::Debug for DefinitionRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("queries", &self.query_names())
            .field("mutations", &self.mutation_names())
            .finish()
    }
}

/// Collects definitions and validates them as a whole.
pub struct RegistryBuilder<C> {
    queries: Vec<QueryDefinition<C>>,
    mutations: Vec<MutationDefinition<C>>,
}

impl<C> RegistryBuilder<C> {
    /// Empty builder.
    pub fn new() -> Self {
        Self {
            queries: Vec::new(),
            mutations: Vec::new(),
        }
    }

    /// Add a query.
    #[must_use]
    pub fn query(mut self, definition: QueryDefinition<C>) -> Self {
        self.queries.push(definition);
        self
    }

    /// Add a mutation.
    #[must_use]
    pub fn mutation(mut self, definition: MutationDefinition<C>) -> Self {
        self.mutations.push(definition);
        self
    }

    /// Freeze the registry.
    ///
    /// Names must be unique per kind and every invalidation target must name
    /// a registered query.
    pub fn build(self) -> Result<DefinitionRegistry<C>, RegistryError> {
        let mut queries = BTreeMap::new();
        for def in self.queries {
            let name = def.name().to_owned();
            if queries.insert(name.clone(), Arc::new(def)).is_some() {
                return Err(RegistryError::DuplicateQuery(name));
            }
        }

        let mut mutations = BTreeMap::new();
        for def in self.mutations {
            for target in def.invalidated_queries() {
                if !queries.contains_key(target) {
                    return Err(RegistryError::UnknownInvalidationTarget {
                        mutation: def.name().to_owned(),
                        query: target.to_owned(),
                    });
                }
            }
            let name = def.name().to_owned();
            if mutations.insert(name.clone(), Arc::new(def)).is_some() {
                return Err(RegistryError::DuplicateMutation(name));
            }
        }

        Ok(DefinitionRegistry { queries, mutations })
    }
}

impl<C> Default for RegistryBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}
