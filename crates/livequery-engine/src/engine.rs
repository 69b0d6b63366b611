//! The assembled engine.

use std::sync::Arc;

use livequery_core::Transport;

use crate::config::EngineConfig;
use crate::fanout::FanoutEngine;
use crate::mutation::MutationExecutor;
use crate::query::QueryExecutor;
use crate::registry::DefinitionRegistry;
use crate::sink::{FanoutSink, TracingSink};

/// Query and mutation executors sharing one registry and transport.
pub struct Engine<C> {
    registry: Arc<DefinitionRegistry<C>>,
    queries: QueryExecutor<C>,
    mutations: MutationExecutor<C>,
    config: EngineConfig,
}

impl<C> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            queries: self.queries.clone(),
            mutations: self.mutations.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: Send + Sync + 'static> Engine<C> {
    /// Engine with the default config, logging fan-out reports.
    pub fn new(registry: DefinitionRegistry<C>, transport: Arc<dyn Transport>) -> Self {
        Self::with_options(
            registry,
            transport,
            EngineConfig::default(),
            Arc::new(TracingSink),
        )
    }

    /// Engine with an explicit config and fan-out sink.
    pub fn with_options(
        registry: DefinitionRegistry<C>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
        sink: Arc<dyn FanoutSink>,
    ) -> Self {
        let registry = Arc::new(registry);
        let queries = QueryExecutor::new(Arc::clone(&registry), transport);
        let fanout = FanoutEngine::new(queries.clone(), config.clone());
        let mutations = MutationExecutor::new(Arc::clone(&registry), fanout, sink);
        Self {
            registry,
            queries,
            mutations,
            config,
        }
    }

    /// Query executor.
    pub fn queries(&self) -> &QueryExecutor<C> {
        &self.queries
    }

    /// Mutation executor.
    pub fn mutations(&self) -> &MutationExecutor<C> {
        &self.mutations
    }

    /// Registered definitions.
    pub fn registry(&self) -> &DefinitionRegistry<C> {
        &self.registry
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Wait for background fan-outs to finish.
    pub async fn drain(&self) {
        self.mutations.drain().await;
    }
}
