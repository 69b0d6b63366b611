//! Query execution: validate, authorize, run, and optionally publish.

use std::sync::Arc;

use livequery_core::{Transport, UPDATE_EVENT, channel_name};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::definition::QueryDefinition;
use crate::errors::{DefinitionKind, EngineError};
use crate::pipeline::{self, Stages};
use crate::registry::DefinitionRegistry;

/// A recomputed query result and the channel it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryOutcome {
    /// Handler result.
    pub result: Value,
    /// Channel for the query's parsed params.
    pub channel: String,
}

/// Per-element result of a batched recomputation.
pub type InvalidationOutcome = Result<QueryOutcome, EngineError>;

/// Runs queries from the registry.
pub struct QueryExecutor<C> {
    registry: Arc<DefinitionRegistry<C>>,
    transport: Arc<dyn Transport>,
}

impl<C> Clone for QueryExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<C: Send + Sync + 'static> QueryExecutor<C> {
    /// Executor over `registry` publishing through `transport`.
    pub fn new(registry: Arc<DefinitionRegistry<C>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Run `name` with `raw` params. The handler only runs after validation
    /// and, when `with_auth` is set, a successful authorization.
    pub async fn execute(
        &self,
        name: &str,
        raw: &Value,
        ctx: Arc<C>,
        with_auth: bool,
    ) -> Result<Value, EngineError> {
        self.run(name, raw, ctx, with_auth)
            .await
            .map(|(_, result)| result)
    }

    /// Run `name` with authorization and return the result with the channel
    /// the caller should subscribe to.
    pub async fn execute_with_channel(
        &self,
        name: &str,
        raw: &Value,
        ctx: Arc<C>,
    ) -> Result<QueryOutcome, EngineError> {
        let (params, result) = self.run(name, raw, ctx, true).await?;
        Ok(QueryOutcome {
            channel: channel_name(name, &params),
            result,
        })
    }

    /// Recompute without authorization and publish the result on its channel.
    pub async fn invalidate(
        &self,
        name: &str,
        raw: &Value,
        ctx: Arc<C>,
    ) -> Result<Value, EngineError> {
        self.recompute_and_publish(name, raw, ctx)
            .await
            .map(|outcome| outcome.result)
    }

    /// Recompute without authorization and return the result for a later
    /// batched publish. Nothing is sent to the transport.
    pub async fn batch_invalidate(
        &self,
        name: &str,
        raw: &Value,
        ctx: Arc<C>,
    ) -> InvalidationOutcome {
        let (params, result) = self.run(name, raw, ctx, false).await?;
        Ok(QueryOutcome {
            channel: channel_name(name, &params),
            result,
        })
    }

    /// The transport this executor publishes through.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) async fn recompute_and_publish(
        &self,
        name: &str,
        raw: &Value,
        ctx: Arc<C>,
    ) -> Result<QueryOutcome, EngineError> {
        let outcome = self.batch_invalidate(name, raw, ctx).await?;
        self.transport
            .broadcast(&outcome.channel, UPDATE_EVENT, &outcome.result)
            .await
            .map_err(|source| EngineError::Broadcast {
                channel: outcome.channel.clone(),
                source,
            })?;
        debug!(query = name, channel = %outcome.channel, "published update");
        Ok(outcome)
    }

    #[instrument(skip_all, fields(query = name, with_auth = with_auth))]
    async fn run(
        &self,
        name: &str,
        raw: &Value,
        ctx: Arc<C>,
        with_auth: bool,
    ) -> Result<(Value, Value), EngineError> {
        let def = self.lookup(name)?;
        let stages = Stages {
            name,
            schema: def.schema(),
            authorizer: def.authorizer(),
            handler: def.handler(),
        };
        pipeline::run(stages, raw, ctx, with_auth).await
    }

    fn lookup(&self, name: &str) -> Result<&Arc<QueryDefinition<C>>, EngineError> {
        self.registry
            .query(name)
            .ok_or_else(|| EngineError::UnknownDefinition {
                kind: DefinitionKind::Query,
                name: name.to_owned(),
            })
    }
}
