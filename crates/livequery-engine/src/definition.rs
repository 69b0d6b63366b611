//! Query and mutation definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use livequery_core::{AnySchema, BoxError, Schema, Typed};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::handler::{
    Authorizer, AuthorizerFn, Handler, HandlerFn, InvalidationTarget, TargetFn, TargetParams,
    TypedHandler,
};

/// A named read operation.
pub struct QueryDefinition<C> {
    name: String,
    schema: Arc<dyn Schema>,
    handler: Arc<dyn Handler<C>>,
    authorizer: Option<Arc<dyn Authorizer<C>>>,
}

impl<C: Send + Sync + 'static> QueryDefinition<C> {
    /// Define a query from a schema and a handler implementation.
    pub fn new(
        name: impl Into<String>,
        schema: impl Schema + 'static,
        handler: impl Handler<C> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            handler: Arc::new(handler),
            authorizer: None,
        }
    }

    /// Define a query from a schema and an async closure over JSON params.
    pub fn from_fn<F, Fut>(name: impl Into<String>, schema: impl Schema + 'static, f: F) -> Self
    where
        F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self::new(name, schema, HandlerFn(f))
    }

    /// Define a query whose params are validated by deserializing into `P`.
    pub fn typed<P, R, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        P: DeserializeOwned + Serialize + Send + 'static,
        R: Serialize + 'static,
        F: Fn(P, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        Self::new(name, Typed::<P>::new(), TypedHandler::new(f))
    }

    /// Define a query that ignores its params.
    pub fn unparameterized<R, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        R: Serialize + 'static,
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(
            name,
            AnySchema,
            HandlerFn(move |_params: Value, ctx: Arc<C>| {
                let f = Arc::clone(&f);
                async move { Ok::<_, BoxError>(serde_json::to_value(f(ctx).await?)?) }
            }),
        )
    }

    /// Attach an authorization predicate.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: impl Authorizer<C> + 'static) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    /// Attach an authorization predicate from an async closure.
    #[must_use]
    pub fn authorize<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        self.with_authorizer(AuthorizerFn(f))
    }
}

impl<C> QueryDefinition<C> {
    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn schema(&self) -> &dyn Schema {
        self.schema.as_ref()
    }

    pub(crate) fn handler(&self) -> &dyn Handler<C> {
        self.handler.as_ref()
    }

    pub(crate) fn authorizer(&self) -> Option<&dyn Authorizer<C>> {
        self.authorizer.as_deref()
    }
}

impl<C> fmt::Debug for QueryDefinition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDefinition")
            .field("name", &self.name)
            .field("authorized", &self.authorizer.is_some())
            .finish_non_exhaustive()
    }
}

/// Target query name to the function computing its stale params.
pub type InvalidationMap = BTreeMap<String, Arc<dyn InvalidationTarget>>;

/// A named write operation with the queries it makes stale.
pub struct MutationDefinition<C> {
    name: String,
    schema: Arc<dyn Schema>,
    handler: Arc<dyn Handler<C>>,
    authorizer: Option<Arc<dyn Authorizer<C>>>,
    invalidates: InvalidationMap,
}

impl<C: Send + Sync + 'static> MutationDefinition<C> {
    /// Define a mutation from a schema and a handler implementation.
    pub fn new(
        name: impl Into<String>,
        schema: impl Schema + 'static,
        handler: impl Handler<C> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            handler: Arc::new(handler),
            authorizer: None,
            invalidates: BTreeMap::new(),
        }
    }

    /// Define a mutation from a schema and an async closure over JSON params.
    pub fn from_fn<F, Fut>(name: impl Into<String>, schema: impl Schema + 'static, f: F) -> Self
    where
        F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self::new(name, schema, HandlerFn(f))
    }

    /// Define a mutation whose params are validated by deserializing into `P`.
    pub fn typed<P, R, F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        P: DeserializeOwned + Serialize + Send + 'static,
        R: Serialize + 'static,
        F: Fn(P, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        Self::new(name, Typed::<P>::new(), TypedHandler::new(f))
    }

    /// Attach an authorization predicate.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: impl Authorizer<C> + 'static) -> Self {
        self.authorizer = Some(Arc::new(authorizer));
        self
    }

    /// Attach an authorization predicate from an async closure.
    #[must_use]
    pub fn authorize<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        self.with_authorizer(AuthorizerFn(f))
    }

    /// Mark `query` stale after this mutation. A later call for the same
    /// query replaces the earlier one.
    #[must_use]
    pub fn invalidates_with(
        mut self,
        query: impl Into<String>,
        target: impl InvalidationTarget + 'static,
    ) -> Self {
        let _ = self.invalidates.insert(query.into(), Arc::new(target));
        self
    }

    /// Mark `query` stale, computing its params with an async closure over
    /// `(mutation params, mutation result)`.
    #[must_use]
    pub fn invalidates<F, Fut, T>(self, query: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Into<TargetParams> + 'static,
    {
        self.invalidates_with(query, TargetFn(f))
    }

    /// Mark the parameterless instance of `query` stale.
    #[must_use]
    pub fn invalidates_all(self, query: impl Into<String>) -> Self {
        self.invalidates(query, |_params: Value, _result: Value| async {
            Ok::<_, BoxError>(TargetParams::none())
        })
    }
}

impl<C> MutationDefinition<C> {
    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the queries this mutation invalidates, sorted.
    pub fn invalidated_queries(&self) -> impl Iterator<Item = &str> {
        self.invalidates.keys().map(String::as_str)
    }

    pub(crate) fn schema(&self) -> &dyn Schema {
        self.schema.as_ref()
    }

    pub(crate) fn handler(&self) -> &dyn Handler<C> {
        self.handler.as_ref()
    }

    pub(crate) fn authorizer(&self) -> Option<&dyn Authorizer<C>> {
        self.authorizer.as_deref()
    }

    pub(crate) fn invalidation_map(&self) -> &InvalidationMap {
        &self.invalidates
    }
}

impl<C> fmt::Debug for MutationDefinition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationDefinition")
            .field("name", &self.name)
            .field("authorized", &self.authorizer.is_some())
            .field("invalidates", &self.invalidates.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
