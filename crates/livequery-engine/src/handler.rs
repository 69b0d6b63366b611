//! Caller-supplied behavior: handlers, authorization predicates and
//! invalidation targets.
//!
//! Each seam is an async trait so struct implementations can carry state.
//! The `*Fn` wrappers adapt plain async closures.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use livequery_core::BoxError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Runs a query or mutation with parsed parameters.
#[async_trait]
pub trait Handler<C>: Send + Sync {
    /// Execute with schema-parsed params.
    async fn call(&self, params: Value, ctx: Arc<C>) -> Result<Value, BoxError>;
}

/// Decides whether the caller may run a definition.
#[async_trait]
pub trait Authorizer<C>: Send + Sync {
    /// `Ok(false)` refuses; an error also refuses.
    async fn authorize(&self, params: Value, ctx: Arc<C>) -> Result<bool, BoxError>;
}

/// Derives the params of a stale query from a completed mutation.
#[async_trait]
pub trait InvalidationTarget: Send + Sync {
    /// Compute target params from the mutation's parsed params and result.
    async fn compute(&self, params: Value, result: Value) -> Result<TargetParams, BoxError>;
}

/// Params of the query instances a mutation invalidates.
#[derive(Clone, Debug, PartialEq)]
pub enum TargetParams {
    /// One instance, published on its own.
    Single(Value),
    /// Many instances, published in batches.
    Many(Vec<Value>),
}

impl TargetParams {
    /// The parameterless instance (`null`, channel of `{}`).
    pub const fn none() -> Self {
        Self::Single(Value::Null)
    }

    /// Number of query instances described.
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Many(list) => list.len(),
        }
    }

    /// Whether no instance is described.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A JSON array means many instances; anything else is one.
impl From<Value> for TargetParams {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(list) => Self::Many(list),
            other => Self::Single(other),
        }
    }
}

impl From<Vec<Value>> for TargetParams {
    fn from(list: Vec<Value>) -> Self {
        Self::Many(list)
    }
}

impl From<()> for TargetParams {
    fn from((): ()) -> Self {
        Self::none()
    }
}

// ── Closure adapters ────────────────────────────────────────────────

/// [`Handler`] from an async closure over JSON params.
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<C, F, Fut> Handler<C> for HandlerFn<F>
where
    C: Send + Sync + 'static,
    F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    async fn call(&self, params: Value, ctx: Arc<C>) -> Result<Value, BoxError> {
        (self.0)(params, ctx).await
    }
}

/// [`Handler`] from an async closure over typed params and result.
pub struct TypedHandler<P, R, F> {
    f: F,
    _marker: PhantomData<fn(P) -> R>,
}

impl<P, R, F> TypedHandler<P, R, F> {
    /// Wrap `f`.
    pub const fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<C, P, R, F, Fut> Handler<C> for TypedHandler<P, R, F>
where
    C: Send + Sync + 'static,
    P: DeserializeOwned + Send + 'static,
    R: Serialize + 'static,
    F: Fn(P, Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    async fn call(&self, params: Value, ctx: Arc<C>) -> Result<Value, BoxError> {
        let params = P::deserialize(params)?;
        let result = (self.f)(params, ctx).await?;
        Ok(serde_json::to_value(result)?)
    }
}

/// [`Authorizer`] from an async closure.
pub struct AuthorizerFn<F>(pub F);

#[async_trait]
impl<C, F, Fut> Authorizer<C> for AuthorizerFn<F>
where
    C: Send + Sync + 'static,
    F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    async fn authorize(&self, params: Value, ctx: Arc<C>) -> Result<bool, BoxError> {
        (self.0)(params, ctx).await
    }
}

/// [`InvalidationTarget`] from an async closure.
pub struct TargetFn<F>(pub F);

#[async_trait]
impl<F, Fut, T> InvalidationTarget for TargetFn<F>
where
    F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Into<TargetParams> + 'static,
{
    async fn compute(&self, params: Value, result: Value) -> Result<TargetParams, BoxError> {
        (self.0)(params, result).await.map(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    #[test]
    fn target_params_from_value() {
        assert_eq!(TargetParams::from(json!({"id": 1})), TargetParams::Single(json!({"id": 1})));
        assert_eq!(TargetParams::from(Value::Null), TargetParams::none());
        assert_eq!(
            TargetParams::from(json!([{"id": 1}, {"id": 2}])),
            TargetParams::Many(vec![json!({"id": 1}), json!({"id": 2})])
        );
        assert_eq!(TargetParams::from(()), TargetParams::none());
    }

    #[test]
    fn target_params_len() {
        assert_eq!(TargetParams::none().len(), 1);
        assert!(TargetParams::Many(Vec::new()).is_empty());
        assert_eq!(TargetParams::from(vec![json!(1), json!(2)]).len(), 2);
    }

    #[tokio::test]
    async fn handler_fn_calls_closure() {
        let handler = HandlerFn(|params: Value, ctx: Arc<String>| async move {
            Ok(json!({"echo": params, "ctx": *ctx}))
        });
        let out = handler.call(json!(1), Arc::new("c".to_string())).await.unwrap();
        assert_eq!(out, json!({"echo": 1, "ctx": "c"}));
    }

    #[tokio::test]
    async fn typed_handler_round_trips() {
        let handler = TypedHandler::new(|p: Add, _ctx: Arc<()>| async move {
            Ok::<_, BoxError>(p.a + p.b)
        });
        let out = handler.call(json!({"a": 2, "b": 3}), Arc::new(())).await.unwrap();
        assert_eq!(out, json!(5));
    }

    #[tokio::test]
    async fn typed_handler_reports_shape_mismatch() {
        let handler = TypedHandler::new(|p: Add, _ctx: Arc<()>| async move {
            Ok::<_, BoxError>(p.a + p.b)
        });
        assert!(handler.call(json!({"a": 2}), Arc::new(())).await.is_err());
    }

    #[tokio::test]
    async fn authorizer_fn_returns_decision() {
        let auth = AuthorizerFn(|params: Value, _ctx: Arc<()>| async move {
            Ok(params["admin"] == json!(true))
        });
        assert!(auth.authorize(json!({"admin": true}), Arc::new(())).await.unwrap());
        assert!(!auth.authorize(json!({}), Arc::new(())).await.unwrap());
    }

    #[tokio::test]
    async fn target_fn_converts_output() {
        let target = TargetFn(|_params: Value, result: Value| async move {
            Ok(json!({"id": result["id"]}))
        });
        let computed = target.compute(json!({}), json!({"id": 9})).await.unwrap();
        assert_eq!(computed, TargetParams::Single(json!({"id": 9})));
    }
}
