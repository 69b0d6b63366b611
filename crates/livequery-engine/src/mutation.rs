//! Mutation execution and detached fan-out.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info_span, instrument};

use crate::definition::MutationDefinition;
use crate::errors::{DefinitionKind, EngineError};
use crate::fanout::FanoutEngine;
use crate::pipeline::{self, Stages};
use crate::registry::DefinitionRegistry;
use crate::sink::{FanoutReport, FanoutSink};

/// Runs mutations and invalidates the queries they declare.
///
/// [`execute`](Self::execute) returns as soon as the handler finishes. The
/// fan-out keeps running on a task tracked by the executor, and its report
/// goes to the [`FanoutSink`].
pub struct MutationExecutor<C> {
    registry: Arc<DefinitionRegistry<C>>,
    fanout: FanoutEngine<C>,
    sink: Arc<dyn FanoutSink>,
    tracker: TaskTracker,
}

impl<C> Clone for MutationExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            fanout: self.fanout.clone(),
            sink: Arc::clone(&self.sink),
            tracker: self.tracker.clone(),
        }
    }
}

impl<C: Send + Sync + 'static> MutationExecutor<C> {
    /// Executor over `registry`, fanning out through `fanout`.
    pub fn new(
        registry: Arc<DefinitionRegistry<C>>,
        fanout: FanoutEngine<C>,
        sink: Arc<dyn FanoutSink>,
    ) -> Self {
        Self {
            registry,
            fanout,
            sink,
            tracker: TaskTracker::new(),
        }
    }

    /// Run `name` and return its result. Invalidation happens afterward in
    /// the background; its failures never reach the caller.
    pub async fn execute(
        &self,
        name: &str,
        raw: &Value,
        ctx: Arc<C>,
    ) -> Result<Value, EngineError> {
        let def = Arc::clone(self.lookup(name)?);
        let (params, result) = self.run(&def, raw, Arc::clone(&ctx)).await?;

        if !def.invalidation_map().is_empty() {
            let fanout = self.fanout.clone();
            let sink = Arc::clone(&self.sink);
            let returned = result.clone();
            let span = info_span!("fanout", mutation = name);
            let _ = self.tracker.spawn(
                async move {
                    let report = guarded_run(&fanout, &def, &params, &returned, ctx).await;
                    sink.record(&report);
                }
                .instrument(span),
            );
        }
        Ok(result)
    }

    /// Run `name` and wait for its fan-out. The report is also handed to the
    /// sink.
    pub async fn execute_and_wait(
        &self,
        name: &str,
        raw: &Value,
        ctx: Arc<C>,
    ) -> Result<(Value, FanoutReport), EngineError> {
        let def = self.lookup(name)?;
        let (params, result) = self.run(def, raw, Arc::clone(&ctx)).await?;
        let report = guarded_run(&self.fanout, def, &params, &result, ctx).await;
        self.sink.record(&report);
        Ok((result, report))
    }

    /// Wait until every background fan-out has finished.
    pub async fn drain(&self) {
        let _ = self.tracker.close();
        self.tracker.wait().await;
        let _ = self.tracker.reopen();
        debug!("fan-out drained");
    }

    /// Background fan-outs still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    #[instrument(skip_all, fields(mutation = def.name()))]
    async fn run(
        &self,
        def: &MutationDefinition<C>,
        raw: &Value,
        ctx: Arc<C>,
    ) -> Result<(Value, Value), EngineError> {
        let stages = Stages {
            name: def.name(),
            schema: def.schema(),
            authorizer: def.authorizer(),
            handler: def.handler(),
        };
        pipeline::run(stages, raw, ctx, true).await
    }

    fn lookup(&self, name: &str) -> Result<&Arc<MutationDefinition<C>>, EngineError> {
        self.registry
            .mutation(name)
            .ok_or_else(|| EngineError::UnknownDefinition {
                kind: DefinitionKind::Mutation,
                name: name.to_owned(),
            })
    }
}

/// Runs the fan-out; a panic inside it becomes a report with every target
/// failed.
async fn guarded_run<C: Send + Sync + 'static>(
    fanout: &FanoutEngine<C>,
    def: &MutationDefinition<C>,
    params: &Value,
    result: &Value,
    ctx: Arc<C>,
) -> FanoutReport {
    match AssertUnwindSafe(fanout.run(def, params, result, ctx))
        .catch_unwind()
        .await
    {
        Ok(report) => report,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(mutation = def.name(), %message, "fan-out panicked");
            FanoutReport::panicked(def.name(), def.invalidated_queries(), &message)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::config::EngineConfig;
    use crate::definition::QueryDefinition;
    use crate::errors::FanoutFailure;
    use crate::query::QueryExecutor;
    use crate::sink::RecordingSink;
    use livequery_core::{AnySchema, BoxError, MemoryTransport, channel_name};
    use serde_json::json;

    struct Ctx {
        writes: AtomicUsize,
    }

    struct Fixture {
        exec: MutationExecutor<Ctx>,
        transport: Arc<MemoryTransport>,
        sink: Arc<RecordingSink>,
        ctx: Arc<Ctx>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(
            DefinitionRegistry::builder()
                .query(QueryDefinition::from_fn(
                    "getCount",
                    AnySchema,
                    |_p, ctx: Arc<Ctx>| async move { Ok(json!(ctx.writes.load(Ordering::SeqCst))) },
                ))
                .query(QueryDefinition::from_fn("slow", AnySchema, |_p, _ctx| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!("done"))
                }))
                .mutation(
                    MutationDefinition::from_fn("bump", AnySchema, |_p, ctx: Arc<Ctx>| async move {
                        let n = ctx.writes.fetch_add(1, Ordering::SeqCst) + 1;
                        Ok(json!({"count": n}))
                    })
                    .invalidates_all("getCount"),
                )
                .mutation(
                    MutationDefinition::from_fn("bumpSlow", AnySchema, |_p, _ctx| async {
                        Ok(json!(true))
                    })
                    .invalidates_all("slow"),
                )
                .mutation(
                    MutationDefinition::from_fn("bumpBroken", AnySchema, |_p, _ctx| async {
                        Ok(json!("written"))
                    })
                    .invalidates("getCount", |_p, _r| async {
                        Err::<Value, BoxError>("no ids".into())
                    }),
                )
                .mutation(MutationDefinition::from_fn("noop", AnySchema, |_p, _ctx| async {
                    Ok(json!(null))
                }))
                .mutation(
                    MutationDefinition::from_fn(
                        "locked",
                        AnySchema,
                        |_p, ctx: Arc<Ctx>| async move {
                            let _ = ctx.writes.fetch_add(1, Ordering::SeqCst);
                            Ok(json!(null))
                        },
                    )
                    .authorize(|_p, _ctx| async { Ok(false) })
                    .invalidates_all("getCount"),
                )
                .query(QueryDefinition::from_fn("poisoned", AnySchema, |_p, _ctx| async {
                    let rows: Option<Value> = None;
                    Ok(rows.expect("store poisoned"))
                }))
                .mutation(
                    MutationDefinition::from_fn("touchPoisoned", AnySchema, |_p, _ctx| async {
                        Ok(json!("touched"))
                    })
                    .invalidates_all("poisoned")
                    .invalidates_all("getCount"),
                )
                .build()
                .unwrap(),
        );
        let transport = Arc::new(MemoryTransport::new());
        let sink = Arc::new(RecordingSink::new());
        let queries = QueryExecutor::new(Arc::clone(&registry), transport.clone());
        let fanout = FanoutEngine::new(queries, EngineConfig::default());
        Fixture {
            exec: MutationExecutor::new(registry, fanout, sink.clone()),
            transport,
            sink,
            ctx: Arc::new(Ctx {
                writes: AtomicUsize::new(0),
            }),
        }
    }

    #[tokio::test]
    async fn execute_returns_result_and_fans_out_in_background() {
        let f = fixture();
        let out = f.exec.execute("bump", &json!({}), f.ctx.clone()).await.unwrap();
        assert_eq!(out, json!({"count": 1}));

        f.exec.drain().await;
        assert_eq!(
            f.transport.broadcasts(),
            vec![(channel_name("getCount", &Value::Null), "update".into(), json!(1))]
        );
        assert!(f.sink.last().unwrap().is_clean());
    }

    #[tokio::test]
    async fn execute_does_not_wait_for_fanout() {
        let f = fixture();
        let _ = f.exec.execute("bumpSlow", &json!({}), f.ctx.clone()).await.unwrap();
        assert!(f.sink.reports().is_empty());
        assert_eq!(f.exec.in_flight(), 1);

        f.exec.drain().await;
        assert_eq!(f.sink.reports().len(), 1);
        assert_eq!(f.exec.in_flight(), 0);
    }

    #[tokio::test]
    async fn fanout_failure_does_not_change_result() {
        let f = fixture();
        let out = f.exec.execute("bumpBroken", &json!({}), f.ctx.clone()).await.unwrap();
        assert_eq!(out, json!("written"));

        f.exec.drain().await;
        let report = f.sink.last().unwrap();
        assert!(matches!(
            report.failures().next(),
            Some(FanoutFailure::InvalidationCompute { .. })
        ));
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn panicking_recompute_still_reaches_sink() {
        let f = fixture();
        let out = f.exec.execute("touchPoisoned", &json!({}), f.ctx.clone()).await.unwrap();
        assert_eq!(out, json!("touched"));

        f.exec.drain().await;
        assert_eq!(f.exec.in_flight(), 0);
        let report = f.sink.last().unwrap();
        assert_eq!(report.mutation, "touchPoisoned");
        assert_eq!(report.targets.len(), 2);
        let failure = report.target("poisoned").unwrap().failures[0].clone();
        assert_eq!(
            failure,
            FanoutFailure::Panicked {
                target: "poisoned".into(),
                message: "store poisoned".into(),
            }
        );
    }

    #[tokio::test]
    async fn execute_and_wait_reports_panic() {
        let f = fixture();
        let (_, report) = f
            .exec
            .execute_and_wait("touchPoisoned", &json!({}), f.ctx.clone())
            .await
            .unwrap();
        assert!(report.failures().all(|failure| failure.kind() == "panicked"));
        assert_eq!(f.sink.reports().len(), 1);
    }

    #[tokio::test]
    async fn empty_invalidation_map_spawns_nothing() {
        let f = fixture();
        let _ = f.exec.execute("noop", &json!({}), f.ctx.clone()).await.unwrap();
        assert_eq!(f.exec.in_flight(), 0);
        f.exec.drain().await;
        assert!(f.sink.reports().is_empty());
    }

    #[tokio::test]
    async fn refused_mutation_skips_handler_and_fanout() {
        let f = fixture();
        let err = f.exec.execute("locked", &json!({}), f.ctx.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::Authorization { .. }));
        f.exec.drain().await;
        assert_eq!(f.ctx.writes.load(Ordering::SeqCst), 0);
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_mutation_fails() {
        let f = fixture();
        let err = f.exec.execute("missing", &json!({}), f.ctx.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownDefinition { kind: DefinitionKind::Mutation, .. }
        ));
    }

    #[tokio::test]
    async fn execute_and_wait_returns_report() {
        let f = fixture();
        let (out, report) = f
            .exec
            .execute_and_wait("bump", &json!({}), f.ctx.clone())
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(report.mutation, "bump");
        assert_eq!(
            report.published_channels().collect::<Vec<_>>(),
            vec![channel_name("getCount", &Value::Null)]
        );
        assert_eq!(f.sink.reports().len(), 1);
    }

    #[tokio::test]
    async fn drain_can_run_repeatedly() {
        let f = fixture();
        f.exec.drain().await;
        let _ = f.exec.execute("bump", &json!({}), f.ctx.clone()).await.unwrap();
        f.exec.drain().await;
        let _ = f.exec.execute("bump", &json!({}), f.ctx.clone()).await.unwrap();
        f.exec.drain().await;
        assert_eq!(f.sink.reports().len(), 2);
    }
}
