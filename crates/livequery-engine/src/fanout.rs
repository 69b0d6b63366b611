//! Invalidation fan-out.
//!
//! Turns a completed mutation's invalidation map into broadcasts:
//!
//! 1. every target computes its stale params concurrently
//! 2. a single params value is recomputed and published on its own (or joins
//!    the batched path under [`ScalarPolicy::Batched`])
//! 3. a list is recomputed element by element; failures are dropped and
//!    reported, successes are chunked by the transport's batch limit and each
//!    chunk goes out as one `batch_broadcast`
//!
//! Nothing here returns an error. Every failure lands in the [`FanoutReport`].

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use livequery_core::{BroadcastItem, Transport};
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{EngineConfig, ScalarPolicy};
use crate::definition::MutationDefinition;
use crate::errors::{EngineError, FanoutFailure};
use crate::handler::{InvalidationTarget, TargetParams};
use crate::metrics::{BATCH_BROADCASTS_TOTAL, BROADCASTS_TOTAL, FANOUT_DURATION_SECONDS};
use crate::query::QueryExecutor;
use crate::sink::{FanoutReport, TargetReport};

/// Recomputes and publishes the queries a mutation made stale.
pub struct FanoutEngine<C> {
    queries: QueryExecutor<C>,
    config: EngineConfig,
}

impl<C> Clone for FanoutEngine<C> {
    fn clone(&self) -> Self {
        Self {
            queries: self.queries.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: Send + Sync + 'static> FanoutEngine<C> {
    /// Engine recomputing through `queries`.
    pub fn new(queries: QueryExecutor<C>, config: EngineConfig) -> Self {
        Self { queries, config }
    }

    /// Fan out `mutation`'s invalidation map for one completed call.
    pub async fn run(
        &self,
        mutation: &MutationDefinition<C>,
        params: &Value,
        result: &Value,
        ctx: Arc<C>,
    ) -> FanoutReport {
        let start = Instant::now();
        let targets = mutation.invalidation_map().iter().map(|(target, compute)| {
            self.run_target(target, compute.as_ref(), params, result, Arc::clone(&ctx))
        });
        let report = FanoutReport {
            mutation: mutation.name().to_owned(),
            targets: join_all(targets).await,
        };
        histogram!(FANOUT_DURATION_SECONDS, "mutation" => report.mutation.clone())
            .record(start.elapsed().as_secs_f64());
        report
    }

    async fn run_target(
        &self,
        target: &str,
        compute: &dyn InvalidationTarget,
        params: &Value,
        result: &Value,
        ctx: Arc<C>,
    ) -> TargetReport {
        let mut report = TargetReport::new(target);

        let computed = match compute.compute(params.clone(), result.clone()).await {
            Ok(computed) => computed,
            Err(e) => {
                report.failures.push(FanoutFailure::InvalidationCompute {
                    target: target.to_owned(),
                    message: e.to_string(),
                });
                return report;
            }
        };

        match (computed, self.config.scalar_policy) {
            (TargetParams::Single(p), ScalarPolicy::Immediate) => {
                self.publish_single(target, &p, ctx, &mut report).await;
            }
            (TargetParams::Single(p), ScalarPolicy::Batched) => {
                self.publish_batched(target, vec![p], ctx, &mut report).await;
            }
            (TargetParams::Many(list), _) => {
                self.publish_batched(target, list, ctx, &mut report).await;
            }
        }
        report
    }

    async fn publish_single(
        &self,
        target: &str,
        params: &Value,
        ctx: Arc<C>,
        report: &mut TargetReport,
    ) {
        match self.queries.recompute_and_publish(target, params, ctx).await {
            Ok(outcome) => {
                counter!(BROADCASTS_TOTAL, "target" => target.to_owned()).increment(1);
                report.published.push(outcome.channel);
            }
            Err(EngineError::Broadcast { channel, source }) => {
                report.failures.push(FanoutFailure::Broadcast {
                    target: target.to_owned(),
                    channel,
                    message: source.to_string(),
                });
            }
            Err(e) => {
                report.failures.push(FanoutFailure::Recompute {
                    target: target.to_owned(),
                    message: e.to_string(),
                });
            }
        }
    }

    async fn publish_batched(
        &self,
        target: &str,
        list: Vec<Value>,
        ctx: Arc<C>,
        report: &mut TargetReport,
    ) {
        let total = list.len();
        let outcomes = join_all(list.iter().map(|p| {
            self.queries.batch_invalidate(target, p, Arc::clone(&ctx))
        }))
        .await;

        let mut items = Vec::with_capacity(total);
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(o) => items.push(BroadcastItem::update(o.channel, o.result)),
                Err(e) => errors.push(e.to_string()),
            }
        }
        if !errors.is_empty() {
            warn!(query = target, failed = errors.len(), total, "partial invalidation");
            report.failures.push(FanoutFailure::PartialInvalidation {
                target: target.to_owned(),
                failed: errors.len(),
                total,
                errors,
            });
        }
        if items.is_empty() {
            return;
        }

        let transport = self.queries.transport();
        let chunk_size = transport.max_batch_size().max(1);
        let dispatches = items
            .chunks(chunk_size)
            .map(|chunk| dispatch_chunk(transport.as_ref(), chunk));
        for (chunk, outcome) in items.chunks(chunk_size).zip(join_all(dispatches).await) {
            let channels = chunk.iter().map(|item| item.channel.clone());
            match outcome {
                Ok(()) => {
                    counter!(BATCH_BROADCASTS_TOTAL, "target" => target.to_owned()).increment(1);
                    report.published.extend(channels);
                }
                Err(message) => {
                    report.failures.push(FanoutFailure::BatchDispatch {
                        target: target.to_owned(),
                        channels: channels.collect(),
                        message,
                    });
                }
            }
        }
        debug!(
            query = target,
            published = report.published.len(),
            chunk_size,
            "batched invalidation dispatched"
        );
    }
}

async fn dispatch_chunk(transport: &dyn Transport, chunk: &[BroadcastItem]) -> Result<(), String> {
    transport
        .batch_broadcast(chunk)
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::definition::QueryDefinition;
    use crate::registry::DefinitionRegistry;
    use livequery_core::{AnySchema, BoxError, MemoryTransport, channel_name};
    use serde_json::json;

    /// Counts handler calls; `{"fail": true}` params make the handler fail.
    fn item_query(calls: Arc<AtomicUsize>) -> QueryDefinition<()> {
        QueryDefinition::from_fn("getItem", AnySchema, move |p: Value, _ctx| {
            let calls = Arc::clone(&calls);
            async move {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                if p["fail"] == json!(true) {
                    return Err::<Value, BoxError>("item unavailable".into());
                }
                Ok(json!({"item": p["id"]}))
            }
        })
    }

    fn ids(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({"id": i})).collect()
    }

    struct Fixture {
        engine: FanoutEngine<()>,
        registry: Arc<DefinitionRegistry<()>>,
        transport: Arc<MemoryTransport>,
    }

    fn fixture(mutation: MutationDefinition<()>, batch: usize, policy: ScalarPolicy) -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(
            DefinitionRegistry::builder()
                .query(item_query(calls))
                .query(QueryDefinition::from_fn("getAll", AnySchema, |_p, _ctx| async {
                    Ok(json!(["all"]))
                }))
                .mutation(mutation)
                .build()
                .unwrap(),
        );
        let transport = Arc::new(MemoryTransport::with_max_batch_size(batch));
        let queries = QueryExecutor::new(Arc::clone(&registry), transport.clone());
        let engine = FanoutEngine::new(
            queries,
            EngineConfig {
                scalar_policy: policy,
            },
        );
        Fixture {
            engine,
            registry,
            transport,
        }
    }

    fn mutation() -> MutationDefinition<()> {
        MutationDefinition::from_fn("touch", AnySchema, |p, _ctx| async move { Ok(p) })
    }

    async fn run(f: &Fixture, params: Value) -> FanoutReport {
        let def = f.registry.mutation("touch").unwrap();
        f.engine.run(def, &params, &json!({"ok": true}), Arc::new(())).await
    }

    #[tokio::test]
    async fn twenty_five_items_go_out_in_three_batches() {
        let m = mutation().invalidates("getItem", |_p, _r| async { Ok(ids(25)) });
        let f = fixture(m, 10, ScalarPolicy::Immediate);

        let report = run(&f, json!({})).await;

        let sizes: Vec<usize> = f.transport.batches().iter().map(Vec::len).collect();
        let mut sorted = sizes.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(sorted, vec![10, 10, 5]);
        assert!(f.transport.broadcasts().is_empty());
        assert!(report.is_clean());
        assert_eq!(report.published_channels().count(), 25);
    }

    #[tokio::test]
    async fn chunks_preserve_element_order() {
        let m = mutation().invalidates("getItem", |_p, _r| async { Ok(ids(25)) });
        let f = fixture(m, 10, ScalarPolicy::Immediate);
        let report = run(&f, json!({})).await;

        let expected: Vec<String> = ids(25)
            .iter()
            .map(|p| channel_name("getItem", p))
            .collect();
        assert_eq!(report.target("getItem").unwrap().published, expected);
    }

    #[tokio::test]
    async fn failed_element_is_left_out_of_the_batch() {
        let m = mutation().invalidates("getItem", |_p, _r| async {
            let mut list = ids(5);
            list[2] = json!({"id": 2, "fail": true});
            Ok(list)
        });
        let f = fixture(m, 10, ScalarPolicy::Immediate);

        let report = run(&f, json!({})).await;

        let batches = f.transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 4);
        assert!(batches[0].iter().all(|item| item.name == "update"));
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            FanoutFailure::PartialInvalidation { failed: 1, total: 5, .. }
        ));
    }

    #[tokio::test]
    async fn single_target_broadcasts_immediately() {
        let m = mutation().invalidates("getItem", |p: Value, _r| async move {
            Ok(json!({"id": p["id"]}))
        });
        let f = fixture(m, 10, ScalarPolicy::Immediate);

        let report = run(&f, json!({"id": 4})).await;

        let broadcasts = f.transport.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        assert_eq!(broadcasts[0].0, channel_name("getItem", &json!({"id": 4})));
        assert_eq!(broadcasts[0].1, "update");
        assert_eq!(broadcasts[0].2, json!({"item": 4}));
        assert!(f.transport.batches().is_empty());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn batched_policy_routes_single_target_through_batches() {
        let m = mutation().invalidates("getItem", |_p, _r| async { Ok(json!({"id": 1})) });
        let f = fixture(m, 10, ScalarPolicy::Batched);

        let _ = run(&f, json!({})).await;

        assert!(f.transport.broadcasts().is_empty());
        let batches = f.transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[tokio::test]
    async fn compute_failure_does_not_stop_siblings() {
        let m = mutation()
            .invalidates("getItem", |_p, _r| async {
                Err::<Value, BoxError>("cannot derive ids".into())
            })
            .invalidates_all("getAll");
        let f = fixture(m, 10, ScalarPolicy::Immediate);

        let report = run(&f, json!({})).await;

        assert_eq!(
            f.transport.published_channels(),
            vec![channel_name("getAll", &Value::Null)]
        );
        let item = report.target("getItem").unwrap();
        assert!(item.published.is_empty());
        assert!(matches!(
            item.failures[0],
            FanoutFailure::InvalidationCompute { .. }
        ));
        assert!(report.target("getAll").unwrap().failures.is_empty());
    }

    #[tokio::test]
    async fn failed_chunk_does_not_block_other_chunks() {
        let m = mutation().invalidates("getItem", |_p, _r| async { Ok(ids(6)) });
        let f = fixture(m, 3, ScalarPolicy::Immediate);
        f.transport.fail_channel(channel_name("getItem", &json!({"id": 4})));

        let report = run(&f, json!({})).await;

        let batches = f.transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        let target = report.target("getItem").unwrap();
        assert_eq!(target.published.len(), 3);
        match &target.failures[0] {
            FanoutFailure::BatchDispatch { channels, .. } => assert_eq!(channels.len(), 3),
            other => panic!("expected batch dispatch failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_broadcast_failure_is_reported() {
        let m = mutation().invalidates_all("getAll");
        let f = fixture(m, 10, ScalarPolicy::Immediate);
        f.transport.fail_channel(channel_name("getAll", &Value::Null));

        let report = run(&f, json!({})).await;

        assert!(matches!(
            report.failures().next(),
            Some(FanoutFailure::Broadcast { .. })
        ));
    }

    #[tokio::test]
    async fn failed_single_recompute_is_reported() {
        let m = mutation().invalidates("getItem", |_p, _r| async { Ok(json!({"fail": true})) });
        let f = fixture(m, 10, ScalarPolicy::Immediate);

        let report = run(&f, json!({})).await;

        assert!(f.transport.calls().is_empty());
        assert!(matches!(
            report.failures().next(),
            Some(FanoutFailure::Recompute { .. })
        ));
    }

    #[tokio::test]
    async fn empty_list_publishes_nothing() {
        let m = mutation().invalidates("getItem", |_p, _r| async { Ok(Vec::<Value>::new()) });
        let f = fixture(m, 10, ScalarPolicy::Immediate);

        let report = run(&f, json!({})).await;

        assert!(f.transport.calls().is_empty());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn zero_batch_size_is_treated_as_one() {
        let m = mutation().invalidates("getItem", |_p, _r| async { Ok(ids(3)) });
        let f = fixture(m, 0, ScalarPolicy::Immediate);

        let report = run(&f, json!({})).await;

        // one-item chunks, each above the transport's limit of 0
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 3);
    }
}
