//! Tool dispatch.
//!
//! Requests are partitioned into runs of consecutive same-policy calls,
//! preserving input order. Sequential runs execute one-by-one; parallel
//! runs execute under a concurrency cap with results collected in request
//! order. Exactly one result is produced per request — validation
//! failures, timeouts, and cancellations are synthesized as error results.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use llmrtc_domain::config::ToolExecutorConfig;
use llmrtc_domain::message::{ExecutionPolicy, ToolCall, ToolCallResult};

use crate::registry::{ToolContext, ToolRegistry};
use crate::schema;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: ToolExecutorConfig,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, config: ToolExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a batch of requests; results come back in request order.
    pub async fn execute(&self, requests: &[ToolCall], ctx: &ToolContext) -> Vec<ToolCallResult> {
        let mut results = Vec::with_capacity(requests.len());

        for run in self.partition(requests) {
            match run.policy {
                ExecutionPolicy::Sequential => {
                    for call in run.calls {
                        results.push(self.execute_single(call, ctx).await);
                    }
                }
                ExecutionPolicy::Parallel => {
                    // Semaphore caps in-flight handlers; join_all preserves
                    // request order regardless of completion order.
                    let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
                    let futures: Vec<_> = run
                        .calls
                        .iter()
                        .map(|call| {
                            let semaphore = semaphore.clone();
                            async move {
                                let _permit = semaphore.acquire().await;
                                self.execute_single(call, ctx).await
                            }
                        })
                        .collect();
                    results.extend(futures_util::future::join_all(futures).await);
                }
            }
        }

        debug_assert_eq!(results.len(), requests.len());
        results
    }

    /// Execute one request, producing exactly one result.
    pub async fn execute_single(&self, call: &ToolCall, ctx: &ToolContext) -> ToolCallResult {
        let started = Instant::now();

        if ctx.cancel.is_cancelled() {
            return ToolCallResult::err(call, "cancelled", 0);
        }

        let Some(definition) = self.registry.definition(&call.tool_name) else {
            return ToolCallResult::err(call, "unknown tool", 0);
        };
        // Handler lookup cannot fail once the definition resolved; the
        // registry is sealed and entries are only inserted whole.
        let Some(handler) = self.registry.handler(&call.tool_name) else {
            return ToolCallResult::err(call, "unknown tool", 0);
        };

        if self.config.validate_arguments {
            if let Err(violations) =
                schema::validate_arguments(&definition.parameters, &call.arguments)
            {
                tracing::debug!(
                    tool = %call.tool_name,
                    call_id = %call.call_id,
                    violations = violations.len(),
                    "tool arguments failed validation"
                );
                return ToolCallResult::err(
                    call,
                    format!("invalid arguments: {}", violations.join("; ")),
                    elapsed_ms(started),
                );
            }
        }

        let timeout = Duration::from_millis(self.config.tool_timeout_ms);
        let invocation = handler.invoke(call.arguments.clone(), ctx);

        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                ToolCallResult::err(call, "cancelled", elapsed_ms(started))
            }
            outcome = tokio::time::timeout(timeout, invocation) => match outcome {
                Err(_) => ToolCallResult::err(call, "timeout", elapsed_ms(started)),
                Ok(Ok(value)) => ToolCallResult::ok(call, value, elapsed_ms(started)),
                Ok(Err(e)) => ToolCallResult::err(call, e.to_string(), elapsed_ms(started)),
            },
        }
    }

    /// Split a batch into runs of consecutive calls sharing a policy.
    fn partition<'a>(&self, requests: &'a [ToolCall]) -> Vec<Run<'a>> {
        let mut runs: Vec<Run<'a>> = Vec::new();
        for call in requests {
            let policy = self
                .registry
                .definition(&call.tool_name)
                .and_then(|d| d.policy)
                .unwrap_or(self.config.default_policy);
            match runs.last_mut() {
                Some(run) if run.policy == policy => run.calls.push(call),
                _ => runs.push(Run {
                    policy,
                    calls: vec![call],
                }),
            }
        }
        runs
    }
}

struct Run<'a> {
    policy: ExecutionPolicy,
    calls: Vec<&'a ToolCall>,
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FnTool, ToolHandler};
    use llmrtc_domain::cancel::CancelToken;
    use llmrtc_domain::error::{Error, Result};
    use llmrtc_domain::message::ToolDefinition;
    use serde_json::{json, Value};

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            turn_id: "t1".into(),
            cancel: CancelToken::new(),
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            call_id: format!("call-{name}"),
            tool_name: name.into(),
            arguments: args,
        }
    }

    fn def(name: &str, policy: Option<ExecutionPolicy>) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: "test".into(),
            parameters: json!({"type": "object"}),
            policy,
        }
    }

    fn executor_with(registry: ToolRegistry) -> ToolExecutor {
        ToolExecutor::new(Arc::new(registry), ToolExecutorConfig::default())
    }

    #[tokio::test]
    async fn results_in_request_order() {
        let registry = ToolRegistry::new();
        registry
            .register(def("echo", Some(ExecutionPolicy::Parallel)), {
                Arc::new(FnTool::new(|args| Ok(args)))
            })
            .unwrap();
        let executor = executor_with(registry);

        let requests: Vec<ToolCall> = (0..5)
            .map(|i| ToolCall {
                call_id: format!("c{i}"),
                tool_name: "echo".into(),
                arguments: json!({"i": i}),
            })
            .collect();
        let results = executor.execute(&requests, &ctx()).await;

        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.call_id, format!("c{i}"));
            assert!(result.success);
        }
    }

    #[tokio::test]
    async fn validation_failure_skips_handler() {
        use std::sync::atomic::{AtomicBool, Ordering};

        static INVOKED: AtomicBool = AtomicBool::new(false);

        let registry = ToolRegistry::new();
        registry
            .register(
                ToolDefinition {
                    name: "lookup_order".into(),
                    description: "look up an order".into(),
                    parameters: json!({
                        "type": "object",
                        "properties": { "orderId": { "type": "string" } },
                        "required": ["orderId"]
                    }),
                    policy: None,
                },
                Arc::new(FnTool::new(|_args| {
                    INVOKED.store(true, Ordering::SeqCst);
                    Ok(json!({"status": "delivered"}))
                })),
            )
            .unwrap();
        let executor = executor_with(registry);

        let result = executor
            .execute_single(&call("lookup_order", json!({})), &ctx())
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("orderId"));
        assert!(!INVOKED.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unknown_tool_produces_error_result() {
        let executor = executor_with(ToolRegistry::new());
        let result = executor.execute_single(&call("ghost", json!({})), &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unknown tool"));
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl ToolHandler for SlowTool {
        async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("never"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_produces_error_result() {
        let registry = ToolRegistry::new();
        registry.register(def("slow", None), Arc::new(SlowTool)).unwrap();
        let executor = ToolExecutor::new(
            Arc::new(registry),
            ToolExecutorConfig {
                tool_timeout_ms: 50,
                ..Default::default()
            },
        );

        let result = executor.execute_single(&call("slow", json!({})), &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn cancellation_synthesizes_results_for_remaining_calls() {
        let registry = ToolRegistry::new();
        registry.register(def("slow", None), Arc::new(SlowTool)).unwrap();
        registry
            .register(def("fast", None), Arc::new(FnTool::new(|_| Ok(json!("ok")))))
            .unwrap();
        let executor = Arc::new(executor_with(registry));

        let context = ctx();
        let cancel = context.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let requests = vec![call("slow", json!({})), call("fast", json!({}))];
        let results = executor.execute(&requests, &context).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].error.as_deref(), Some("cancelled"));
        assert_eq!(results[1].error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn mixed_policies_partition_into_runs() {
        use std::sync::Mutex;

        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        struct Logger {
            log: Arc<Mutex<Vec<&'static str>>>,
            tag: &'static str,
        }

        #[async_trait::async_trait]
        impl ToolHandler for Logger {
            async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
                self.log.lock().map_err(|_| Error::Internal("poisoned".into()))?.push(self.tag);
                Ok(json!("ok"))
            }
        }

        let registry = ToolRegistry::new();
        registry
            .register(
                def("seq", Some(ExecutionPolicy::Sequential)),
                Arc::new(Logger { log: log.clone(), tag: "seq" }),
            )
            .unwrap();
        registry
            .register(
                def("par", Some(ExecutionPolicy::Parallel)),
                Arc::new(Logger { log: log.clone(), tag: "par" }),
            )
            .unwrap();
        let executor = executor_with(registry);

        let requests = vec![
            call("seq", json!({})),
            call("par", json!({})),
            call("par", json!({})),
            call("seq", json!({})),
        ];
        let results = executor.execute(&requests, &ctx()).await;

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn handler_error_becomes_error_result() {
        let registry = ToolRegistry::new();
        registry
            .register(
                def("failing", None),
                Arc::new(FnTool::new(|_| {
                    Err(Error::Tool {
                        tool: "failing".into(),
                        message: "backend unavailable".into(),
                    })
                })),
            )
            .unwrap();
        let executor = executor_with(registry);

        let result = executor.execute_single(&call("failing", json!({})), &ctx()).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("backend unavailable"));
    }
}
