use std::sync::Arc;

use tracing::{debug, error, info};

use fluxgate_bus::EventBus;
use fluxgate_core::{BroadcastPayload, EventType, NoticeMessage, SystemErrorReport};

use crate::error::ModuleError;
use crate::module::MethodFn;

/// A dispatchable method with its owner, as collected at registration time.
#[derive(Clone)]
pub struct ProvidedMethod {
    pub owner_id: String,
    pub owner_name: String,
    /// Transformer methods receive the fold's current result as their input.
    pub accepts_result: bool,
    pub func: MethodFn,
}

/// A source of dispatch records for one method name, already filtered to
/// enabled owners and ordered for dispatch.
///
/// The addon manager provides addon-contributed records (in addon order) and
/// the module manager provides system records (by module priority); the
/// chain consults both through this trait rather than holding either
/// manager.
pub trait MethodProvider: Send + Sync {
    fn records(&self, method: &str) -> Vec<ProvidedMethod>;
}

/// Provider with no records, for chains wired before addons load.
pub struct EmptyProvider;

impl MethodProvider for EmptyProvider {
    fn records(&self, _method: &str) -> Vec<ProvidedMethod> {
        Vec::new()
    }
}

/// Which provider pool a record came from, for error tagging.
#[derive(Clone, Copy)]
enum Pool {
    Addon,
    System,
}

impl Pool {
    fn error_kind(self) -> &'static str {
        match self {
            Self::Addon => "plugin",
            Self::System => "module",
        }
    }
}

/// The processing-chain base: runs a named method across addon-contributed
/// modules and system modules, folding their results.
///
/// Fold rules: a `None` result is replaced by the next call's result; list
/// results concatenate with further list results; the first non-list,
/// non-empty result is final. System-pool transformer methods receive the
/// current result as their input. Errors are isolated per method unless
/// `raise_exception` is requested.
#[derive(Clone)]
pub struct ChainBase {
    addons: Arc<dyn MethodProvider>,
    modules: Arc<dyn MethodProvider>,
    bus: EventBus,
}

impl ChainBase {
    #[must_use]
    pub fn new(
        addons: Arc<dyn MethodProvider>,
        modules: Arc<dyn MethodProvider>,
        bus: EventBus,
    ) -> Self {
        Self {
            addons,
            modules,
            bus,
        }
    }

    /// Run `method` across all providers and return the folded result.
    /// Errors are isolated (logged, reported, skipped).
    pub async fn run_module(
        &self,
        method: &str,
        args: serde_json::Value,
    ) -> Option<serde_json::Value> {
        self.run_module_with(method, args, false).await.unwrap_or(None)
    }

    /// Like [`run_module`](Self::run_module), but with `raise_exception` the
    /// first provider error aborts the fold and propagates.
    pub async fn run_module_with(
        &self,
        method: &str,
        args: serde_json::Value,
        raise_exception: bool,
    ) -> Result<Option<serde_json::Value>, ModuleError> {
        // Addon pool first, in addon order.
        let result = self
            .fold_pool(Pool::Addon, method, &args, None, raise_exception)
            .await?;

        // A non-empty, non-list addon result is final.
        if let Some(value) = &result
            && !value.is_null()
            && !value.is_array()
        {
            return Ok(result);
        }

        // System pool, by module priority.
        let result = self
            .fold_pool(Pool::System, method, &args, result, raise_exception)
            .await?;
        Ok(result)
    }

    async fn fold_pool(
        &self,
        pool: Pool,
        method: &str,
        args: &serde_json::Value,
        mut result: Option<serde_json::Value>,
        raise_exception: bool,
    ) -> Result<Option<serde_json::Value>, ModuleError> {
        let provider = match pool {
            Pool::Addon => &self.addons,
            Pool::System => &self.modules,
        };
        for record in provider.records(method) {
            let is_empty = result.as_ref().is_none_or(serde_json::Value::is_null);
            let call_args = if is_empty {
                args.clone()
            } else if matches!(pool, Pool::System) && record.accepts_result {
                // Transformer: feed the current result through.
                result.clone().unwrap_or(serde_json::Value::Null)
            } else if result.as_ref().is_some_and(serde_json::Value::is_array) {
                args.clone()
            } else {
                // A final scalar result stops the fold.
                break;
            };

            debug!(owner = %record.owner_name, method, "running module method");
            let outcome = Self::invoke(&record.func, call_args).await;
            match outcome {
                Ok(value) => {
                    result = Self::fold_value(pool, &record, result, value);
                }
                Err(err) => {
                    if raise_exception {
                        return Err(err);
                    }
                    self.report_error(pool, &record, method, &err);
                }
            }
        }
        Ok(result)
    }

    /// Merge one call's value into the fold state.
    fn fold_value(
        pool: Pool,
        record: &ProvidedMethod,
        result: Option<serde_json::Value>,
        value: Option<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        let is_empty = result.as_ref().is_none_or(serde_json::Value::is_null);
        if is_empty || (matches!(pool, Pool::System) && record.accepts_result) {
            return value;
        }
        match (result, value) {
            (Some(serde_json::Value::Array(mut acc)), Some(serde_json::Value::Array(more))) => {
                acc.extend(more);
                Some(serde_json::Value::Array(acc))
            }
            // A non-list return does not merge into a list result.
            (result, _) => result,
        }
    }

    async fn invoke(
        func: &MethodFn,
        args: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, ModuleError> {
        match func {
            MethodFn::Async(f) => f(args).await,
            MethodFn::Sync(f) => {
                let f = Arc::clone(f);
                tokio::task::spawn_blocking(move || f(args))
                    .await
                    .map_err(|e| ModuleError::Execution(format!("method panicked: {e}")))?
            }
        }
    }

    fn report_error(&self, pool: Pool, record: &ProvidedMethod, method: &str, err: &ModuleError) {
        error!(
            owner = %record.owner_id,
            method,
            error = %err,
            "error running module method"
        );
        self.bus.send(
            EventType::NoticeMessage,
            BroadcastPayload::Notice(NoticeMessage {
                title: format!("{} has an error", record.owner_name),
                message: err.to_string(),
                role: pool.error_kind().to_owned(),
            }),
        );
        let report = SystemErrorReport::new(pool.error_kind(), err.to_string())
            .with_context("owner_id", record.owner_id.clone())
            .with_context("method", method.to_owned());
        self.bus
            .send(EventType::SystemError, BroadcastPayload::SystemError(report));
    }

    /// Periodic fan-out, invoked by the common scheduler job: every module
    /// implementing `scheduler_job` gets a tick.
    pub async fn scheduler_job(&self) {
        info!("running common scheduler fan-out");
        self.run_module("scheduler_job", serde_json::Value::Null)
            .await;
    }

    /// Cache-clear fan-out for modules holding caches.
    pub async fn clear_cache(&self) {
        info!("running cache clear fan-out");
        self.run_module("clear_cache", serde_json::Value::Null)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::module::{method_fn, method_fn_async};

    use super::*;

    struct FixedProvider {
        records: Vec<ProvidedMethod>,
    }

    impl MethodProvider for FixedProvider {
        fn records(&self, _method: &str) -> Vec<ProvidedMethod> {
            self.records.clone()
        }
    }

    fn record(owner: &str, accepts_result: bool, func: MethodFn) -> ProvidedMethod {
        ProvidedMethod {
            owner_id: owner.to_owned(),
            owner_name: owner.to_owned(),
            accepts_result,
            func,
        }
    }

    fn chain(addons: Vec<ProvidedMethod>, modules: Vec<ProvidedMethod>) -> ChainBase {
        ChainBase::new(
            Arc::new(FixedProvider { records: addons }),
            Arc::new(FixedProvider { records: modules }),
            EventBus::default(),
        )
    }

    #[tokio::test]
    async fn first_non_null_addon_result_wins() {
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&calls);
        let first = record(
            "a1",
            false,
            method_fn(move |_| {
                c.lock().unwrap().push("a1");
                Ok(Some(serde_json::json!("answer")))
            }),
        );
        let c = Arc::clone(&calls);
        let second = record(
            "a2",
            false,
            method_fn(move |_| {
                c.lock().unwrap().push("a2");
                Ok(Some(serde_json::json!("ignored")))
            }),
        );
        let c = Arc::clone(&calls);
        let system = record(
            "m1",
            false,
            method_fn(move |_| {
                c.lock().unwrap().push("m1");
                Ok(Some(serde_json::json!("system")))
            }),
        );

        let chain = chain(vec![first, second], vec![system]);
        let result = chain.run_module("answer", serde_json::Value::Null).await;

        assert_eq!(result, Some(serde_json::json!("answer")));
        // The second addon and the system pool never ran.
        assert_eq!(*calls.lock().unwrap(), vec!["a1"]);
    }

    #[tokio::test]
    async fn list_results_concatenate() {
        let a1 = record("a1", false, method_fn(|_| Ok(Some(serde_json::json!([1, 2])))));
        let a2 = record("a2", false, method_fn(|_| Ok(Some(serde_json::json!([3])))));
        let m1 = record("m1", false, method_fn(|_| Ok(Some(serde_json::json!([4])))));

        let chain = chain(vec![a1, a2], vec![m1]);
        let result = chain.run_module("collect", serde_json::Value::Null).await;

        // Lists merge across both pools.
        assert_eq!(result, Some(serde_json::json!([1, 2, 3, 4])));
    }

    #[tokio::test]
    async fn system_pool_runs_when_addons_abstain() {
        let a1 = record("a1", false, method_fn(|_| Ok(None)));
        let m1 = record("m1", false, method_fn(|_| Ok(Some(serde_json::json!("mod")))));

        let chain = chain(vec![a1], vec![m1]);
        let result = chain.run_module("fallback", serde_json::Value::Null).await;
        assert_eq!(result, Some(serde_json::json!("mod")));
    }

    #[tokio::test]
    async fn transformer_receives_current_result() {
        let a1 = record("a1", false, method_fn(|_| Ok(Some(serde_json::json!([10])))));
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let transformer = record(
            "m1",
            true,
            method_fn(move |input| {
                *s.lock().unwrap() = Some(input.clone());
                Ok(Some(serde_json::json!("transformed")))
            }),
        );

        let chain = chain(vec![a1], vec![transformer]);
        let result = chain.run_module("xform", serde_json::Value::Null).await;

        assert_eq!(result, Some(serde_json::json!("transformed")));
        assert_eq!(*seen.lock().unwrap(), Some(serde_json::json!([10])));
    }

    #[tokio::test]
    async fn errors_are_isolated_by_default() {
        let broken = record("bad", false, method_fn(|_| Err("kaput".into())));
        let healthy = record("ok", false, method_fn(|_| Ok(Some(serde_json::json!(7)))));

        let chain = chain(vec![broken, healthy], Vec::new());
        let result = chain.run_module("calc", serde_json::Value::Null).await;
        assert_eq!(result, Some(serde_json::json!(7)));
    }

    #[tokio::test]
    async fn raise_exception_propagates() {
        let broken = record("bad", false, method_fn(|_| Err("kaput".into())));
        let chain = chain(vec![broken], Vec::new());

        let err = chain
            .run_module_with("calc", serde_json::Value::Null, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("kaput"));
    }

    #[tokio::test]
    async fn async_methods_are_awaited() {
        let a1 = record(
            "a1",
            false,
            method_fn_async(|_| async { Ok(Some(serde_json::json!("async"))) }),
        );
        let chain = chain(vec![a1], Vec::new());
        let result = chain.run_module("go", serde_json::Value::Null).await;
        assert_eq!(result, Some(serde_json::json!("async")));
    }

    #[tokio::test]
    async fn arguments_reach_methods() {
        let echo = record(
            "echo",
            false,
            method_fn(|args| Ok(Some(args))),
        );
        let chain = chain(vec![echo], Vec::new());
        let result = chain
            .run_module("echo", serde_json::json!({"source": "telegram"}))
            .await;
        assert_eq!(result, Some(serde_json::json!({"source": "telegram"})));
    }
}
