//! Entry points: evaluate one snippet under a capability policy.
//!
//! Each call walks `Parsing -> Binding -> Evaluating` and ends in
//! `Succeeded` or `Failed`. Evaluation runs on a dedicated thread with a
//! large stack so that deeply nested snippets cannot overflow the host's
//! stack; a panic on that thread becomes a `RuntimeFault`.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::EvaluatorConfig;
use crate::error::EvaluationError;
use crate::interp::{self, Interpreter, RunOutput};
use crate::metrics::METRICS;
use crate::namespace::{ExecutionNamespace, ModuleBinding, NamespaceBuilder};
use crate::obs::{self, EvaluationSpan};
use crate::policy::CapabilityPolicy;
use crate::render::truncate_content;
use crate::result::{EvaluationResult, Phase};
use crate::session::SessionState;
use crate::tool::Tool;

const EVAL_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Evaluate `code` with the standard policy and default limits.
pub fn execute_snippet(
    code: &str,
    static_tools: &[Arc<dyn Tool>],
    authorized_imports: &[&str],
) -> EvaluationResult {
    Sandbox::default().execute(code, static_tools, authorized_imports)
}

/// Like [`execute_snippet`], carrying variables through `session`.
pub fn execute_snippet_in_session(
    code: &str,
    static_tools: &[Arc<dyn Tool>],
    authorized_imports: &[&str],
    session: &mut SessionState,
) -> EvaluationResult {
    Sandbox::default().execute_in_session(code, static_tools, authorized_imports, session)
}

/// A policy, limits and caller-supplied modules, reusable across calls.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    policy: Arc<CapabilityPolicy>,
    config: EvaluatorConfig,
    modules: Vec<ModuleBinding>,
}

/// Everything that failed before evaluation started, or the run itself.
enum Pipeline {
    Rejected(Phase, EvaluationError),
    Ran(RunOutput),
}

impl Pipeline {
    fn into_result(
        self,
        max_output_len: usize,
        session: Option<&mut SessionState>,
    ) -> EvaluationResult {
        let output = match self {
            Pipeline::Rejected(phase, error) => {
                return EvaluationResult::failed(phase, error, String::new())
            }
            Pipeline::Ran(output) => output,
        };
        let captured_output = truncate_content(&output.captured_output, max_output_len);
        match output.outcome {
            Ok(completion) => {
                if let Some(session) = session {
                    session.replace(output.globals);
                }
                EvaluationResult::succeeded(completion.value, captured_output)
                    .with_final_answer(completion.is_final_answer)
                    .with_operations(output.operations)
            }
            Err(error) => EvaluationResult::failed(Phase::Evaluating, error, captured_output)
                .with_operations(output.operations),
        }
    }
}

/// Evaluate `code` against a namespace the caller built with
/// [`NamespaceBuilder`], under default limits.
///
/// This is the bare evaluator: no session, metrics, or cancellation. Most
/// hosts want [`Sandbox::execute`] instead.
pub fn evaluate(
    code: &str,
    namespace: &ExecutionNamespace,
    policy: &CapabilityPolicy,
) -> EvaluationResult {
    let config = EvaluatorConfig::default();
    let pipeline = on_eval_thread(|| {
        let suite = match interp::parse(code) {
            Ok(suite) => suite,
            Err(error) => return Pipeline::Rejected(Phase::Parsing, error),
        };
        Pipeline::Ran(Interpreter::new(code, namespace, policy, &config, None).run(&suite))
    });
    pipeline.into_result(config.max_output_len, None)
}

/// Run `work` on a scoped thread with [`EVAL_STACK_SIZE`] of stack, inside
/// the caller's tracing span.
fn on_eval_thread<F>(work: F) -> Pipeline
where
    F: FnOnce() -> Pipeline + Send,
{
    std::thread::scope(|scope| {
        let parent = tracing::Span::current();
        let spawned = std::thread::Builder::new()
            .name("codeact-eval".to_string())
            .stack_size(EVAL_STACK_SIZE)
            .spawn_scoped(scope, move || {
                let _entered = parent.enter();
                work()
            });
        match spawned {
            Ok(handle) => handle.join().unwrap_or_else(|payload| {
                Pipeline::Rejected(
                    Phase::Evaluating,
                    EvaluationError::runtime(format!(
                        "Evaluator crashed: {}",
                        panic_message(payload.as_ref())
                    )),
                )
            }),
            Err(e) => Pipeline::Rejected(
                Phase::Evaluating,
                EvaluationError::runtime(format!("Could not start the evaluator: {e}")),
            ),
        }
    })
}

impl Sandbox {
    pub fn new(policy: CapabilityPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            config: EvaluatorConfig::default(),
            modules: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Supply the implementation of an importable module.
    pub fn with_module(mut self, binding: ModuleBinding) -> Self {
        self.modules.push(binding);
        self
    }

    pub fn policy(&self) -> &CapabilityPolicy {
        &self.policy
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn execute(
        &self,
        code: &str,
        static_tools: &[Arc<dyn Tool>],
        authorized_imports: &[&str],
    ) -> EvaluationResult {
        let cancel = AtomicBool::new(false);
        self.execute_with_cancel(code, static_tools, authorized_imports, None, &cancel)
    }

    pub fn execute_in_session(
        &self,
        code: &str,
        static_tools: &[Arc<dyn Tool>],
        authorized_imports: &[&str],
        session: &mut SessionState,
    ) -> EvaluationResult {
        let cancel = AtomicBool::new(false);
        self.execute_with_cancel(
            code,
            static_tools,
            authorized_imports,
            Some(session),
            &cancel,
        )
    }

    /// Evaluate, stopping with a `RuntimeFault` once `cancel` is raised.
    pub fn execute_with_cancel(
        &self,
        code: &str,
        static_tools: &[Arc<dyn Tool>],
        authorized_imports: &[&str],
        session: Option<&mut SessionState>,
        cancel: &AtomicBool,
    ) -> EvaluationResult {
        let evaluation_id = uuid::Uuid::new_v4().to_string();
        self.run(
            &evaluation_id,
            code,
            static_tools,
            authorized_imports,
            session,
            cancel,
        )
    }

    /// Evaluate on a blocking worker, giving up after `deadline`.
    ///
    /// On expiry the worker is told to stop and a `RuntimeFault` is
    /// returned without waiting for it.
    pub async fn execute_with_deadline(
        self: Arc<Self>,
        code: String,
        static_tools: Vec<Arc<dyn Tool>>,
        authorized_imports: Vec<String>,
        deadline: Duration,
    ) -> EvaluationResult {
        let (result, _) = self
            .run_with_deadline(code, static_tools, authorized_imports, None, deadline)
            .await;
        result
    }

    /// [`Sandbox::execute_with_deadline`] with a session. The session comes
    /// back unchanged when the deadline expires.
    pub async fn execute_in_session_with_deadline(
        self: Arc<Self>,
        code: String,
        static_tools: Vec<Arc<dyn Tool>>,
        authorized_imports: Vec<String>,
        session: SessionState,
        deadline: Duration,
    ) -> (EvaluationResult, SessionState) {
        let (result, session) = self
            .run_with_deadline(
                code,
                static_tools,
                authorized_imports,
                Some(session),
                deadline,
            )
            .await;
        (result, session.unwrap_or_default())
    }

    async fn run_with_deadline(
        self: Arc<Self>,
        code: String,
        static_tools: Vec<Arc<dyn Tool>>,
        authorized_imports: Vec<String>,
        session: Option<SessionState>,
        deadline: Duration,
    ) -> (EvaluationResult, Option<SessionState>) {
        let evaluation_id = uuid::Uuid::new_v4().to_string();
        let cancel = Arc::new(AtomicBool::new(false));
        let before = session.clone();

        let worker = {
            let sandbox = Arc::clone(&self);
            let cancel = Arc::clone(&cancel);
            let evaluation_id = evaluation_id.clone();
            tokio::task::spawn_blocking(move || {
                let mut session = session;
                let imports: Vec<&str> = authorized_imports.iter().map(String::as_str).collect();
                let result = sandbox.run(
                    &evaluation_id,
                    &code,
                    &static_tools,
                    &imports,
                    session.as_mut(),
                    &cancel,
                );
                (result, session)
            })
        };

        match tokio::time::timeout(deadline, worker).await {
            Ok(Ok(finished)) => finished,
            Ok(Err(join_err)) => (
                EvaluationResult::failed(
                    Phase::Evaluating,
                    EvaluationError::runtime(format!("Evaluation worker failed: {join_err}")),
                    String::new(),
                ),
                before,
            ),
            Err(_elapsed) => {
                cancel.store(true, Ordering::Relaxed);
                let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                obs::emit_deadline_exceeded(&evaluation_id, deadline_ms);
                METRICS.inc_failures();
                let result = EvaluationResult::failed(
                    Phase::Evaluating,
                    EvaluationError::runtime(format!(
                        "Evaluation did not finish within {deadline_ms} ms and was cancelled."
                    )),
                    String::new(),
                );
                (result, before)
            }
        }
    }

    fn run(
        &self,
        evaluation_id: &str,
        code: &str,
        static_tools: &[Arc<dyn Tool>],
        authorized_imports: &[&str],
        session: Option<&mut SessionState>,
        cancel: &AtomicBool,
    ) -> EvaluationResult {
        let _span = EvaluationSpan::enter(evaluation_id, &obs::snippet_digest(code));
        let started = Instant::now();
        METRICS.inc_evaluations();
        obs::emit_evaluation_started(evaluation_id, static_tools.len(), authorized_imports.len());

        let seed = session.as_deref();
        let pipeline = on_eval_thread(|| {
            self.pipeline(code, static_tools, authorized_imports, seed, cancel)
        });
        let result = pipeline.into_result(self.config.max_output_len, session);

        let error_kind = result.error.as_ref().map(|e| e.kind);
        if let Some(error) = &result.error {
            if error.kind.is_policy_violation() {
                METRICS.inc_policy_violations();
                obs::emit_policy_violation(evaluation_id, error.kind, &error.message);
            }
            METRICS.inc_failures();
        }
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        obs::emit_evaluation_finished(evaluation_id, duration_ms, result.operations, error_kind);
        result
    }

    fn pipeline(
        &self,
        code: &str,
        static_tools: &[Arc<dyn Tool>],
        authorized_imports: &[&str],
        session: Option<&SessionState>,
        cancel: &AtomicBool,
    ) -> Pipeline {
        debug!(phase = %Phase::Parsing, "evaluation phase");
        let suite = match interp::parse(code) {
            Ok(suite) => suite,
            Err(error) => return Pipeline::Rejected(Phase::Parsing, error),
        };

        debug!(phase = %Phase::Binding, "evaluation phase");
        let namespace = NamespaceBuilder::new(&self.policy)
            .tools(static_tools.iter().cloned())
            .authorize_all(authorized_imports.iter().map(|m| (*m).to_string()))
            .authorize_all(self.config.authorized_imports.iter().cloned())
            .modules(self.modules.iter().cloned())
            .build();
        let namespace = match namespace {
            Ok(namespace) => namespace,
            Err(error) => return Pipeline::Rejected(Phase::Binding, error),
        };

        debug!(phase = %Phase::Evaluating, "evaluation phase");
        let mut interpreter =
            Interpreter::new(code, &namespace, &self.policy, &self.config, Some(cancel));
        if let Some(session) = session {
            interpreter.seed_globals(session.iter());
        }
        Pipeline::Ran(interpreter.run(&suite))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::value::Value;

    #[test]
    fn test_execute_returns_last_expression() {
        let result = execute_snippet("x = 2\nx * 21", &[], &[]);
        assert_eq!(result.into_outcome().unwrap(), Value::Int(42));
    }

    #[test]
    fn test_evaluate_uses_prebuilt_namespace() {
        let policy = CapabilityPolicy::standard();
        let namespace = NamespaceBuilder::new(&policy)
            .authorize("json")
            .build()
            .unwrap();

        let result = evaluate("import json\njson.dumps({'a': 1})", &namespace, &policy);
        assert_eq!(result.value, Some(Value::from("{\"a\": 1}")));

        let blocked = evaluate("import os", &namespace, &policy);
        assert_eq!(blocked.error.unwrap().kind, ErrorKind::ImportBlocked);
    }

    #[test]
    fn test_syntax_error_fails_in_parsing() {
        let result = execute_snippet("def (:", &[], &[]);
        assert_eq!(result.failed_in, Some(Phase::Parsing));
        assert_eq!(result.error.unwrap().kind, ErrorKind::SyntaxInvalid);
    }

    #[test]
    fn test_raised_cancel_flag_stops_evaluation() {
        let cancel = AtomicBool::new(true);
        let result = Sandbox::default().execute_with_cancel(
            "while True:\n    pass",
            &[],
            &[],
            None,
            &cancel,
        );
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::RuntimeFault);
        assert!(error.message.contains("cancelled"));
    }

    #[test]
    fn test_output_is_truncated_to_config_limit() {
        let sandbox =
            Sandbox::default().with_config(EvaluatorConfig::default().with_max_output_len(20));
        let result = sandbox.execute("print('x' * 100)", &[], &[]);
        assert!(result.is_success());
        assert!(result.captured_output.contains("truncated to stay below 20 characters"));
    }
}
