//! Run assembly: evaluating every check of a suite against one document.
//!
//! Each check goes through its own pipeline:
//!
//! 1. reference resolution against the store (missing reference: SKIP)
//! 2. dialect gating (no dialect matches: SKIP)
//! 3. selector extraction (failure: ERROR)
//! 4. dispatch to the check's environment (failure: ERROR)
//!
//! A failing check never affects any other. Only a malformed suite, an
//! unparsable document or cancellation abort the whole run.

mod context;

pub use context::{CancellationToken, RunContext};

use crate::config::{EngineConfig, Validatable};
use crate::document::{parse_document, Document};
use crate::error::{EvaluationErrorKind, MdqError, ProcessErrorKind, Result};
use crate::extract::{dialect_applies, extract};
use crate::model::{Check, CheckResult, Level, Run, Status, Suite, Value};
use crate::quality::QualityScorer;
use crate::script::{default_registry, Dispatcher, EnvironmentRegistry};
use crate::store::QualityStore;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// Binding holding the raw document text.
pub const DOCUMENT_BINDING: &str = "document";

/// Binding holding the caller's parameters.
pub const PARAMS_BINDING: &str = "mdq_params";

/// A suite check after reference resolution.
enum Prepared<'a> {
    Runnable(std::borrow::Cow<'a, Check>),
    /// Outcome decided before any evaluation
    Decided(CheckResult),
}

/// Evaluates suites against documents.
///
/// An engine holds no per-run state and may be shared between threads to
/// assess many documents at once.
pub struct Engine {
    config: EngineConfig,
    dispatcher: Dispatcher,
    store: Option<Arc<dyn QualityStore>>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl Engine {
    /// Create an engine using the bundled scripting environments.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_registry(config, default_registry())
    }

    /// Create an engine dispatching to a custom set of environments.
    pub fn with_registry(config: EngineConfig, registry: Arc<EnvironmentRegistry>) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(MdqError::config(joined.join("; ")));
        }
        let pool = match config.execution.max_threads {
            Some(threads) if config.execution.parallel => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("mdqa-check-{i}"))
                    .build()
                    .map_err(|e| MdqError::config(format!("cannot build thread pool: {e}")))?,
            )),
            _ => None,
        };
        let dispatcher = Dispatcher::new(registry)
            .with_timeout(config.dispatch.timeout())
            .with_max_call_depth(config.dispatch.max_call_depth);
        Ok(Self {
            config,
            dispatcher,
            store: None,
            pool,
        })
    }

    /// Resolve reference checks through `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn QualityStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Scorer configured with this engine's level weights.
    #[must_use]
    pub fn scorer(&self) -> QualityScorer {
        QualityScorer::new(self.config.scoring.level_weights)
    }

    /// Parse `document` and evaluate every check of `suite` against it.
    pub fn run_suite(&self, suite: &Suite, document: &str, ctx: &RunContext) -> Result<Run> {
        validate_suite(suite)?;
        let document = parse_document(document, self.config.documents.max_size_bytes)?;
        self.run_parsed(suite, document.as_ref(), ctx)
    }

    /// Evaluate every check of `suite` against an already parsed document.
    pub fn run_parsed(&self, suite: &Suite, document: &dyn Document, ctx: &RunContext) -> Result<Run> {
        validate_suite(suite)?;
        let started = Instant::now();
        let prepared = suite
            .checks
            .iter()
            .map(|check| self.prepare(check))
            .collect::<Result<Vec<_>>>()?;

        let mut run = Run::new(ctx.object_identifier.clone(), suite.id.clone());
        run.sysmeta.clone_from(&ctx.sysmeta);
        tracing::info!(
            suite = %suite.id,
            run = %run.id,
            object = %ctx.object_identifier,
            checks = prepared.len(),
            parallel = self.config.execution.parallel,
            "starting run"
        );

        let results = if self.config.execution.parallel {
            let evaluate = || {
                prepared
                    .into_par_iter()
                    .map(|p| self.execute(p, suite, document, ctx))
                    .collect::<Result<Vec<_>>>()
            };
            match &self.pool {
                Some(pool) => pool.install(evaluate)?,
                None => evaluate()?,
            }
        } else {
            prepared
                .into_iter()
                .map(|p| self.execute(p, suite, document, ctx))
                .collect::<Result<Vec<_>>>()?
        };

        run.results = results;
        tracing::info!(
            suite = %suite.id,
            run = %run.id,
            success = run.count(Status::Success),
            failure = run.count(Status::Failure),
            error = run.count(Status::Error),
            skip = run.count(Status::Skip),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run complete"
        );
        Ok(run)
    }

    /// Evaluate a single check, producing a run with one result.
    pub fn run_check(&self, check: &Check, document: &str, ctx: &RunContext) -> Result<Run> {
        let mut suite = Suite::new(check.id.clone(), check.name.clone().unwrap_or_default());
        suite.checks.push(check.clone());
        self.run_suite(&suite, document, ctx)
    }

    /// Resolve a reference check and verify the result can run.
    fn prepare<'a>(&self, check: &'a Check) -> Result<Prepared<'a>> {
        let level = check.effective_level();
        let resolved = if check.is_reference() {
            let Some(store) = &self.store else {
                tracing::warn!(check = %check.id, "reference check without a check store");
                return Ok(Prepared::Decided(CheckResult::with_message(
                    &check.id,
                    level,
                    Status::Skip,
                    format!("referenced check '{}' not found: no check store configured", check.id),
                )));
            };
            match store.get_check(&check.id) {
                Ok(stored) => std::borrow::Cow::Owned(merge_reference(check, stored)),
                Err(MdqError::EntryNotFound { .. }) => {
                    tracing::warn!(check = %check.id, "referenced check not found");
                    return Ok(Prepared::Decided(CheckResult::with_message(
                        &check.id,
                        level,
                        Status::Skip,
                        format!("referenced check '{}' not found", check.id),
                    )));
                }
                Err(e) => {
                    tracing::warn!(check = %check.id, error = %e, "check store failed");
                    return Ok(Prepared::Decided(CheckResult::with_message(
                        &check.id,
                        level,
                        Status::Error,
                        e.to_string(),
                    )));
                }
            }
        } else {
            std::borrow::Cow::Borrowed(check)
        };

        if resolved.environment.as_deref().map_or(true, |e| e.trim().is_empty()) {
            return Err(MdqError::malformed_suite(format!(
                "check '{}' has no environment",
                resolved.id
            )));
        }
        if resolved.code.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(MdqError::malformed_suite(format!("check '{}' has no code", resolved.id)));
        }
        Ok(Prepared::Runnable(resolved))
    }

    /// One check pipeline. Only cancellation is an `Err`.
    fn execute(
        &self,
        prepared: Prepared<'_>,
        suite: &Suite,
        document: &dyn Document,
        ctx: &RunContext,
    ) -> Result<CheckResult> {
        if ctx.is_cancelled() {
            tracing::info!(suite = %suite.id, "run cancelled");
            return Err(MdqError::process(
                format!("running suite '{}'", suite.id),
                ProcessErrorKind::Cancelled,
            ));
        }
        let check = match prepared {
            Prepared::Decided(result) => return Ok(result),
            Prepared::Runnable(check) => check,
        };
        let level = check.effective_level();
        Ok(self.evaluate(&check, level, suite, document, ctx))
    }

    fn evaluate(
        &self,
        check: &Check,
        level: Level,
        suite: &Suite,
        document: &dyn Document,
        ctx: &RunContext,
    ) -> CheckResult {
        let id = check.id.as_str();
        let error = |kind: EvaluationErrorKind| {
            let message = kind.to_string();
            let err = MdqError::evaluation(format!("check '{id}'"), kind);
            tracing::warn!(error = %err, cause = %message, "check failed");
            CheckResult::with_message(id, level, Status::Error, message)
        };

        match dialect_applies(document, &check.dialects, &suite.namespaces) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(check = id, "dialect not supported, skipping");
                return CheckResult::with_message(id, level, Status::Skip, "dialect not supported");
            }
            Err(e) => return error(e),
        }

        tracing::debug!(check = id, selectors = check.selectors.len(), "extracting");
        let mut bindings = match extract(document, &check.selectors, &suite.namespaces) {
            Ok(bindings) => bindings,
            Err(e) => return error(e),
        };
        bindings
            .entry(DOCUMENT_BINDING.to_string())
            .or_insert_with(|| Value::String(document.text().to_string()));
        bindings
            .entry(PARAMS_BINDING.to_string())
            .or_insert_with(|| ctx.params_value());

        let environment = check.environment.as_deref().unwrap_or_default();
        let code = check.code.as_deref().unwrap_or_default();
        tracing::debug!(check = id, environment, "dispatching");
        match self.dispatcher.dispatch(environment, &bindings, code) {
            Ok(dispatch) => {
                tracing::debug!(check = id, status = %dispatch.status, "check finished");
                let mut result = CheckResult::new(id, level, dispatch.status);
                result.outputs = dispatch.outputs;
                result
            }
            Err(e) => error(e),
        }
    }
}

/// Structural checks performed before any evaluation.
fn validate_suite(suite: &Suite) -> Result<()> {
    let problems = suite.structural_problems();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(MdqError::malformed_suite(problems.join("; ")))
    }
}

/// A stored check with the referencing suite's level and type applied.
fn merge_reference(reference: &Check, mut stored: Check) -> Check {
    if reference.level.is_some() {
        stored.level = reference.level;
    }
    if reference.check_type.is_some() {
        stored.check_type.clone_from(&reference.check_type);
    }
    stored.id.clone_from(&reference.id);
    stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bindings, Selector, Sysmeta};
    use crate::script::{Budget, Evaluation, ScriptEnvironment, ScriptError};
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const DOC: &str = "<eml><dataset><title>Arctic lake chemistry 2019</title><dataTable/></dataset></eml>";

    fn sequential() -> Engine {
        Engine::new(EngineConfig::builder().parallel(false).build()).unwrap()
    }

    fn title_check() -> Check {
        Check::new("check.title")
            .environment("r")
            .level(Level::Warn)
            .selector(Selector::xpath("title", "//dataset/title"))
            .code("status <- ifelse(nchar(title) > 10, 'SUCCESS', 'FAILURE')")
    }

    #[test]
    fn test_results_follow_check_order() {
        let suite = Suite::new("suite", "order")
            .with_check(Check::new("c").environment("ecma").code("true"))
            .with_check(Check::new("a").environment("ecma").code("false"))
            .with_check(Check::new("b").environment("ecma").code("'skip'"));
        let run = Engine::new(EngineConfig::default())
            .unwrap()
            .run_suite(&suite, DOC, &RunContext::new("obj"))
            .unwrap();
        let ids: Vec<&str> = run.results.iter().map(|r| r.check_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        let statuses: Vec<Status> = run.results.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![Status::Success, Status::Failure, Status::Skip]);
    }

    #[test]
    fn test_failures_are_isolated() {
        let suite = Suite::new("suite", "isolation")
            .with_check(Check::new("broken").environment("ecma").code("throw 'bad'"))
            .with_check(Check::new("unknown").environment("python").code("True"))
            .with_check(title_check());
        let run = sequential().run_suite(&suite, DOC, &RunContext::new("obj")).unwrap();
        assert_eq!(run.results[0].status, Status::Error);
        assert_eq!(run.results[0].message(), Some("bad"));
        assert_eq!(run.results[1].status, Status::Error);
        assert!(run.results[1].message().unwrap_or_default().contains("python"));
        assert_eq!(run.results[2].status, Status::Success);
        assert_eq!(run.results[2].level, Level::Warn);
    }

    #[test]
    fn test_malformed_suite_aborts() {
        let engine = sequential();
        let empty = Suite::new("suite", "empty");
        assert!(engine.run_suite(&empty, DOC, &RunContext::new("obj")).is_err());

        let no_env = Suite::new("suite", "no env").with_check(Check::new("c").code("TRUE"));
        let err = engine.run_suite(&no_env, DOC, &RunContext::new("obj")).unwrap_err();
        assert!(err.to_string().contains("Processing failed"));
    }

    #[test]
    fn test_unparsable_document_aborts() {
        let suite = Suite::new("suite", "s").with_check(title_check());
        let err = sequential()
            .run_suite(&suite, "<eml><dataset>", &RunContext::new("obj"))
            .unwrap_err();
        assert!(err.is_process_error());
    }

    #[test]
    fn test_reference_resolution() {
        let store = InMemoryStore::with_checks([Check::new("check.shared")
            .environment("ecma")
            .level(Level::Info)
            .code("status = 'SUCCESS'")])
        .unwrap();
        let engine = sequential().with_store(Arc::new(store));
        let suite = Suite::new("suite", "refs")
            .with_check(Check::new("check.shared").level(Level::Severe))
            .with_check(Check::new("check.missing"));
        let run = engine.run_suite(&suite, DOC, &RunContext::new("obj")).unwrap();
        assert_eq!(run.results[0].status, Status::Success);
        assert_eq!(run.results[0].level, Level::Severe);
        assert_eq!(run.results[1].status, Status::Skip);
        assert!(run.results[1].message().unwrap_or_default().contains("not found"));
    }

    #[test]
    fn test_params_and_document_bindings() {
        let check = Check::new("check.params")
            .environment("ecma")
            .code("status = (mdq_params.nodeId === 'urn:node:KNB' && document.indexOf('<eml>') === 0) ? 'SUCCESS' : 'FAILURE'");
        let ctx = RunContext::new("obj").param("nodeId", "urn:node:KNB");
        let run = sequential().run_check(&check, DOC, &ctx).unwrap();
        assert_eq!(run.len(), 1);
        assert_eq!(run.results[0].status, Status::Success);
    }

    #[test]
    fn test_cancelled_run_has_no_results() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = RunContext::new("obj").with_cancellation(token);
        let suite = Suite::new("suite", "s").with_check(title_check());
        let err = sequential().run_suite(&suite, DOC, &ctx).unwrap_err();
        assert!(matches!(
            err,
            MdqError::Process {
                source: ProcessErrorKind::Cancelled,
                ..
            }
        ));
    }

    /// Signals when it starts, then holds the check for a while.
    struct Slow {
        started: Arc<AtomicBool>,
    }

    impl ScriptEnvironment for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn evaluate(&self, _: &str, _: &Bindings, _: &Budget) -> std::result::Result<Evaluation, ScriptError> {
            self.started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            Ok(Evaluation {
                result: Value::Bool(true),
                ..Evaluation::default()
            })
        }
    }

    #[test]
    fn test_cancel_during_sequential_run() {
        let started = Arc::new(AtomicBool::new(false));
        let registry = EnvironmentRegistry::builder()
            .register(Slow {
                started: started.clone(),
            })
            .build();
        let engine = Engine::with_registry(
            EngineConfig::builder().parallel(false).build(),
            Arc::new(registry),
        )
        .unwrap();
        let mut suite = Suite::new("suite", "slow");
        for i in 0..5 {
            suite.checks.push(Check::new(format!("slow.{i}")).environment("slow").code("wait"));
        }

        let token = CancellationToken::new();
        let ctx = RunContext::new("obj").with_cancellation(token.clone());
        let handle = std::thread::spawn(move || engine.run_suite(&suite, DOC, &ctx));
        while !started.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        token.cancel();

        let outcome = handle.join().expect("run thread");
        assert!(matches!(
            outcome,
            Err(MdqError::Process {
                source: ProcessErrorKind::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn test_run_created_before_checks_and_carries_sysmeta() {
        let mut sysmeta = Sysmeta::new(
            "urn:node:KNB",
            "http://orcid.org/0000-0002-1825-0097",
            "https://eml.ecoinformatics.org/eml-2.2.0",
        );
        sysmeta.groups.push("CN=arctic-data-admins".into());
        let ctx = RunContext::new("obj").with_sysmeta(sysmeta.clone());
        let suite = Suite::new("suite", "s").with_check(title_check());

        let run = sequential().run_suite(&suite, DOC, &ctx).unwrap();
        assert!(run.timestamp <= run.results[0].timestamp);
        assert_eq!(run.sysmeta, Some(sysmeta));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig::builder().max_call_depth(0).build();
        assert!(matches!(Engine::new(config), Err(MdqError::Config(_))));
    }
}
