use std::future::Future;
use std::pin::Pin;

use tracing::{error, warn};

use crate::errors::EngineError;

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

type StepFn<'a> = Box<dyn FnOnce() -> StepFuture<'a> + Send + 'a>;

struct Step<'a> {
    name: String,
    create: StepFn<'a>,
    compensate: StepFn<'a>,
}

/// Reverse-order, best-effort teardown of already-created sub-resources.
/// The same unwinder backs both rollback after a failed step and explicit
/// deletion of a composite resource, so the two share one code path.
#[derive(Default)]
pub struct Unwinder<'a> {
    compensations: Vec<(String, StepFn<'a>)>,
}

impl<'a> Unwinder<'a> {
    pub fn new() -> Self {
        Unwinder { compensations: vec![] }
    }

    /// Registers the undo of a step that just succeeded. Registration order
    /// is creation order; unwinding runs in reverse.
    pub fn register<F, Fut>(&mut self, name: &str, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), EngineError>> + Send + 'a,
    {
        self.compensations
            .push((name.to_string(), Box::new(move || Box::pin(undo()))));
    }

    pub fn is_empty(&self) -> bool {
        self.compensations.is_empty()
    }

    fn register_boxed(&mut self, name: String, undo: StepFn<'a>) {
        self.compensations.push((name, undo));
    }

    /// Runs every registered compensation in reverse order. A failing
    /// compensation never stops the remaining ones; all failures are
    /// collected and returned in execution order.
    pub async fn unwind(self) -> Vec<(String, EngineError)> {
        let mut failures = vec![];
        for (name, undo) in self.compensations.into_iter().rev() {
            if let Err(err) = undo().await {
                error!("compensation `{name}` failed: {err}");
                failures.push((name, err));
            }
        }
        failures
    }
}

/// Supervises an ordered multi-step creation sequence. On the first failing
/// step the compensations of the already-succeeded steps run in reverse
/// order before the step's own error is surfaced; a failing compensation
/// escalates to `CompensationIncomplete` instead of replacing the original
/// error.
#[derive(Default)]
pub struct Transaction<'a> {
    steps: Vec<Step<'a>>,
}

impl<'a> Transaction<'a> {
    pub fn new() -> Self {
        Transaction { steps: vec![] }
    }

    pub fn with_step<C, CF, R, RF>(mut self, name: &str, create: C, compensate: R) -> Self
    where
        C: FnOnce() -> CF + Send + 'a,
        CF: Future<Output = Result<(), EngineError>> + Send + 'a,
        R: FnOnce() -> RF + Send + 'a,
        RF: Future<Output = Result<(), EngineError>> + Send + 'a,
    {
        self.steps.push(Step {
            name: name.to_string(),
            create: Box::new(move || Box::pin(create())),
            compensate: Box::new(move || Box::pin(compensate())),
        });
        self
    }

    pub async fn commit(self) -> Result<(), Box<EngineError>> {
        let mut unwinder = Unwinder::new();
        for step in self.steps {
            match (step.create)().await {
                Ok(()) => unwinder.register_boxed(step.name, step.compensate),
                Err(original) => {
                    warn!("step `{}` failed, rollback started: {original}", step.name);
                    let failures = unwinder.unwind().await;
                    return Err(Box::new(wrap_rollback_failures(original, failures)));
                }
            }
        }
        Ok(())
    }
}

/// The surfaced error stays the original step failure unless rollback itself
/// left resources behind, the most serious case.
pub fn wrap_rollback_failures(original: EngineError, failures: Vec<(String, EngineError)>) -> EngineError {
    if failures.is_empty() {
        return original;
    }
    EngineError::CompensationIncomplete {
        original: Box::new(original),
        rollback_errors: failures
            .into_iter()
            .map(|(name, err)| format!("{name}: {err}"))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::errors::ProviderError;
    use crate::resources::ResourceType;

    fn provider_error(operation: &str) -> EngineError {
        EngineError::new_provider(
            operation,
            ResourceType::Nlb,
            "nlb-01",
            ProviderError::new_from_safe_message("backend refused".to_string()),
        )
    }

    fn record(journal: &Arc<Mutex<Vec<String>>>, entry: &str) {
        journal.lock().unwrap().push(entry.to_string());
    }

    #[tokio::test]
    async fn test_commit_runs_steps_in_order_and_keeps_compensations_idle() {
        // setup:
        let journal = Arc::new(Mutex::new(vec![]));
        let (j1, j2, j3) = (journal.clone(), journal.clone(), journal.clone());

        // execute:
        let result = Transaction::new()
            .with_step(
                "listener",
                move || async move {
                    record(&j1, "create listener");
                    Ok(())
                },
                || async { panic!("compensation must not run on success") },
            )
            .with_step(
                "pool",
                move || async move {
                    record(&j2, "create pool");
                    Ok(())
                },
                || async { panic!("compensation must not run on success") },
            )
            .commit()
            .await;

        // verify:
        assert!(result.is_ok());
        record(&j3, "done");
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["create listener", "create pool", "done"]
        );
    }

    #[tokio::test]
    async fn test_failing_step_unwinds_prior_steps_in_reverse_order() {
        // setup: step 3 of 4 fails
        let journal = Arc::new(Mutex::new(vec![]));
        let (c1, c2) = (journal.clone(), journal.clone());
        let (u1, u2) = (journal.clone(), journal.clone());

        // execute:
        let result = Transaction::new()
            .with_step(
                "listener",
                move || async move {
                    record(&c1, "create listener");
                    Ok(())
                },
                move || async move {
                    record(&u1, "delete listener");
                    Ok(())
                },
            )
            .with_step(
                "pool",
                move || async move {
                    record(&c2, "create pool");
                    Ok(())
                },
                move || async move {
                    record(&u2, "delete pool");
                    Ok(())
                },
            )
            .with_step(
                "health monitor",
                || async { Err(provider_error("CreateHealthMonitor")) },
                || async { panic!("failed step has nothing to compensate") },
            )
            .with_step(
                "members",
                || async { panic!("steps after the failure must not run") },
                || async { panic!("steps after the failure must not run") },
            )
            .commit()
            .await;

        // verify: original error surfaced, compensations ran 2 then 1
        assert_eq!(*result.unwrap_err(), provider_error("CreateHealthMonitor"));
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["create listener", "create pool", "delete pool", "delete listener"]
        );
    }

    #[tokio::test]
    async fn test_failed_compensation_escalates_but_remaining_ones_still_run() {
        // setup:
        let journal = Arc::new(Mutex::new(vec![]));
        let (c1, c2, u1) = (journal.clone(), journal.clone(), journal.clone());

        // execute: rollback of step 2 fails, rollback of step 1 must still run
        let result = Transaction::new()
            .with_step(
                "listener",
                move || async move {
                    record(&c1, "create listener");
                    Ok(())
                },
                move || async move {
                    record(&u1, "delete listener");
                    Ok(())
                },
            )
            .with_step(
                "pool",
                move || async move {
                    record(&c2, "create pool");
                    Ok(())
                },
                || async { Err(provider_error("DeletePool")) },
            )
            .with_step(
                "health monitor",
                || async { Err(provider_error("CreateHealthMonitor")) },
                || async { Ok(()) },
            )
            .commit()
            .await;

        // verify:
        match *result.unwrap_err() {
            EngineError::CompensationIncomplete {
                original,
                rollback_errors,
            } => {
                assert_eq!(*original, provider_error("CreateHealthMonitor"));
                assert_eq!(rollback_errors.len(), 1);
                assert!(rollback_errors[0].starts_with("pool:"));
            }
            other => panic!("expected CompensationIncomplete, got {other:?}"),
        }
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["create listener", "create pool", "delete listener"]
        );
    }

    #[tokio::test]
    async fn test_first_step_failure_has_nothing_to_unwind() {
        let result = Transaction::new()
            .with_step(
                "load balancer",
                || async { Err(provider_error("CreateLoadBalancer")) },
                || async { panic!("nothing succeeded, nothing to compensate") },
            )
            .commit()
            .await;
        assert_eq!(*result.unwrap_err(), provider_error("CreateLoadBalancer"));
    }

    #[tokio::test]
    async fn test_unwinder_is_shared_teardown_path() {
        // setup: explicit deletion uses the same reverse-order unwind
        let journal = Arc::new(Mutex::new(vec![]));
        let mut unwinder = Unwinder::new();
        for name in ["listener", "pool", "members"] {
            let journal = journal.clone();
            unwinder.register(name, move || async move {
                record(&journal, &format!("delete {name}"));
                Ok(())
            });
        }

        // execute:
        let failures = unwinder.unwind().await;

        // verify:
        assert!(failures.is_empty());
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["delete members", "delete pool", "delete listener"]
        );
    }
}
