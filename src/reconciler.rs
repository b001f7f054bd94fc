use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::EngineError;
use crate::resources::ResourceType;

/// Poll budget for one resource kind. Cold-start latency varies per backend
/// and resource weight, so budgets are configuration, not constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollBudget {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Attempts consumed by one transient read failure. A backend that never
    /// becomes consistent exhausts the budget faster than one that is merely
    /// slow.
    pub transient_attempt_cost: u32,
}

impl PollBudget {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        PollBudget {
            interval,
            max_attempts,
            transient_attempt_cost: 5,
        }
    }

    pub fn with_transient_attempt_cost(mut self, cost: u32) -> Self {
        self.transient_attempt_cost = cost.max(1);
        self
    }
}

/// Drives one asynchronous provisioning operation to a terminal state:
/// poll -> terminal? stop -> sleep -> poll, bounded by the budget, an
/// optional overall deadline and a cancellation token.
pub struct Waiter {
    resource_type: ResourceType,
    resource_name: String,
    budget: PollBudget,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Waiter {
    pub fn new(resource_type: ResourceType, resource_name: &str, budget: PollBudget) -> Self {
        Waiter {
            resource_type,
            resource_name: resource_name.to_string(),
            budget,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Overall deadline for the whole wait, relative to now. Exceeding it
    /// surfaces a reconciliation timeout carrying the last observed status,
    /// distinct from a backend-reported failure status.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline.map(|d| Instant::now() + d);
        self
    }

    /// Absolute-deadline variant, for multi-step sequences sharing one
    /// overall deadline across their reconciliations.
    pub fn with_deadline_until(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Polls until `is_terminal` accepts a status (terminal covers both
    /// success and definitive backend failure), the attempt budget runs out,
    /// the deadline passes, or the token is cancelled.
    ///
    /// A `NotFound` poll result is a transient read failure: right after
    /// creation a resource may not be visible to the backend API yet. It is
    /// treated as a non-terminal status and consumes
    /// `transient_attempt_cost` attempts. Any other poll error aborts the
    /// loop as-is.
    pub async fn await_terminal<S, F, Fut>(
        &self,
        mut poll: F,
        is_terminal: impl Fn(&S) -> bool,
    ) -> Result<S, EngineError>
    where
        S: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, EngineError>>,
    {
        let mut last_status: Option<S> = None;
        let mut attempts_used: u32 = 0;
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            match poll().await {
                Ok(status) => {
                    if is_terminal(&status) {
                        return Ok(status);
                    }
                    attempts_used += 1;
                    last_status = Some(status);
                }
                Err(EngineError::NotFound { .. }) => {
                    attempts_used += self.budget.transient_attempt_cost;
                }
                Err(err) => return Err(err),
            }

            if attempts_used >= self.budget.max_attempts {
                return Err(self.timeout_error(last_status.as_ref(), polls));
            }

            let wake = Instant::now() + self.budget.interval;
            let wake = match self.deadline {
                Some(deadline) if deadline <= wake => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                    return Err(self.timeout_error(last_status.as_ref(), polls));
                }
                _ => wake,
            };
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(self.timeout_error(last_status.as_ref(), polls));
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    fn timeout_error<S: Display>(&self, last_status: Option<&S>, polls: u32) -> EngineError {
        EngineError::ReconciliationTimeout {
            resource_type: self.resource_type,
            resource_name: self.resource_name.clone(),
            attempts: polls,
            last_status: last_status.map(|s| s.to_string()).unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use crate::resources::vm::VmStatus;

    fn scripted(statuses: Vec<VmStatus>) -> Arc<Mutex<VecDeque<VmStatus>>> {
        Arc::new(Mutex::new(VecDeque::from(statuses)))
    }

    fn poll_count_budget(max_attempts: u32) -> PollBudget {
        PollBudget::new(Duration::ZERO, max_attempts)
    }

    #[tokio::test]
    async fn test_await_terminal_stops_on_first_terminal_status() {
        // setup:
        let script = scripted(vec![VmStatus::Creating, VmStatus::Creating, VmStatus::Running]);
        let polls = Arc::new(Mutex::new(0u32));

        // execute:
        let waiter = Waiter::new(ResourceType::Vm, "vm-01", poll_count_budget(500));
        let script_ref = script.clone();
        let polls_ref = polls.clone();
        let status = waiter
            .await_terminal(
                move || {
                    let script = script_ref.clone();
                    let polls = polls_ref.clone();
                    async move {
                        *polls.lock().unwrap() += 1;
                        Ok(script.lock().unwrap().pop_front().expect("script exhausted"))
                    }
                },
                |status: &VmStatus| *status == VmStatus::Running,
            )
            .await
            .unwrap();

        // verify: exactly three polls, terminal status returned
        assert_eq!(status, VmStatus::Running);
        assert_eq!(*polls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_await_terminal_times_out_after_exactly_max_attempts() {
        // setup:
        let polls = Arc::new(Mutex::new(0u32));

        // execute:
        let waiter = Waiter::new(ResourceType::Vm, "vm-01", poll_count_budget(7));
        let polls_ref = polls.clone();
        let result = waiter
            .await_terminal(
                move || {
                    let polls = polls_ref.clone();
                    async move {
                        *polls.lock().unwrap() += 1;
                        Ok(VmStatus::Creating)
                    }
                },
                |status: &VmStatus| *status == VmStatus::Running,
            )
            .await;

        // verify: never polls past the budget, last status is carried
        assert_eq!(*polls.lock().unwrap(), 7);
        match result {
            Err(EngineError::ReconciliationTimeout {
                attempts, last_status, ..
            }) => {
                assert_eq!(attempts, 7);
                assert_eq!(last_status, "Creating");
            }
            other => panic!("expected ReconciliationTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_read_failures_accelerate_budget_exhaustion() {
        // setup: resource never becomes visible
        let polls = Arc::new(Mutex::new(0u32));

        // execute: budget of 10 attempts, each transient failure costs 5
        let waiter = Waiter::new(ResourceType::Disk, "disk-01", poll_count_budget(10));
        let polls_ref = polls.clone();
        let result = waiter
            .await_terminal(
                move || {
                    let polls = polls_ref.clone();
                    async move {
                        *polls.lock().unwrap() += 1;
                        Err::<VmStatus, _>(EngineError::new_not_found(ResourceType::Disk, "disk-01"))
                    }
                },
                |_| false,
            )
            .await;

        // verify: two polls burn the whole budget
        assert_eq!(*polls.lock().unwrap(), 2);
        assert!(matches!(result, Err(EngineError::ReconciliationTimeout { .. })));
    }

    #[tokio::test]
    async fn test_hard_poll_error_aborts_loop() {
        let waiter = Waiter::new(ResourceType::Vm, "vm-01", poll_count_budget(500));
        let result = waiter
            .await_terminal(
                || async {
                    Err::<VmStatus, _>(EngineError::new_validation("backend rejected the request".to_string()))
                },
                |_| false,
            )
            .await;
        assert!(matches!(result, Err(EngineError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_deadline_reports_last_known_status() {
        // setup: statuses keep coming but the caller deadline is tiny
        let waiter = Waiter::new(
            ResourceType::Cluster,
            "k8s-01",
            PollBudget::new(Duration::from_millis(50), 10_000),
        )
        .with_deadline(Some(Duration::from_millis(120)));

        let result = waiter
            .await_terminal(
                || async { Ok(VmStatus::Creating) },
                |status: &VmStatus| *status == VmStatus::Running,
            )
            .await;

        match result {
            Err(EngineError::ReconciliationTimeout { last_status, .. }) => {
                assert_eq!(last_status, "Creating")
            }
            other => panic!("expected ReconciliationTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_aborts_sleep_and_reports_status() {
        // setup:
        let token = CancellationToken::new();
        let waiter = Waiter::new(
            ResourceType::Vm,
            "vm-01",
            PollBudget::new(Duration::from_secs(3600), 500),
        )
        .with_cancellation(token.clone());

        // execute: cancel while the waiter sleeps
        let handle = tokio::spawn(async move {
            waiter
                .await_terminal(
                    || async { Ok(VmStatus::Creating) },
                    |status: &VmStatus| *status == VmStatus::Running,
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        // verify: the loop ends promptly with the last observed status
        let result = handle.await.unwrap();
        match result {
            Err(EngineError::ReconciliationTimeout { last_status, .. }) => {
                assert_eq!(last_status, "Creating")
            }
            other => panic!("expected ReconciliationTimeout, got {other:?}"),
        }
    }
}
