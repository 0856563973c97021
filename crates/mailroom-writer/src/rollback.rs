//! Compensating-action rollback for multi-step writes.
//!
//! Each create saga registers an undo step after every externally visible
//! side effect (constraint reserved, provider call accepted, record
//! persisted, index written). On failure the accumulated steps run in
//! reverse registration order; each step is best-effort and a failing step
//! never masks the error that triggered the rollback.

use std::{future::Future, pin::Pin};

use tracing::{error, info};

type CompensationFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type CompensationFn = Box<dyn FnOnce() -> CompensationFuture + Send>;

/// Accumulates compensation steps for one in-flight saga.
pub struct Rollback {
    operation: &'static str,
    steps: Vec<(String, CompensationFn)>,
}

impl Rollback {
    /// Starts an empty step list for the named operation.
    pub fn new(operation: &'static str) -> Self {
        Self { operation, steps: Vec::new() }
    }

    /// Registers an undo step for a side effect that just succeeded.
    pub fn push<F, Fut>(&mut self, label: impl Into<String>, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.steps.push((label.into(), Box::new(move || Box::pin(undo()))));
    }

    /// Number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no steps have been registered.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the rollback and surfaces the error that triggered it, with
    /// the operation name prepended as context.
    pub async fn abort<T>(self, err: mailroom_core::Error) -> mailroom_core::Result<T> {
        let operation = self.operation;
        self.run().await;
        Err(err.context(operation))
    }

    /// Runs every registered step in reverse registration order.
    ///
    /// Steps are infallible by construction; any internal failure is the
    /// step's own to log. The step list is consumed.
    pub async fn run(self) {
        if self.steps.is_empty() {
            return;
        }

        error!(
            operation = self.operation,
            steps = self.steps.len(),
            "write failed, rolling back side effects"
        );
        for (label, undo) in self.steps.into_iter().rev() {
            info!(operation = self.operation, step = %label, "compensating");
            undo().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn runs_steps_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut rollback = Rollback::new("test");

        for step in ["constraint", "provider", "record"] {
            let log = log.clone();
            rollback.push(step, move || async move {
                log.lock().unwrap().push(step);
            });
        }

        assert_eq!(rollback.len(), 3);
        rollback.run().await;
        assert_eq!(*log.lock().unwrap(), vec!["record", "provider", "constraint"]);
    }

    #[tokio::test]
    async fn empty_rollback_is_a_no_op() {
        let rollback = Rollback::new("test");
        assert!(rollback.is_empty());
        rollback.run().await;
    }
}
