//! Compensating actions run when a transaction aborts.

use crate::error::CoreResult;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// A boxed, sendable future.
pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type ImmediateAction = Box<dyn FnOnce() + Send>;
type TransactionalAction = Box<dyn FnOnce() -> BoxFuture<CoreResult<()>> + Send>;

/// Two ordered lists of undo steps.
///
/// Immediate steps revert in-memory schema state and run synchronously.
/// Transactional steps revert persisted data and may suspend. Both lists
/// unwind last-in first-out.
#[derive(Default)]
pub(crate) struct RollbackLog {
    immediate: Vec<ImmediateAction>,
    transactional: Vec<TransactionalAction>,
}

impl RollbackLog {
    pub(crate) fn push_immediate(&mut self, action: impl FnOnce() + Send + 'static) {
        self.immediate.push(Box::new(action));
    }

    pub(crate) fn push_transactional<F, Fut>(&mut self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        self.transactional
            .push(Box::new(move || Box::pin(action()) as BoxFuture<CoreResult<()>>));
    }

    fn take_immediate(&mut self) -> Vec<ImmediateAction> {
        std::mem::take(&mut self.immediate)
    }

    fn pop_transactional(&mut self) -> Option<TransactionalAction> {
        self.transactional.pop()
    }

    fn clear(&mut self) {
        self.immediate.clear();
        self.transactional.clear();
    }

    #[cfg(test)]
    fn len(&self) -> (usize, usize) {
        (self.immediate.len(), self.transactional.len())
    }
}

/// A rollback log shared between a transaction and the operations it runs.
#[derive(Clone, Default)]
pub(crate) struct SharedRollback(Arc<Mutex<RollbackLog>>);

impl SharedRollback {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_immediate(&self, action: impl FnOnce() + Send + 'static) {
        self.0.lock().push_immediate(action);
    }

    pub(crate) fn push_transactional<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        self.0.lock().push_transactional(action);
    }

    /// Runs and discards the immediate list, newest first.
    pub(crate) fn run_immediate(&self) {
        let actions = self.0.lock().take_immediate();
        for action in actions.into_iter().rev() {
            action();
        }
    }

    /// Awaits every transactional step, newest first. A failing step is
    /// logged and the unwind continues.
    pub(crate) async fn unwind_transactional(&self) {
        loop {
            let next = self.0.lock().pop_transactional();
            let Some(action) = next else {
                break;
            };
            if let Err(err) = action().await {
                warn!(error = %err, "rollback step failed");
            }
        }
    }

    /// Drops every step; used on commit.
    pub(crate) fn discard(&self) {
        self.0.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn immediate_actions_run_newest_first() {
        let rollback = SharedRollback::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            rollback.push_immediate(move || order.lock().push(i));
        }
        rollback.run_immediate();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
        rollback.run_immediate();
        assert_eq!(order.lock().len(), 3);
    }

    #[tokio::test]
    async fn transactional_actions_unwind_past_failures() {
        let rollback = SharedRollback::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            rollback.push_transactional(move || async move {
                order.lock().push(i);
                if i == 1 {
                    Err(CoreError::abort("boom"))
                } else {
                    Ok(())
                }
            });
        }
        rollback.unwind_transactional().await;
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn discard_drops_everything() {
        let rollback = SharedRollback::new();
        rollback.push_immediate(|| {});
        rollback.push_transactional(|| async { Ok(()) });
        assert_eq!(rollback.0.lock().len(), (1, 1));
        rollback.discard();
        assert_eq!(rollback.0.lock().len(), (0, 0));
    }
}
