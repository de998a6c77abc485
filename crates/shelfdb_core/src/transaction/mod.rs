//! Transactions: a FIFO of queued operations drained one at a time.
//!
//! Every data or schema call appends an operation to its transaction's
//! queue and hands back a [`Request`]. Once the scheduler starts the
//! transaction, a spawned task pops operations in order, runs them and
//! delivers their results. A failed operation aborts the whole transaction
//! unless its request was marked with [`Request::prevent_abort`]; the
//! transaction commits when its queue runs dry.
//!
//! Aborting unwinds the [`RollbackLog`](crate::rollback): the immediate list
//! first (in-memory schema state), then the transactional list (persisted
//! records and catalog entries).

pub(crate) mod scheduler;
mod state;

pub use state::{TransactionMode, TransactionOutcome, TransactionState};

use crate::database::DatabaseInner;
use crate::error::{CoreError, CoreResult};
use crate::handle::ObjectStoreHandle;
use crate::request::{Request, Response};
use crate::rollback::{BoxFuture, SharedRollback};
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

type Operation = Box<dyn FnOnce() -> BoxFuture<CoreResult<Response>> + Send>;

enum Pending {
    /// A caller-visible request.
    Observable {
        operation: Operation,
        sender: oneshot::Sender<CoreResult<Response>>,
        prevent_abort: Arc<AtomicBool>,
    },
    /// Engine bookkeeping such as persisting schema changes or backfilling
    /// an index. A failure aborts the transaction.
    Internal { operation: Operation },
    /// Queued at the front by `abort()`.
    Abort,
}

enum Step {
    Run(Pending),
    Commit,
    Stop,
}

struct Core {
    state: TransactionState,
    started: bool,
    queue: VecDeque<Pending>,
    error: Option<CoreError>,
}

/// Engine-side transaction state shared by handles, stores and cursors.
pub(crate) struct TransactionInner {
    pub(crate) id: u64,
    pub(crate) mode: TransactionMode,
    pub(crate) db: Arc<DatabaseInner>,
    pub(crate) connection: u64,
    scope: BTreeSet<String>,
    core: Mutex<Core>,
    pub(crate) rollback: SharedRollback,
    outcome: watch::Sender<Option<TransactionOutcome>>,
}

impl TransactionInner {
    pub(crate) fn new(
        db: Arc<DatabaseInner>,
        mode: TransactionMode,
        scope: BTreeSet<String>,
        connection: u64,
    ) -> Arc<Self> {
        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        let (outcome, _) = watch::channel(None);
        debug!(database = %db.name, transaction = id, ?mode, "transaction created");
        Arc::new(Self {
            id,
            mode,
            db,
            connection,
            scope,
            core: Mutex::new(Core {
                state: TransactionState::Active,
                started: false,
                queue: VecDeque::new(),
                error: None,
            }),
            rollback: SharedRollback::new(),
            outcome,
        })
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.core.lock().state
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state() == TransactionState::Finished
    }

    pub(crate) fn is_started(&self) -> bool {
        self.core.lock().started
    }

    pub(crate) fn mark_started(&self) {
        self.core.lock().started = true;
    }

    pub(crate) fn error(&self) -> Option<CoreError> {
        self.core.lock().error.clone()
    }

    pub(crate) fn require_active(&self) -> CoreResult<()> {
        if self.state() == TransactionState::Active {
            Ok(())
        } else {
            Err(CoreError::inactive())
        }
    }

    pub(crate) fn require_version_change(&self) -> CoreResult<()> {
        if self.mode == TransactionMode::VersionChange {
            Ok(())
        } else {
            Err(CoreError::invalid_state("not inside a version change transaction"))
        }
    }

    pub(crate) fn require_writable(&self) -> CoreResult<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(CoreError::read_only())
        }
    }

    /// Store names this transaction may touch. A version change
    /// transaction sees every store of its database.
    pub(crate) fn store_names(&self) -> Vec<String> {
        match self.mode {
            TransactionMode::VersionChange => self.db.store_names(),
            _ => self.scope.iter().cloned().collect(),
        }
    }

    fn boxed<F, Fut>(operation: F) -> Operation
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<Response>> + Send + 'static,
    {
        Box::new(move || Box::pin(operation()) as BoxFuture<CoreResult<Response>>)
    }

    /// Queues a caller-visible operation.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactiveError` unless the transaction is active.
    pub(crate) fn request<T, F, Fut>(&self, operation: F) -> CoreResult<Request<T>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<Response>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let prevent_abort = Arc::new(AtomicBool::new(false));
        {
            let mut core = self.core.lock();
            if core.state != TransactionState::Active {
                return Err(CoreError::inactive());
            }
            core.queue.push_back(Pending::Observable {
                operation: Self::boxed(operation),
                sender,
                prevent_abort: Arc::clone(&prevent_abort),
            });
        }
        Ok(Request::new(receiver, prevent_abort))
    }

    /// Queues engine bookkeeping; the caller has already checked that the
    /// transaction is active.
    pub(crate) fn queue_internal<F, Fut>(&self, operation: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        let operation = Self::boxed(move || async move {
            operation().await?;
            Ok(Response::Empty)
        });
        self.core.lock().queue.push_back(Pending::Internal { operation });
    }

    /// Starts rolling back. Immediate rollback steps run before this
    /// returns; the rest happens when the drain reaches the abort step,
    /// which is placed ahead of every queued request.
    pub(crate) fn abort(&self) -> CoreResult<()> {
        match self.state() {
            TransactionState::Committing | TransactionState::Finished => {
                return Err(CoreError::invalid_state("the transaction has already finished"));
            }
            TransactionState::Aborting => return Ok(()),
            TransactionState::Active | TransactionState::Inactive => {}
        }
        debug!(database = %self.db.name, transaction = self.id, "abort requested");
        self.rollback.run_immediate();
        let mut core = self.core.lock();
        core.state = TransactionState::Aborting;
        core.queue.push_front(Pending::Abort);
        Ok(())
    }

    /// Stops accepting requests; the transaction commits once its queue is
    /// empty.
    pub(crate) fn commit(&self) -> CoreResult<()> {
        let mut core = self.core.lock();
        if core.state != TransactionState::Active {
            return Err(CoreError::invalid_state("the transaction is not active"));
        }
        core.state = TransactionState::Committing;
        Ok(())
    }

    /// Waits for the transaction to finish.
    pub(crate) async fn done(&self) -> TransactionOutcome {
        let mut receiver = self.outcome.subscribe();
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if receiver.changed().await.is_err() {
                return TransactionOutcome::Aborted(None);
            }
        }
    }

    fn next_step(&self) -> Step {
        let mut core = self.core.lock();
        if core.state == TransactionState::Finished {
            return Step::Stop;
        }
        if let Some(pending) = core.queue.pop_front() {
            return Step::Run(pending);
        }
        match core.state {
            TransactionState::Active | TransactionState::Committing => {
                core.state = TransactionState::Finished;
                Step::Commit
            }
            _ => Step::Stop,
        }
    }

    /// Drains the queue until the transaction finishes. Run on its own task
    /// once the scheduler starts the transaction.
    pub(crate) async fn drain(self: Arc<Self>) {
        debug!(database = %self.db.name, transaction = self.id, "transaction started");
        loop {
            match self.next_step() {
                Step::Run(pending) => self.run(pending).await,
                Step::Commit => {
                    self.finish_commit();
                    return;
                }
                Step::Stop => return,
            }
            if self.is_finished() {
                return;
            }
            if self.db.config.yield_between_requests {
                tokio::task::yield_now().await;
            }
        }
    }

    async fn run(self: &Arc<Self>, pending: Pending) {
        let (operation, observer) = match pending {
            Pending::Abort => {
                self.abort_now(None).await;
                return;
            }
            Pending::Internal { operation } => (operation, None),
            Pending::Observable {
                operation,
                sender,
                prevent_abort,
            } => (operation, Some((sender, prevent_abort))),
        };

        let deactivated = self.set_state_if(TransactionState::Active, TransactionState::Inactive);
        let result = operation().await;
        if deactivated {
            self.set_state_if(TransactionState::Inactive, TransactionState::Active);
        }

        let Some((sender, prevent_abort)) = observer else {
            if let Err(err) = result {
                debug!(database = %self.db.name, transaction = self.id, error = %err, "internal step failed");
                self.fail(err).await;
            }
            return;
        };
        match result {
            Ok(response) => {
                trace!(database = %self.db.name, transaction = self.id, "request succeeded");
                self.db.sink.request_succeeded(&self.db.name, self.id);
                let _ = sender.send(Ok(response));
            }
            Err(err) => {
                trace!(database = %self.db.name, transaction = self.id, error = %err, "request failed");
                self.db.sink.request_failed(&self.db.name, self.id, &err);
                let _ = sender.send(Err(err.clone()));
                if !prevent_abort.load(Ordering::SeqCst) {
                    self.fail(err).await;
                }
            }
        }
    }

    fn set_state_if(&self, from: TransactionState, to: TransactionState) -> bool {
        let mut core = self.core.lock();
        if core.state == from {
            core.state = to;
            true
        } else {
            false
        }
    }

    async fn fail(self: &Arc<Self>, err: CoreError) {
        if self.state() == TransactionState::Aborting {
            return;
        }
        self.rollback.run_immediate();
        self.abort_now(Some(err)).await;
    }

    async fn abort_now(self: &Arc<Self>, error: Option<CoreError>) {
        {
            let mut core = self.core.lock();
            core.state = TransactionState::Aborting;
            core.error.clone_from(&error);
        }
        self.rollback.unwind_transactional().await;
        let cancelled = {
            let mut core = self.core.lock();
            core.state = TransactionState::Finished;
            std::mem::take(&mut core.queue)
        };
        for pending in cancelled {
            if let Pending::Observable { sender, .. } = pending {
                let _ = sender.send(Err(CoreError::abort("the transaction was aborted")));
            }
        }
        debug!(database = %self.db.name, transaction = self.id, error = ?error, "transaction aborted");
        self.db
            .sink
            .transaction_aborted(&self.db.name, self.id, error.as_ref());
        self.outcome
            .send_replace(Some(TransactionOutcome::Aborted(error)));
        self.db.on_transaction_finished();
    }

    fn finish_commit(&self) {
        self.rollback.discard();
        debug!(database = %self.db.name, transaction = self.id, "transaction committed");
        self.db.sink.transaction_completed(&self.db.name, self.id);
        self.outcome.send_replace(Some(TransactionOutcome::Committed));
        self.db.on_transaction_finished();
    }
}

/// A handle to a transaction.
///
/// Cloning is cheap; every clone refers to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    pub(crate) inner: Arc<TransactionInner>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(inner: Arc<TransactionInner>) -> Self {
        Self { inner }
    }

    /// Process-unique transaction id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The transaction's mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.state()
    }

    /// The error that aborted the transaction, if any.
    #[must_use]
    pub fn error(&self) -> Option<CoreError> {
        self.inner.error()
    }

    /// Names of the stores in scope, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        self.inner.store_names()
    }

    /// Opens an object store in this transaction's scope.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` once the transaction has finished, `NotFoundError`
    /// if the store is not in scope.
    pub fn object_store(&self, name: &str) -> CoreResult<ObjectStoreHandle> {
        if self.inner.is_finished() {
            return Err(CoreError::invalid_state("the transaction has finished"));
        }
        let in_scope = self.inner.mode == TransactionMode::VersionChange || self.inner.scope.contains(name);
        let store = in_scope
            .then(|| self.inner.db.store(name))
            .flatten()
            .ok_or_else(|| CoreError::not_found(format!("no object store named {name:?} in scope")))?;
        Ok(ObjectStoreHandle::new(Arc::clone(&self.inner), store))
    }

    /// Aborts the transaction, rolling back every change it made.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the transaction is committing or finished.
    pub fn abort(&self) -> CoreResult<()> {
        self.inner.abort()
    }

    /// Commits as soon as the queued requests have drained; no further
    /// requests are accepted.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` unless the transaction is active.
    pub fn commit(&self) -> CoreResult<()> {
        self.inner.commit()
    }

    /// Waits for the transaction to finish and reports how it ended.
    pub async fn done(&self) -> TransactionOutcome {
        self.inner.done().await
    }
}
