use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::Context;
use super::listeners::Listeners;
use super::query::QueryRunner;
use super::session::SessionController;
use crate::services::background::{self, FlagGuard};
use crate::services::driver::{
    DriverError, SessionKind, Transaction, TransactionOptions, TransactionType,
};

const SESSION_CLOSED: &str = "Failed to open a transaction: the session is closed.";
const CLOSED_ON_SERVER: &str = "The transaction was closed on the server";
const CLOSED_IN_QUERY: &str = "The transaction was closed while running the query.";

/// Raw option toggles as the user set them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Toggles {
    snapshot: bool,
    infer: bool,
    explain: bool,
}

impl Toggles {
    /// Values actually in force for a transaction of type `transaction_type`.
    fn effective(self, transaction_type: TransactionType) -> Toggles {
        let snapshot = self.snapshot || transaction_type.is_write();
        let infer = self.infer && !transaction_type.is_write();
        let explain = self.explain && infer && snapshot;
        Toggles {
            snapshot,
            infer,
            explain,
        }
    }
}

/// Effective value of a transaction option and whether the user may flip it.
///
/// Nothing can be toggled without an open session. Snapshot and inference
/// are locked whenever the selected type is write, whether or not a write
/// transaction is open yet. Explanation needs effective inference and
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleState {
    pub value: bool,
    pub can_toggle: bool,
}

/// Owns at most one open transaction in the current session.
pub struct TransactionController {
    session: Weak<SessionController>,
    context: Context,
    transaction_type: RwLock<TransactionType>,
    toggles: RwLock<Toggles>,
    transaction: Mutex<Option<Arc<dyn Transaction>>>,
    is_open: AtomicBool,
    has_running_query: AtomicBool,
    /// Stop flag of the latest query; every launch gets a fresh one
    stop_signal: Mutex<Arc<AtomicBool>>,
    /// Held while a query is launched or its completion is handled
    launch_lock: Mutex<()>,
    on_schema_write_reset: Listeners<()>,
}

impl TransactionController {
    pub(crate) fn new(session: Weak<SessionController>, context: Context) -> Arc<Self> {
        Arc::new(Self {
            session,
            context,
            transaction_type: RwLock::new(TransactionType::default()),
            toggles: RwLock::new(Toggles::default()),
            transaction: Mutex::new(None),
            is_open: AtomicBool::new(false),
            has_running_query: AtomicBool::new(false),
            stop_signal: Mutex::new(Arc::new(AtomicBool::new(false))),
            launch_lock: Mutex::new(()),
            on_schema_write_reset: Listeners::new(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    pub fn has_running_query(&self) -> bool {
        self.has_running_query.load(Ordering::Acquire)
    }

    pub fn has_stop_signal(&self) -> bool {
        self.stop_signal.lock().load(Ordering::Acquire)
    }

    /// Ask the running query, if any, to stop at its next checkpoint.
    pub fn send_stop_signal(&self) {
        self.stop_signal.lock().store(true, Ordering::Release);
    }

    pub fn transaction_type(&self) -> TransactionType {
        *self.transaction_type.read()
    }

    /// Changing the type closes the open transaction; the type is fixed once
    /// a transaction is opened.
    pub fn set_transaction_type(&self, transaction_type: TransactionType) {
        {
            let mut current = self.transaction_type.write();
            if *current == transaction_type {
                return;
            }
            *current = transaction_type;
        }
        tracing::debug!(%transaction_type, "transaction type changed");
        self.close(None);
    }

    pub fn snapshot(&self) -> ToggleState {
        ToggleState {
            value: self.effective().snapshot,
            can_toggle: self.session_is_open() && !self.transaction_type().is_write(),
        }
    }

    pub fn infer(&self) -> ToggleState {
        ToggleState {
            value: self.effective().infer,
            can_toggle: self.session_is_open() && !self.transaction_type().is_write(),
        }
    }

    pub fn explain(&self) -> ToggleState {
        let effective = self.effective();
        ToggleState {
            value: effective.explain,
            can_toggle: self.session_is_open() && effective.infer && effective.snapshot,
        }
    }

    pub fn toggle_snapshot(&self) {
        if self.snapshot().can_toggle {
            let mut toggles = self.toggles.write();
            toggles.snapshot = !toggles.snapshot;
        }
    }

    /// Inference is a transaction option, so flipping it closes the open
    /// transaction.
    pub fn toggle_infer(&self) {
        if self.infer().can_toggle {
            {
                let mut toggles = self.toggles.write();
                toggles.infer = !toggles.infer;
            }
            self.close(None);
        }
    }

    pub fn toggle_explain(&self) {
        if self.explain().can_toggle {
            {
                let mut toggles = self.toggles.write();
                toggles.explain = !toggles.explain;
            }
            self.close(None);
        }
    }

    /// Fired after a write transaction on a schema session ends, so cached
    /// schema views can refresh.
    pub fn on_schema_write_reset(&self, listener: impl Fn(&()) + Send + Sync + 'static) {
        self.on_schema_write_reset.add(listener);
    }

    /// Return the open transaction, opening one if needed.
    pub async fn open(self: &Arc<Self>) -> Option<Arc<dyn Transaction>> {
        if self.is_open() {
            if let Some(transaction) = self.transaction.lock().clone() {
                return Some(transaction);
            }
        }

        let Some(session) = self.session.upgrade().and_then(|s| s.handle()) else {
            self.context.notifier().error(SESSION_CLOSED);
            return None;
        };

        let transaction_type = self.transaction_type();
        let effective = self.effective();
        let options = TransactionOptions {
            infer: effective.infer,
            explain: effective.explain,
            timeout: Some(self.context.preferences().transaction_timeout()),
        };

        match background::driver_call(move || session.transaction(transaction_type, options)).await
        {
            Ok(transaction) => {
                let controller = Arc::downgrade(self);
                let closed = Arc::downgrade(&transaction);
                transaction.on_close(Box::new(move |error| {
                    if let Some(controller) = controller.upgrade() {
                        controller.closed_on_server(&closed, error);
                    }
                }));

                *self.transaction.lock() = Some(transaction.clone());
                self.is_open.store(true, Ordering::Release);
                tracing::debug!(%transaction_type, ?options, "transaction opened");
                Some(transaction)
            }
            Err(error) => {
                self.context
                    .notifier()
                    .error(format!("Failed to open a transaction: {}", error));
                None
            }
        }
    }

    /// Launch `content` on the open transaction (opening one if needed).
    /// Returns `None` while another query is still running.
    pub async fn run_query(
        self: &Arc<Self>,
        content: impl Into<String>,
    ) -> Option<Arc<QueryRunner>> {
        // A previous runner may still wait for its consumer; it keeps its
        // own raised flag and its completion no longer counts.
        let stop_signal = Arc::new(AtomicBool::new(false));
        let running = {
            let _launch = self.launch_lock.lock();
            let running = FlagGuard::acquire(&self.has_running_query)?;
            *self.stop_signal.lock() = stop_signal.clone();
            running
        };

        let transaction = self.open().await?;
        let runner = QueryRunner::new(
            transaction.clone(),
            content,
            self.context.preferences().query_limit(),
            stop_signal.clone(),
        );

        let controller = Arc::downgrade(self);
        runner.on_complete(move |_| {
            if let Some(controller) = controller.upgrade() {
                controller.query_completed(&stop_signal, &transaction);
            }
        });

        smol::spawn(runner.clone().launch()).detach();
        running.disarm();
        Some(runner)
    }

    pub async fn commit(&self) {
        self.send_stop_signal();
        let Some(transaction) = self.take_open() else {
            return;
        };

        match background::driver_call(move || transaction.commit()).await {
            Ok(()) => self
                .context
                .notifier()
                .info("Successfully committed the write transaction."),
            Err(error) => self
                .context
                .notifier()
                .error(format!("Failed to commit the transaction: {}", error)),
        }
        self.may_reset_schema_write();
    }

    pub async fn rollback(&self) {
        self.send_stop_signal();
        let Some(transaction) = self.take_open() else {
            return;
        };

        let result = background::driver_call(move || {
            let result = transaction.rollback();
            transaction.close();
            result
        })
        .await;

        match result {
            Ok(()) => self
                .context
                .notifier()
                .info("Successfully rolled back the transaction."),
            Err(error) => self
                .context
                .notifier()
                .error(format!("Failed to roll back the transaction: {}", error)),
        }
        self.may_reset_schema_write();
    }

    /// Close the open transaction, surfacing `message` as an error if given.
    /// Does nothing if no transaction is open.
    pub fn close(&self, message: Option<String>) {
        self.send_stop_signal();
        let Some(transaction) = self.take_open() else {
            return;
        };

        transaction.close();
        self.has_running_query.store(false, Ordering::Release);
        tracing::debug!("transaction closed");
        if let Some(message) = message {
            self.context.notifier().error(message);
        }
        self.may_reset_schema_write();
    }

    /// Flip `is_open` to false exactly once and hand out the transaction.
    fn take_open(&self) -> Option<Arc<dyn Transaction>> {
        self.is_open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.transaction.lock().take()
    }

    fn closed_on_server(&self, closed: &Weak<dyn Transaction>, error: Option<DriverError>) {
        let is_current = self
            .transaction
            .lock()
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), closed.as_ptr()));
        if !is_current {
            return;
        }

        let message = match error {
            Some(error) => format!("{}: {}", CLOSED_ON_SERVER, error),
            None => format!("{}.", CLOSED_ON_SERVER),
        };
        self.close(Some(message));
    }

    /// Completion of a runner that is no longer the latest one is ignored:
    /// its transaction was already closed and the flags belong to the next
    /// query.
    fn query_completed(
        &self,
        stop_signal: &Arc<AtomicBool>,
        transaction: &Arc<dyn Transaction>,
    ) {
        let _launch = self.launch_lock.lock();
        let is_latest = Arc::ptr_eq(&*self.stop_signal.lock(), stop_signal);
        if !is_latest {
            tracing::debug!("completion of a replaced query ignored");
            return;
        }

        if !self.snapshot().value {
            self.close(None);
        } else if !transaction.is_open() {
            self.close(Some(CLOSED_IN_QUERY.to_string()));
        } else {
            self.may_reset_schema_write();
        }
        stop_signal.store(false, Ordering::Release);
        self.has_running_query.store(false, Ordering::Release);
    }

    fn may_reset_schema_write(&self) {
        let is_schema_session = self
            .session
            .upgrade()
            .is_some_and(|session| session.kind() == SessionKind::Schema);
        if is_schema_session && self.transaction_type().is_write() {
            self.on_schema_write_reset.fire(&());
        }
    }

    fn effective(&self) -> Toggles {
        self.toggles.read().effective(self.transaction_type())
    }

    fn session_is_open(&self) -> bool {
        self.session
            .upgrade()
            .is_some_and(|session| session.is_open())
    }
}
