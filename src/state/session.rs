use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::Context;
use super::listeners::Listeners;
use super::transaction::TransactionController;
use crate::services::background::{self, FlagGuard};
use crate::services::driver::{Connection, Session, SessionKind};

/// Owns at most one open session, bound to one database and one kind.
pub struct SessionController {
    context: Context,
    handle: RwLock<Option<Arc<dyn Session>>>,
    database: RwLock<Option<String>>,
    kind: RwLock<SessionKind>,
    is_open: AtomicBool,
    is_resetting: AtomicBool,
    /// Serializes `open`; held across the driver call
    open_lock: async_lock::Mutex<()>,
    transaction: Arc<TransactionController>,
    on_open: Listeners<bool>,
    on_close: Listeners<()>,
    on_reopen: Listeners<()>,
}

impl SessionController {
    pub fn new(context: Context) -> Arc<Self> {
        Arc::new_cyclic(|session| Self {
            transaction: TransactionController::new(session.clone(), context.clone()),
            context,
            handle: RwLock::new(None),
            database: RwLock::new(None),
            kind: RwLock::new(SessionKind::Data),
            is_open: AtomicBool::new(false),
            is_resetting: AtomicBool::new(false),
            open_lock: async_lock::Mutex::new(()),
            on_open: Listeners::new(),
            on_close: Listeners::new(),
            on_reopen: Listeners::new(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    pub fn database(&self) -> Option<String> {
        self.database.read().clone()
    }

    /// Kind of the current (or last requested) session
    pub fn kind(&self) -> SessionKind {
        *self.kind.read()
    }

    pub fn transaction(&self) -> &Arc<TransactionController> {
        &self.transaction
    }

    pub(crate) fn handle(&self) -> Option<Arc<dyn Session>> {
        self.handle.read().clone()
    }

    /// The flag tells whether the database differs from the previous session's.
    pub fn on_open(&self, listener: impl Fn(&bool) + Send + Sync + 'static) {
        self.on_open.add(listener);
    }

    pub fn on_close(&self, listener: impl Fn(&()) + Send + Sync + 'static) {
        self.on_close.add(listener);
    }

    pub fn on_reopen(&self, listener: impl Fn(&()) + Send + Sync + 'static) {
        self.on_reopen.add(listener);
    }

    /// Open a `kind` session to `database`, replacing the current one.
    /// Returns whether a session matching the request is open afterwards.
    pub async fn open(
        self: &Arc<Self>,
        connection: &Arc<dyn Connection>,
        database: &str,
        kind: SessionKind,
    ) -> bool {
        let _open = self.open_lock.lock().await;

        let current = self.database();
        if self.is_open() && current.as_deref() == Some(database) && self.kind() == kind {
            return true;
        }

        let is_new_database = current.as_deref() != Some(database);
        if current.is_some() && is_new_database {
            self.close();
        } else {
            self.reset();
        }

        let connection = connection.clone();
        let name = database.to_string();
        let result = background::driver_call(move || connection.session(&name, kind)).await;

        match result {
            Ok(session) => {
                self.register_callbacks(&session);
                *self.handle.write() = Some(session);
                *self.database.write() = Some(database.to_string());
                *self.kind.write() = kind;
                self.is_open.store(true, Ordering::Release);

                tracing::info!(database, %kind, "session opened");
                self.on_open.fire(&is_new_database);
                true
            }
            Err(error) => {
                self.context.notifier().error(format!(
                    "Failed to open {} session to database '{}': {}",
                    kind, database, error
                ));
                false
            }
        }
    }

    /// Close the session and its transaction. Safe to call repeatedly.
    pub fn close(&self) {
        if self
            .is_open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.reset();
            tracing::info!("session closed");
            self.on_close.fire(&());
        }
    }

    /// Tear down the transaction, then the session handle, then the database.
    fn reset(&self) {
        let Some(_resetting) = FlagGuard::acquire(&self.is_resetting) else {
            return;
        };

        self.is_open.store(false, Ordering::Release);
        self.transaction.close(None);
        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            handle.close();
        }
        *self.database.write() = None;
    }

    fn register_callbacks(self: &Arc<Self>, session: &Arc<dyn Session>) {
        let controller = Arc::downgrade(self);
        let closed = Arc::downgrade(session);
        session.on_close(Box::new(move || {
            if let Some(controller) = controller.upgrade() {
                controller.closed_on_server(&closed);
            }
        }));

        let controller = Arc::downgrade(self);
        let reopened = Arc::downgrade(session);
        session.on_reopen(Box::new(move || {
            if let Some(controller) = controller.upgrade() {
                controller.reopened(&reopened);
            }
        }));
    }

    /// Callbacks of a replaced session must not touch the current one.
    fn is_current(&self, session: &Weak<dyn Session>) -> bool {
        self.handle
            .read()
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), session.as_ptr()))
    }

    fn closed_on_server(&self, session: &Weak<dyn Session>) {
        if !self.is_current(session) {
            return;
        }
        if self
            .is_open
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let database = self.database().unwrap_or_default();
        self.reset();
        self.context.notifier().warning(format!(
            "The session to database '{}' was closed on the server.",
            database
        ));
        self.on_close.fire(&());
    }

    fn reopened(&self, session: &Weak<dyn Session>) {
        if !self.is_current(session) {
            return;
        }
        self.is_open.store(true, Ordering::Release);
        tracing::info!(database = ?self.database(), "session reopened");
        self.on_reopen.fire(&());
    }
}
