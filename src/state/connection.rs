use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::Context;
use super::query::{QueryRunner, QueryRunnerRegistry};
use super::session::SessionController;
use crate::error::{Error, Result};
use crate::services::background::{self, FlagGuard};
use crate::services::driver::{ConnectTarget, Connection, Driver, SessionKind, TransactionType};

/// Status changes kept when nobody is listening
const STATUS_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub status: ConnectionStatus,
    pub timestamp: DateTime<Utc>,
}

/// Result of a connect attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// Connected, but the account must change its password before anything
    /// else is allowed
    PasswordChangeRequired,
    AlreadyConnecting,
    AlreadyConnected,
    /// `close()` was called while the connection was being established
    Aborted,
}

/// Entry point of the UI: owns the connection and the single session, and
/// runs mutating commands one at a time.
pub struct ConnectionSupervisor {
    pub(super) context: Context,
    driver: Arc<dyn Driver>,
    status: Mutex<ConnectionStatus>,
    status_sender: Sender<ConnectionEvent>,
    status_receiver: Receiver<ConnectionEvent>,
    connection: Mutex<Option<Arc<dyn Connection>>>,
    pub(super) target: Mutex<Option<ConnectTarget>>,
    databases: RwLock<Vec<String>>,
    session: Arc<SessionController>,
    is_command_running: AtomicBool,
    pub(super) needs_password_change: AtomicBool,
}

impl ConnectionSupervisor {
    pub fn new(driver: Arc<dyn Driver>, context: Context) -> Self {
        let (status_sender, status_receiver) = async_channel::bounded(STATUS_BUFFER);
        Self {
            session: SessionController::new(context.clone()),
            context,
            driver,
            status: Mutex::new(ConnectionStatus::Disconnected),
            status_sender,
            status_receiver,
            connection: Mutex::new(None),
            target: Mutex::new(None),
            databases: RwLock::new(Vec::new()),
            is_command_running: AtomicBool::new(false),
            needs_password_change: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.status() == ConnectionStatus::Connecting
    }

    /// Every status transition, in order.
    pub fn status_receiver(&self) -> Receiver<ConnectionEvent> {
        self.status_receiver.clone()
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn needs_password_change(&self) -> bool {
        self.needs_password_change.load(Ordering::Acquire)
    }

    pub fn is_command_running(&self) -> bool {
        self.is_command_running.load(Ordering::Acquire)
    }

    pub fn is_cloud(&self) -> bool {
        self.target.lock().as_ref().is_some_and(ConnectTarget::is_cloud)
    }

    /// Short description of the server, e.g. `admin@10.0.0.1:1729`
    pub fn connection_name(&self) -> Option<String> {
        self.target.lock().as_ref().map(ConnectTarget::display_name)
    }

    /// Cached database names, as of the last refresh
    pub fn databases(&self) -> Vec<String> {
        self.databases.read().clone()
    }

    pub(super) fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.lock().clone()
    }

    /// Connect to `target`. Calling this while connecting or connected is a
    /// no-op reported through the outcome. Failures leave the supervisor
    /// disconnected and are also surfaced as notifications.
    pub async fn connect(&self, target: ConnectTarget) -> Result<ConnectOutcome> {
        {
            let mut status = self.status.lock();
            match *status {
                ConnectionStatus::Connecting => return Ok(ConnectOutcome::AlreadyConnecting),
                ConnectionStatus::Connected => return Ok(ConnectOutcome::AlreadyConnected),
                ConnectionStatus::Disconnected => {
                    self.needs_password_change.store(false, Ordering::Release);
                    *status = ConnectionStatus::Connecting;
                    self.broadcast(ConnectionStatus::Connecting);
                }
            }
        }

        let name = target.display_name();
        tracing::info!(server = %name, "connecting");

        let driver = self.driver.clone();
        let request = target.clone();
        let connection = match background::driver_call(move || driver.connect(&request)).await {
            Ok(connection) => connection,
            Err(error) => {
                self.transition(&[ConnectionStatus::Connecting], ConnectionStatus::Disconnected);
                match &error {
                    Error::Driver(driver_error) => self
                        .context
                        .notifier()
                        .error(format!("Failed to connect to {}: {}", name, driver_error)),
                    other => self.context.notifier().unexpected(other),
                }
                return Err(error);
            }
        };

        {
            let mut slot = self.connection.lock();
            if !self.transition(&[ConnectionStatus::Connecting], ConnectionStatus::Connected) {
                drop(slot);
                tracing::info!(server = %name, "connection closed while connecting");
                connection.close();
                return Ok(ConnectOutcome::Aborted);
            }
            *slot = Some(connection.clone());
            *self.target.lock() = Some(target.clone());
        }
        tracing::info!(server = %name, "connected");

        let outcome = if target.is_cloud() {
            self.check_password_policy(&connection).await
        } else {
            self.refresh_databases().await;
            ConnectOutcome::Connected
        };
        if !self.is_connected() {
            tracing::info!(server = %name, "connection closed while checking the account");
            return Ok(ConnectOutcome::Aborted);
        }
        Ok(outcome)
    }

    /// Disconnect, closing the session and its transaction first. Safe to
    /// call in any state.
    pub fn close(&self) {
        if !self.transition(
            &[ConnectionStatus::Connected, ConnectionStatus::Connecting],
            ConnectionStatus::Disconnected,
        ) {
            return;
        }

        self.needs_password_change.store(false, Ordering::Release);
        self.session.close();
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.close();
        }
        self.databases.write().clear();
        tracing::info!("disconnected");
    }

    /// Reload the database list from the server.
    pub async fn refresh_databases(&self) -> Vec<String> {
        let Some(connection) = self.connection() else {
            return Vec::new();
        };

        match background::driver_call(move || connection.databases()).await {
            Ok(databases) => self.store_databases(databases),
            Err(error) => {
                self.context
                    .notifier()
                    .error(format!("Failed to refresh the database list: {}", error));
                self.databases()
            }
        }
    }

    /// Cache `databases` unless the supervisor was closed in the meantime.
    pub(super) fn store_databases(&self, mut databases: Vec<String>) -> Vec<String> {
        databases.sort();
        let stored = self.while_connected(|| *self.databases.write() = databases.clone());
        if stored { databases } else { Vec::new() }
    }

    /// Run `update` only if connected, holding the status so `close()` cannot
    /// interleave. `close()` clears connection state after its transition.
    pub(super) fn while_connected(&self, update: impl FnOnce()) -> bool {
        let status = self.status.lock();
        if *status != ConnectionStatus::Connected {
            return false;
        }
        update();
        true
    }

    pub async fn create_database(&self, name: &str) -> bool {
        self.may_run_command(async {
            let Some(connection) = self.connection() else {
                return false;
            };
            let database = name.to_string();
            match background::driver_call(move || connection.create_database(&database)).await {
                Ok(()) => {
                    self.context
                        .notifier()
                        .info(format!("Created database '{}'.", name));
                    self.refresh_databases().await;
                    true
                }
                Err(error) => {
                    self.context
                        .notifier()
                        .error(format!("Failed to create database '{}': {}", name, error));
                    false
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Delete a database. An open session on it is closed first.
    pub async fn delete_database(&self, name: &str) -> bool {
        self.may_run_command(async {
            let Some(connection) = self.connection() else {
                return false;
            };
            if self.session.database().as_deref() == Some(name) {
                self.session.close();
            }
            let database = name.to_string();
            match background::driver_call(move || connection.delete_database(&database)).await {
                Ok(()) => {
                    self.context
                        .notifier()
                        .info(format!("Deleted database '{}'.", name));
                    self.refresh_databases().await;
                    true
                }
                Err(error) => {
                    self.context
                        .notifier()
                        .error(format!("Failed to delete database '{}': {}", name, error));
                    false
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    pub async fn open_session(&self, database: &str, kind: SessionKind) -> bool {
        self.may_run_command(async {
            let Some(connection) = self.connection() else {
                return false;
            };
            self.session.open(&connection, database, kind).await
        })
        .await
        .unwrap_or(false)
    }

    pub fn close_session(&self) {
        self.session.close();
    }

    /// Run `content` in the current session and record the runner in
    /// `registry`. `None` if the command was refused or a query is still
    /// running.
    pub async fn run_query(
        &self,
        content: &str,
        registry: &QueryRunnerRegistry,
    ) -> Option<Arc<QueryRunner>> {
        self.may_run_command(async {
            let runner = self.session.transaction().run_query(content).await?;
            registry.launched(runner.clone());
            Some(runner)
        })
        .await
        .flatten()
    }

    pub fn stop_running_query(&self) {
        self.session.transaction().send_stop_signal();
    }

    pub fn set_transaction_type(&self, transaction_type: TransactionType) {
        self.session.transaction().set_transaction_type(transaction_type);
    }

    pub async fn commit(&self) {
        self.may_run_command(self.session.transaction().commit()).await;
    }

    pub async fn rollback(&self) {
        self.may_run_command(self.session.transaction().rollback()).await;
    }

    pub async fn close_transaction(&self) {
        self.may_run_command(async { self.session.transaction().close(None) })
            .await;
    }

    /// Run `command` unless another one is in flight, in which case it is
    /// dropped. Panics inside the command are reported, not propagated.
    async fn may_run_command<T>(&self, command: impl Future<Output = T>) -> Option<T> {
        if self.needs_password_change() {
            self.context
                .notifier()
                .error("The password must be changed before running commands.");
            return None;
        }
        if !self.is_connected() {
            self.context.notifier().error("Not connected to a server.");
            return None;
        }

        let Some(_running) = FlagGuard::acquire(&self.is_command_running) else {
            tracing::debug!("another command is running; command dropped");
            return None;
        };

        match background::guarded(command).await {
            Ok(output) => Some(output),
            Err(error) => {
                self.context.notifier().unexpected(&error);
                None
            }
        }
    }

    /// Move from any of `from` to `to`; false if the current status is not
    /// in `from`.
    fn transition(&self, from: &[ConnectionStatus], to: ConnectionStatus) -> bool {
        let mut status = self.status.lock();
        if !from.contains(&*status) {
            return false;
        }
        *status = to;
        self.broadcast(to);
        true
    }

    fn broadcast(&self, status: ConnectionStatus) {
        let _ = self.status_sender.force_send(ConnectionEvent {
            status,
            timestamp: Utc::now(),
        });
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.close();
    }
}
