//! In-process stand-in for the database driver.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use studio_core::services::driver::{
    Concept, ConceptRow, ConnectTarget, Connection, Document, DocumentIter, Driver, DriverError,
    DriverResult, RowIter, Session, SessionCallback, SessionKind, Transaction,
    TransactionCallback, TransactionOptions, TransactionType,
};
use studio_core::services::{Notification, Preferences};
use studio_core::state::{MessageKind, QueryRunner, Response, ResponseStream, StreamItem, StreamSource};
use studio_core::{ConnectionSupervisor, Context};

/// Canned answer for queries starting with a given prefix.
#[derive(Clone)]
pub enum Answer {
    Rows(Vec<ConceptRow>),
    Documents(Vec<Document>),
    Error(DriverError),
    /// Rows produced one by one, sleeping before each
    Slow { rows: Vec<ConceptRow>, delay: Duration },
    Panic,
}

#[derive(Default)]
pub struct ServerState {
    pub databases: Vec<String>,
    pub connect_error: Option<DriverError>,
    pub connect_panic: bool,
    pub connect_delay: Option<Duration>,
    pub create_delay: Option<Duration>,
    pub databases_delay: Option<Duration>,
    pub password: String,
    pub password_expiry: Option<Duration>,
    /// Returned by `databases()` until the password is changed
    pub probe_error: Option<DriverError>,
    pub commit_error: Option<DriverError>,
    pub answers: Vec<(String, Answer)>,
    pub log: Vec<String>,
    pub last_target: Option<ConnectTarget>,
    pub connections: Vec<Arc<FakeConnection>>,
    pub sessions: Vec<Arc<FakeSession>>,
    pub transactions: Vec<Arc<FakeTransaction>>,
}

#[derive(Default)]
pub struct FakeServer {
    pub state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn new(databases: &[&str]) -> Arc<Self> {
        let server = Arc::new(Self::default());
        {
            let mut state = server.state.lock();
            state.databases = databases.iter().map(|d| d.to_string()).collect();
            state.password = "password".to_string();
        }
        server
    }

    pub fn answer(&self, prefix: &str, answer: Answer) {
        self.state.lock().answers.push((prefix.to_string(), answer));
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn open_sessions(&self) -> Vec<Arc<FakeSession>> {
        self.state
            .lock()
            .sessions
            .iter()
            .filter(|s| s.is_open())
            .cloned()
            .collect()
    }

    pub fn last_session(&self) -> Option<Arc<FakeSession>> {
        self.state.lock().sessions.last().cloned()
    }

    pub fn last_transaction(&self) -> Option<Arc<FakeTransaction>> {
        self.state.lock().transactions.last().cloned()
    }

    pub fn last_connection(&self) -> Option<Arc<FakeConnection>> {
        self.state.lock().connections.last().cloned()
    }

    fn record(&self, entry: impl Into<String>) {
        self.state.lock().log.push(entry.into());
    }

    fn lookup(&self, query: &str) -> Option<Answer> {
        self.state
            .lock()
            .answers
            .iter()
            .find(|(prefix, _)| query.starts_with(prefix.as_str()))
            .map(|(_, answer)| answer.clone())
    }
}

pub struct FakeDriver {
    pub server: Arc<FakeServer>,
}

impl Driver for FakeDriver {
    fn connect(&self, target: &ConnectTarget) -> DriverResult<Arc<dyn Connection>> {
        let (delay, error, panic) = {
            let state = self.server.state.lock();
            (state.connect_delay, state.connect_error.clone(), state.connect_panic)
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if panic {
            panic!("fake driver panic");
        }
        if let Some(error) = error {
            return Err(error);
        }
        if let Some(credential) = target.credential() {
            if credential.password != self.server.state.lock().password {
                return Err(DriverError::Authentication("invalid credential".into()));
            }
        }

        let connection = Arc::new(FakeConnection {
            server: self.server.clone(),
            open: AtomicBool::new(true),
        });
        let mut state = self.server.state.lock();
        state.last_target = Some(target.clone());
        state.connections.push(connection.clone());
        Ok(connection)
    }
}

pub struct FakeConnection {
    server: Arc<FakeServer>,
    open: AtomicBool,
}

impl Connection for FakeConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn databases(&self) -> DriverResult<Vec<String>> {
        let delay = self.server.state.lock().databases_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let state = self.server.state.lock();
        match &state.probe_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.databases.clone()),
        }
    }

    fn create_database(&self, name: &str) -> DriverResult<()> {
        let delay = self.server.state.lock().create_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.server.state.lock();
        if state.databases.iter().any(|d| d == name) {
            return Err(DriverError::server("DBS02", format!("database '{}' exists", name)));
        }
        state.databases.push(name.to_string());
        state.log.push(format!("create database {}", name));
        Ok(())
    }

    fn delete_database(&self, name: &str) -> DriverResult<()> {
        let mut state = self.server.state.lock();
        let Some(index) = state.databases.iter().position(|d| d == name) else {
            return Err(DriverError::server("DBS01", format!("database '{}' does not exist", name)));
        };
        state.databases.remove(index);
        state.log.push(format!("delete database {}", name));
        Ok(())
    }

    fn session(&self, database: &str, kind: SessionKind) -> DriverResult<Arc<dyn Session>> {
        if !self.server.state.lock().databases.iter().any(|d| d == database) {
            return Err(DriverError::server(
                "DBS01",
                format!("database '{}' does not exist", database),
            ));
        }
        let session = Arc::new(FakeSession {
            server: self.server.clone(),
            database: database.to_string(),
            kind,
            open: AtomicBool::new(true),
            on_close: Mutex::new(Vec::new()),
            on_reopen: Mutex::new(Vec::new()),
        });
        let mut state = self.server.state.lock();
        state.log.push(format!("open {} session {}", kind, database));
        state.sessions.push(session.clone());
        Ok(session)
    }

    fn password_expiry(&self) -> DriverResult<Option<Duration>> {
        Ok(self.server.state.lock().password_expiry)
    }

    fn update_password(&self, old: &str, new: &str) -> DriverResult<()> {
        let mut state = self.server.state.lock();
        if state.password != old {
            return Err(DriverError::Authentication("old password is wrong".into()));
        }
        state.password = new.to_string();
        state.probe_error = None;
        state.log.push("update password".to_string());
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;

pub struct FakeSession {
    server: Arc<FakeServer>,
    pub database: String,
    pub kind: SessionKind,
    open: AtomicBool,
    on_close: Mutex<Vec<Callback>>,
    on_reopen: Mutex<Vec<Callback>>,
}

impl FakeSession {
    /// The server drops the session (idle timeout).
    pub fn server_close(&self) {
        self.close();
    }

    /// The driver re-establishes the session on its own.
    pub fn server_reopen(&self) {
        self.open.store(true, Ordering::Release);
        let callbacks = self.on_reopen.lock().clone();
        for callback in callbacks {
            callback();
        }
    }
}

impl Session for FakeSession {
    fn database(&self) -> &str {
        &self.database
    }

    fn kind(&self) -> SessionKind {
        self.kind
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn transaction(
        &self,
        transaction_type: TransactionType,
        options: TransactionOptions,
    ) -> DriverResult<Arc<dyn Transaction>> {
        if !self.is_open() {
            return Err(DriverError::SessionClosed);
        }
        let transaction = Arc::new(FakeTransaction::new(
            self.server.clone(),
            transaction_type,
            options,
        ));
        let mut state = self.server.state.lock();
        state.log.push(format!("open {} transaction", transaction_type));
        state.transactions.push(transaction.clone());
        Ok(transaction)
    }

    fn on_close(&self, callback: SessionCallback) {
        self.on_close.lock().push(Arc::from(callback));
    }

    fn on_reopen(&self, callback: SessionCallback) {
        self.on_reopen.lock().push(Arc::from(callback));
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let callbacks = self.on_close.lock().clone();
            for callback in callbacks {
                callback();
            }
        }
    }
}

type CloseCallback = Arc<dyn Fn(Option<DriverError>) + Send + Sync>;

pub struct FakeTransaction {
    server: Arc<FakeServer>,
    pub transaction_type: TransactionType,
    pub options: TransactionOptions,
    open: AtomicBool,
    on_close: Mutex<Vec<CloseCallback>>,
}

impl FakeTransaction {
    pub fn new(
        server: Arc<FakeServer>,
        transaction_type: TransactionType,
        options: TransactionOptions,
    ) -> Self {
        Self {
            server,
            transaction_type,
            options,
            open: AtomicBool::new(true),
            on_close: Mutex::new(Vec::new()),
        }
    }

    /// The server ends the transaction, e.g. on timeout.
    pub fn server_close(&self, error: DriverError) {
        self.shut(Some(error));
    }

    fn shut(&self, error: Option<DriverError>) {
        if self.open.swap(false, Ordering::AcqRel) {
            let callbacks = self.on_close.lock().clone();
            for callback in callbacks {
                callback(error.clone());
            }
        }
    }

    fn check_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::TransactionClosed)
        }
    }

    fn unit(&self, verb: &str, query: &str) -> DriverResult<()> {
        self.check_open()?;
        self.server.record(format!("{}: {}", verb, query));
        match self.server.lookup(query) {
            Some(Answer::Error(error)) => Err(error),
            Some(Answer::Panic) => panic!("fake driver panic"),
            _ => Ok(()),
        }
    }

    fn rows(&self, verb: &str, query: &str, default: Vec<ConceptRow>) -> DriverResult<RowIter> {
        self.check_open()?;
        self.server.record(format!("{}: {}", verb, query));
        match self.server.lookup(query) {
            None => Ok(Box::new(default.into_iter().map(Ok))),
            Some(Answer::Rows(rows)) => Ok(Box::new(rows.into_iter().map(Ok))),
            Some(Answer::Slow { rows, delay }) => Ok(Box::new(rows.into_iter().map(move |row| {
                std::thread::sleep(delay);
                Ok(row)
            }))),
            Some(Answer::Error(error)) => Err(error),
            Some(Answer::Panic) => panic!("fake driver panic"),
            Some(Answer::Documents(_)) => Ok(Box::new(std::iter::empty())),
        }
    }
}

impl Transaction for FakeTransaction {
    fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn define(&self, query: &str) -> DriverResult<()> {
        self.unit("define", query)
    }

    fn undefine(&self, query: &str) -> DriverResult<()> {
        self.unit("undefine", query)
    }

    fn delete(&self, query: &str) -> DriverResult<()> {
        self.unit("delete", query)
    }

    fn insert(&self, query: &str) -> DriverResult<RowIter> {
        self.rows("insert", query, vec![person("0x01")])
    }

    fn update(&self, query: &str) -> DriverResult<RowIter> {
        self.rows("update", query, vec![person("0x01")])
    }

    fn get(&self, query: &str) -> DriverResult<RowIter> {
        self.rows("get", query, Vec::new())
    }

    fn fetch(&self, query: &str) -> DriverResult<DocumentIter> {
        self.check_open()?;
        self.server.record(format!("fetch: {}", query));
        match self.server.lookup(query) {
            Some(Answer::Documents(documents)) => Ok(Box::new(documents.into_iter().map(Ok))),
            Some(Answer::Error(error)) => Err(error),
            Some(Answer::Panic) => panic!("fake driver panic"),
            _ => Ok(Box::new(std::iter::empty())),
        }
    }

    fn commit(&self) -> DriverResult<()> {
        self.check_open()?;
        let error = self.server.state.lock().commit_error.clone();
        self.server.record("commit");
        self.shut(None);
        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn rollback(&self) -> DriverResult<()> {
        self.check_open()?;
        self.server.record("rollback");
        Ok(())
    }

    fn on_close(&self, callback: TransactionCallback) {
        self.on_close.lock().push(Arc::from(callback));
    }

    fn close(&self) {
        self.shut(None);
    }
}

pub fn person(iid: &str) -> ConceptRow {
    ConceptRow::new().with(
        "x",
        Concept::Entity {
            iid: iid.to_string(),
            type_label: "person".to_string(),
        },
    )
}

pub fn document(name: &str) -> Document {
    json!({ "x": { "name": [{ "value": name }] } })
}

pub fn supervisor(server: &Arc<FakeServer>) -> ConnectionSupervisor {
    supervisor_with(server, Preferences::default())
}

pub fn supervisor_with(server: &Arc<FakeServer>, preferences: Preferences) -> ConnectionSupervisor {
    let driver = Arc::new(FakeDriver {
        server: server.clone(),
    });
    ConnectionSupervisor::new(driver, Context::new(preferences))
}

/// A connected supervisor with an open session on `database`.
pub async fn connected(
    server: &Arc<FakeServer>,
    database: &str,
    kind: SessionKind,
) -> ConnectionSupervisor {
    let supervisor = supervisor(server);
    supervisor
        .connect(ConnectTarget::core("localhost:1729"))
        .await
        .unwrap();
    assert!(supervisor.open_session(database, kind).await);
    supervisor
}

/// Flattened view of a runner's output.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(MessageKind, String),
    Rows(StreamSource, Vec<ConceptRow>),
    Documents(Vec<Document>),
    Value(serde_json::Value),
    Done,
}

pub fn message(kind: MessageKind, text: &str) -> Event {
    Event::Message(kind, text.to_string())
}

/// Read the runner's output up to its final `Done`, then acknowledge it.
pub async fn drain(runner: &QueryRunner) -> Vec<Event> {
    let events = drain_unconsumed(runner).await;
    runner.set_consumed();
    events
}

pub async fn drain_unconsumed(runner: &QueryRunner) -> Vec<Event> {
    let responses = runner.responses();
    let mut events = Vec::new();
    while let Ok(response) = responses.recv().await {
        match response {
            Response::Done => {
                events.push(Event::Done);
                break;
            }
            Response::Message { kind, text } => events.push(Event::Message(kind, text)),
            Response::Value(value) => events.push(Event::Value(value)),
            Response::Stream(ResponseStream::ConceptRows { source, stream }) => {
                events.push(Event::Rows(source, stream.drain().await))
            }
            Response::Stream(ResponseStream::Json(stream)) => {
                events.push(Event::Documents(stream.drain().await))
            }
        }
    }
    events
}

pub fn notifications(context: &Context) -> Vec<Notification> {
    let receiver = context.notifier().subscribe();
    std::iter::from_fn(|| receiver.try_recv().ok()).collect()
}

/// Poll `condition` until it holds or a few seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        smol::Timer::after(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn stream_items<T>(stream: &studio_core::state::Stream<T>) -> Vec<StreamItem<T>> {
    std::iter::from_fn(|| stream.try_recv()).collect()
}
