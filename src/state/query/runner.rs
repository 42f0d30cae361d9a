use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::response::{MessageKind, Response, ResponseStream, Stream, StreamSource};
use crate::error::Result;
use crate::services::background;
use crate::services::driver::{DriverResult, RowIter, Transaction};
use crate::services::typeql_analyzer::{self, StatementKind, TypeQlStatement};
use crate::state::Listeners;

const RESULT: &str = "## Result> ";
const ERROR: &str = "## Error> ";
const RUNNING: &str = "## Running> ";
const COMPLETED: &str = "## Completed";
const TERMINATED: &str = "## Terminated";

const DEFINE_SUCCESS: &str = "Define query successfully defined new types in the schema.";
const UNDEFINE_SUCCESS: &str = "Undefine query successfully undefined types in the schema.";
const DELETE_SUCCESS: &str = "Delete query successfully deleted things from the database.";
const INSERT_SUCCESS: &str = "Insert query successfully inserted new things to the database:";
const INSERT_NO_RESULT: &str = "Insert query did not insert any new thing to the database.";
const UPDATE_SUCCESS: &str = "Update query successfully updated things in the database:";
const UPDATE_NO_RESULT: &str = "Update query did not update any thing in the database.";
const GET_SUCCESS: &str = "Get query successfully matched concepts in the database:";
const GET_NO_RESULT: &str = "Get query did not match any concepts in the database.";
const FETCH_SUCCESS: &str = "Fetch query successfully fetched concepts from the database:";
const FETCH_NO_RESULT: &str = "Fetch query did not fetch any concepts from the database.";
const AGGREGATE_UNSUPPORTED: &str =
    "Get Aggregate queries are not supported yet. Remove the aggregate clause to see the matched concepts.";

/// How often a finished runner checks whether its output was consumed.
const CONSUMED_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs one batch of statements against a transaction and publishes the
/// ordered [`Response`] sequence.
pub struct QueryRunner {
    id: Uuid,
    transaction: Arc<dyn Transaction>,
    source: String,
    query_limit: Option<u64>,
    /// Raised by the owning transaction controller to stop this run
    stop_signal: Arc<AtomicBool>,
    sender: Sender<Response>,
    receiver: Receiver<Response>,
    is_running: AtomicBool,
    is_consumed: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    ended_at: Mutex<Option<DateTime<Utc>>>,
    on_complete: Listeners<()>,
    on_close: Listeners<()>,
}

impl std::fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRunner")
            .field("id", &self.id)
            .field("is_running", &self.is_running())
            .field("is_consumed", &self.is_consumed())
            .finish()
    }
}

impl QueryRunner {
    pub fn new(
        transaction: Arc<dyn Transaction>,
        source: impl Into<String>,
        query_limit: Option<u64>,
        stop_signal: Arc<AtomicBool>,
    ) -> Arc<Self> {
        let (sender, receiver) = async_channel::unbounded();
        Arc::new(Self {
            id: Uuid::new_v4(),
            transaction,
            source: source.into(),
            query_limit,
            stop_signal,
            sender,
            receiver,
            is_running: AtomicBool::new(false),
            is_consumed: AtomicBool::new(false),
            started_at: Mutex::new(None),
            ended_at: Mutex::new(None),
            on_complete: Listeners::new(),
            on_close: Listeners::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn responses(&self) -> Receiver<Response> {
        self.receiver.clone()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn is_consumed(&self) -> bool {
        self.is_consumed.load(Ordering::Acquire)
    }

    /// Acknowledge that the output was drained; releases a finished runner.
    pub fn set_consumed(&self) {
        self.is_consumed.store(true, Ordering::Release);
    }

    pub fn has_stop_signal(&self) -> bool {
        self.stop_signal.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        *self.ended_at.lock()
    }

    /// Time spent running so far, or in total once finished.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let started = self.started_at()?;
        Some(self.ended_at().unwrap_or_else(Utc::now) - started)
    }

    pub fn on_complete(&self, listener: impl Fn(&()) + Send + Sync + 'static) {
        self.on_complete.add(listener);
    }

    pub fn on_close(&self, listener: impl Fn(&()) + Send + Sync + 'static) {
        self.on_close.add(listener);
    }

    /// Raise the stop signal and notify close listeners (the registry).
    pub fn close(&self) {
        self.stop_signal.store(true, Ordering::Release);
        self.on_close.fire(&());
    }

    /// Execute every statement, then wait for the consumer. Never fails;
    /// errors become `ERROR` messages.
    pub async fn launch(self: Arc<Self>) {
        self.is_running.store(true, Ordering::Release);
        *self.started_at.lock() = Some(Utc::now());
        tracing::debug!(runner = %self.id, "query runner started");

        let runner = self.clone();
        let outcome = background::blocking(move || runner.run_statements())
            .await
            .and_then(|result| result);

        match outcome {
            Ok(()) if self.has_stop_signal() => self.collect_message(MessageKind::Error, TERMINATED),
            Ok(()) => self.collect_message(MessageKind::Info, COMPLETED),
            Err(error) => {
                tracing::warn!(runner = %self.id, "query failed: {}", error);
                self.collect_message(MessageKind::Info, "");
                self.collect_message(MessageKind::Error, format!("{}{}", ERROR, error));
                self.collect_message(MessageKind::Error, TERMINATED);
            }
        }

        *self.ended_at.lock() = Some(Utc::now());
        self.is_running.store(false, Ordering::Release);
        self.collect(Response::Done);

        while !self.is_consumed() && !self.has_stop_signal() {
            smol::Timer::after(CONSUMED_POLL_INTERVAL).await;
        }

        tracing::debug!(runner = %self.id, elapsed = ?self.elapsed(), "query runner finished");
        self.on_complete.fire(&());
    }

    fn run_statements(&self) -> Result<()> {
        let statements = typeql_analyzer::analyze(&self.source)?;
        for statement in &statements {
            if self.has_stop_signal() {
                break;
            }
            self.run_statement(statement)?;
        }
        Ok(())
    }

    fn run_statement(&self, statement: &TypeQlStatement) -> Result<()> {
        self.collect_message(MessageKind::Info, "");
        self.collect_message(
            MessageKind::Info,
            format!("{}{}:", RUNNING, statement.kind.label()),
        );
        self.collect_message(MessageKind::TypeQl, statement.text.clone());

        let query = statement.with_limit(self.query_limit);
        let tx = &self.transaction;
        match statement.kind {
            StatementKind::Define => {
                tx.define(&query)?;
                self.collect_success(DEFINE_SUCCESS);
            }
            StatementKind::Undefine => {
                tx.undefine(&query)?;
                self.collect_success(UNDEFINE_SUCCESS);
            }
            StatementKind::Delete => {
                tx.delete(&query)?;
                self.collect_success(DELETE_SUCCESS);
            }
            StatementKind::Insert => self.collect_rows(
                tx.insert(&query)?,
                StreamSource::Insert,
                INSERT_SUCCESS,
                INSERT_NO_RESULT,
            )?,
            StatementKind::Update => self.collect_rows(
                tx.update(&query)?,
                StreamSource::Update,
                UPDATE_SUCCESS,
                UPDATE_NO_RESULT,
            )?,
            StatementKind::Get => self.collect_rows(
                tx.get(&query)?,
                StreamSource::Get,
                GET_SUCCESS,
                GET_NO_RESULT,
            )?,
            StatementKind::Fetch => self.collect_stream(
                tx.fetch(&query)?,
                ResponseStream::Json,
                FETCH_SUCCESS,
                FETCH_NO_RESULT,
            )?,
            StatementKind::Aggregate => {
                self.collect_message(MessageKind::Info, format!("{}{}", RESULT, AGGREGATE_UNSUPPORTED))
            }
        }
        Ok(())
    }

    fn collect_rows(
        &self,
        rows: RowIter,
        source: StreamSource,
        success: &str,
        no_result: &str,
    ) -> Result<()> {
        self.collect_stream(
            rows,
            |stream| ResponseStream::ConceptRows { source, stream },
            success,
            no_result,
        )
    }

    /// Forward answers until exhausted, failed or stopped. The success
    /// message and the stream marker are only emitted once an answer exists.
    fn collect_stream<T>(
        &self,
        mut answers: Box<dyn Iterator<Item = DriverResult<T>> + Send>,
        wrap: impl Fn(Stream<T>) -> ResponseStream,
        success: &str,
        no_result: &str,
    ) -> Result<()> {
        let mut producer = None;
        let mut failure = None;

        while !self.has_stop_signal() {
            let Some(answer) = answers.next() else {
                break;
            };
            match answer {
                Ok(item) => {
                    let sender = producer.get_or_insert_with(|| {
                        self.collect_success(success);
                        let (sender, stream) = Stream::new();
                        self.collect(Response::Stream(wrap(stream)));
                        sender
                    });
                    sender.next(item);
                }
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        let started = producer.is_some();
        drop(producer);

        if let Some(error) = failure {
            return Err(error.into());
        }
        if !started && !self.has_stop_signal() {
            self.collect_message(MessageKind::Info, format!("{}{}", RESULT, no_result));
        }
        Ok(())
    }

    fn collect_success(&self, text: &str) {
        self.collect_message(MessageKind::Success, format!("{}{}", RESULT, text));
    }

    fn collect_message(&self, kind: MessageKind, text: impl Into<String>) {
        self.collect(Response::message(kind, text));
    }

    fn collect(&self, response: Response) {
        let _ = self.sender.try_send(response);
    }
}
