//! Connection, session, transaction and query-execution core of a TypeDB
//! client.
//!
//! The UI owns a [`ConnectionSupervisor`] and drives everything through it:
//! connect, open a session, run queries, commit or roll back. Results come
//! back through [`QueryRunner::responses`]; failures come back as
//! notifications on [`Context::notifier`].

pub mod error;
pub mod logging;
pub mod services;
pub mod state;

pub use error::{Error, Result};
pub use state::{
    ConnectOutcome, ConnectionStatus, ConnectionSupervisor, Context, Listeners, QueryRunner,
    QueryRunnerRegistry, Response, ResponseStream, SessionController, StreamItem, StreamSource,
    TransactionController,
};
