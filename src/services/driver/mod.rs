//! Seam between the state machines and the remote database driver.
//!
//! The driver owns the wire protocol. These traits describe the blocking
//! surface the state layer needs. Calls that talk to the server are made
//! from a background thread (see [`crate::services::background`]); `close`
//! is called in place and must only release local resources.

mod error;
mod types;

use std::sync::Arc;
use std::time::Duration;

pub use error::{DriverError, DriverResult};
pub use types::{
    AddressTranslation, Concept, ConceptRow, ConnectTarget, Credential, Document, DocumentIter,
    RowIter, SessionKind, TransactionOptions, TransactionType,
};

/// Invoked when a session is closed, whether locally or by the server.
pub type SessionCallback = Box<dyn Fn() + Send + Sync>;

/// Invoked when a transaction is closed; carries the server error if the
/// server ended it.
pub type TransactionCallback = Box<dyn Fn(Option<DriverError>) + Send + Sync>;

pub trait Driver: Send + Sync {
    fn connect(&self, target: &ConnectTarget) -> DriverResult<Arc<dyn Connection>>;
}

/// A live, authenticated link to one server or cluster.
pub trait Connection: Send + Sync {
    fn is_open(&self) -> bool;

    fn databases(&self) -> DriverResult<Vec<String>>;

    fn create_database(&self, name: &str) -> DriverResult<()>;

    fn delete_database(&self, name: &str) -> DriverResult<()>;

    fn session(&self, database: &str, kind: SessionKind) -> DriverResult<Arc<dyn Session>>;

    /// Remaining validity of the current user's password. `None` when the
    /// server does not expire passwords.
    fn password_expiry(&self) -> DriverResult<Option<Duration>>;

    fn update_password(&self, old: &str, new: &str) -> DriverResult<()>;

    fn close(&self);
}

pub trait Session: Send + Sync {
    fn database(&self) -> &str;

    fn kind(&self) -> SessionKind;

    fn is_open(&self) -> bool;

    fn transaction(
        &self,
        transaction_type: TransactionType,
        options: TransactionOptions,
    ) -> DriverResult<Arc<dyn Transaction>>;

    fn on_close(&self, callback: SessionCallback);

    /// Fired when the driver transparently re-establishes the session.
    fn on_reopen(&self, callback: SessionCallback);

    fn close(&self);
}

/// Query surface of an open transaction. Streaming operations return lazy
/// iterators; abandoning an iterator abandons the remaining answers.
pub trait Transaction: Send + Sync {
    fn transaction_type(&self) -> TransactionType;

    fn is_open(&self) -> bool;

    fn define(&self, query: &str) -> DriverResult<()>;

    fn undefine(&self, query: &str) -> DriverResult<()>;

    fn delete(&self, query: &str) -> DriverResult<()>;

    fn insert(&self, query: &str) -> DriverResult<RowIter>;

    fn update(&self, query: &str) -> DriverResult<RowIter>;

    fn get(&self, query: &str) -> DriverResult<RowIter>;

    fn fetch(&self, query: &str) -> DriverResult<DocumentIter>;

    fn commit(&self) -> DriverResult<()>;

    fn rollback(&self) -> DriverResult<()>;

    fn on_close(&self, callback: TransactionCallback);

    fn close(&self);
}
