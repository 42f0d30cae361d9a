//! Connection, session and transaction state machines.
//!
//! ## Structure
//!
//! - `connection` - ConnectionSupervisor: connect, disconnect, database admin, command serialization
//! - `password` - Password expiry and password change for cloud users
//! - `session` - SessionController: the single open session
//! - `transaction` - TransactionController: the single open transaction and its options
//! - `query` - Query runners, their responses and the per-source registry
//! - `listeners` - Ordered lifecycle listener lists

mod connection;
mod listeners;
mod password;
mod query;
mod session;
mod transaction;

pub use connection::{ConnectOutcome, ConnectionEvent, ConnectionStatus, ConnectionSupervisor};
pub use listeners::Listeners;
pub use password::{PASSWORD_EXPIRY_WARNING, requires_password_change};
pub use query::{
    MessageKind, QueryRunner, QueryRunnerRegistry, Response, ResponseStream, Stream, StreamItem,
    StreamSource,
};
pub use session::SessionController;
pub use transaction::{ToggleState, TransactionController};

use parking_lot::RwLock;
use std::sync::Arc;

use crate::services::{Notifier, Preferences};

/// Collaborators shared by every controller: preferences and the
/// notification service. Cheap to clone.
#[derive(Clone, Default)]
pub struct Context {
    preferences: Arc<RwLock<Preferences>>,
    notifier: Notifier,
}

impl Context {
    pub fn new(preferences: Preferences) -> Self {
        Self {
            preferences: Arc::new(RwLock::new(preferences)),
            notifier: Notifier::new(),
        }
    }

    pub fn preferences(&self) -> Preferences {
        self.preferences.read().clone()
    }

    pub fn update_preferences(&self, update: impl FnOnce(&mut Preferences)) {
        update(&mut self.preferences.write());
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}
