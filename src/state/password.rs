use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::connection::{ConnectOutcome, ConnectionSupervisor};
use crate::error::{Error, Result};
use crate::services::background;
use crate::services::driver::{Connection, DriverError};

/// Passwords expiring sooner than this trigger a warning after connecting.
pub const PASSWORD_EXPIRY_WARNING: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Server error codes for "the account still uses its initial password".
const DEFAULT_PASSWORD_CODES: [&str; 2] = ["ENT21", "CLS21"];

/// Whether `error` means the user must set a new password first. Servers
/// that predate the typed signal only report one of the error codes.
pub fn requires_password_change(error: &DriverError) -> bool {
    match error {
        DriverError::PasswordChangeRequired(_) => true,
        other => other
            .code()
            .is_some_and(|code| DEFAULT_PASSWORD_CODES.contains(&code)),
    }
}

impl ConnectionSupervisor {
    /// Warn about a soon-expiring password, then probe the database list to
    /// detect an account that must change its default password.
    pub(super) async fn check_password_policy(
        &self,
        connection: &Arc<dyn Connection>,
    ) -> ConnectOutcome {
        let probe = connection.clone();
        match background::driver_call(move || probe.password_expiry()).await {
            Ok(Some(remaining)) if remaining < PASSWORD_EXPIRY_WARNING => {
                let hours = remaining.as_secs() / 3600;
                self.context.notifier().warning(format!(
                    "Your password will expire in {} hour(s). Change it to keep access.",
                    hours
                ));
            }
            Ok(_) => {}
            Err(error) => tracing::warn!("could not read password expiry: {}", error),
        }

        let probe = connection.clone();
        match background::driver_call(move || probe.databases()).await {
            Ok(databases) => {
                self.store_databases(databases);
                ConnectOutcome::Connected
            }
            Err(Error::Driver(error)) if requires_password_change(&error) => {
                let flagged = self.while_connected(|| {
                    self.needs_password_change.store(true, Ordering::Release)
                });
                if !flagged {
                    return ConnectOutcome::Aborted;
                }
                self.context
                    .notifier()
                    .warning("You are using a default password. Set a new password to continue.");
                ConnectOutcome::PasswordChangeRequired
            }
            Err(error) => {
                self.context
                    .notifier()
                    .error(format!("Failed to refresh the database list: {}", error));
                ConnectOutcome::Connected
            }
        }
    }

    /// Change the current user's password, then reconnect with the new
    /// password to the same addresses. Only cloud targets carry a password.
    pub async fn change_password(&self, old: &str, new: &str) -> Result<ConnectOutcome> {
        let target = self.target.lock().clone().ok_or(Error::NotConnected)?;
        let Some(reconnect) = target.with_password(new) else {
            return Err(Error::InvalidState(
                "Password changes are only supported on cloud servers".to_string(),
            ));
        };
        let connection = self.connection().ok_or(Error::NotConnected)?;

        let (old, new) = (old.to_string(), new.to_string());
        if let Err(error) =
            background::driver_call(move || connection.update_password(&old, &new)).await
        {
            self.context
                .notifier()
                .error(format!("Failed to update the password: {}", error));
            return Err(error);
        }

        self.context
            .notifier()
            .info("Password updated. Reconnecting with the new password.");
        self.close();
        self.connect(reconnect).await
    }
}
