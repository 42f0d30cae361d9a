//! Background execution helpers.
//!
//! Driver calls block, so they run on smol's blocking pool. Every helper
//! here is an outermost task boundary: a panic inside the work is caught
//! and turned into [`Error::Unexpected`] instead of unwinding further.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::services::driver::DriverResult;

/// Run blocking work off the async executor.
pub async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    smol::unblock(move || panic::catch_unwind(AssertUnwindSafe(work)))
        .await
        .map_err(|payload| Error::Unexpected(panic_message(payload.as_ref())))
}

/// Run a blocking driver call off the async executor.
pub async fn driver_call<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> DriverResult<T> + Send + 'static,
    T: Send + 'static,
{
    blocking(call).await?.map_err(Error::from)
}

/// Await `future`, converting a panic into [`Error::Unexpected`].
pub async fn guarded<F: Future>(future: F) -> Result<F::Output> {
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| Error::Unexpected(panic_message(payload.as_ref())))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Holds a compare-and-swap flag raised; lowers it again on drop, including
/// when the holder unwinds or its future is dropped mid-await.
pub(crate) struct FlagGuard<'a> {
    flag: &'a AtomicBool,
    armed: bool,
}

impl<'a> FlagGuard<'a> {
    /// Raise `flag` if it is currently lowered.
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, armed: true })
    }

    /// Leave the flag raised; someone else is now responsible for lowering it.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(false, Ordering::Release);
        }
    }
}
