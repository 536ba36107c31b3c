//! Shared utility functions.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::spawn_blocking;
use tokio::time::timeout;

use crate::{Error, Result};

/// Run a blocking closure (session-layer calls, process spawns) off the
/// async worker threads.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

enum Handoff {
    Pending,
    Delivered,
    Abandoned,
}

/// Run `f` on the blocking pool with a deadline.
///
/// A blocking call cannot be cancelled, so a result that arrives after the
/// deadline is passed to `late` on the same blocking thread. Exactly one of
/// the caller and `late` sees each result.
pub async fn blocking_with_timeout<F, T, L>(duration: Duration, f: F, late: L) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    L: FnOnce(Result<T>) + Send + 'static,
    T: Send + 'static,
{
    let handoff = Arc::new(Mutex::new(Handoff::Pending));
    let worker_handoff = Arc::clone(&handoff);
    let mut handle = spawn_blocking(move || {
        let result = f();
        let mut state = worker_handoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Handoff::Abandoned = *state {
            drop(state);
            late(result);
            return None;
        }
        *state = Handoff::Delivered;
        Some(result)
    });

    let joined = match timeout(duration, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            {
                let mut state = handoff.lock().unwrap_or_else(PoisonError::into_inner);
                if let Handoff::Pending = *state {
                    *state = Handoff::Abandoned;
                    return Err(Error::Timeout(duration));
                }
            }
            // Finished right at the deadline; the result is ours.
            handle.await
        }
    };
    match joined {
        Ok(Some(inner)) => inner,
        Ok(None) => Err(Error::Timeout(duration)),
        Err(join_err) => Err(Error::TaskJoin(join_err.to_string())),
    }
}

/// Truncate a string to `max_chars` characters, appending "..." when cut.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

/// Short random lowercase hex suffix for generated identifiers.
pub fn hex_suffix(len: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string()[..len].to_string()
}
