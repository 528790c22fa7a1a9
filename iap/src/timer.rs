use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A single-shot timer running on the ambient tokio runtime. Dropping it
/// leaves the timer armed; call [`ArmedTimer::cancel`] to disarm it.
#[derive(Debug)]
pub struct ArmedTimer {
    handle: JoinHandle<()>,
}

impl ArmedTimer {
    /// Returns `None` when called outside a runtime.
    pub fn arm<F>(delay: Duration, on_fire: F) -> Option<ArmedTimer>
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!("cannot arm timer without a runtime: {}", e);
                return None;
            }
        };

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        });
        Some(ArmedTimer { handle })
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn has_fired(&self) -> bool {
        self.handle.is_finished()
    }
}
