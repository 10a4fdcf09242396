//! Event re-publication for enhancers.
//!
//! An enhancer owns its own event bus and subscribes to the underlying
//! backend's bus at construction, feeding every event through a reaction
//! hook. The hook reacts (e.g. applies a remote removal to a local tier) and
//! re-publishes, so subscribers on the outermost layer observe removals
//! occurring at any inner layer.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use tiercache_backend::{CacheEvent, EventBus};

/// Subscribes to `source` and feeds every event through `hook` until the
/// source closes or the returned task is aborted.
///
/// Must be called within a tokio runtime.
pub(crate) fn spawn_event_relay(
    source: &EventBus,
    hook: impl Fn(CacheEvent) + Send + 'static,
) -> JoinHandle<()> {
    let mut receiver = source.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => hook(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event relay lagged; events were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
