use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::KeyspaceConfig;
use crate::error::Result;
use crate::store::SharedStore;

/// Pull adapter over one host's legacy queue.
///
/// Every pull is a single non-blocking pop. The stream never completes on its
/// own: an empty queue only delays the next pull by `poll_interval`. It ends
/// after yielding the first store error, or when `shutdown` is cancelled.
#[derive(Clone)]
pub struct LegacyQueueStream {
    store: Arc<dyn SharedStore>,
    key: String,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl fmt::Debug for LegacyQueueStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyQueueStream")
            .field("key", &self.key)
            .field("poll_interval", &self.poll_interval)
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl LegacyQueueStream {
    /// Stream over the legacy queue of `host`.
    pub fn new(
        store: Arc<dyn SharedStore>,
        keys: &KeyspaceConfig,
        host: &str,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            key: keys.legacy_queue(host),
            poll_interval,
            shutdown,
        }
    }

    /// Legacy queue key being read.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Start pulling.
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> + Send + 'static {
        try_stream! {
            loop {
                if self.shutdown.is_cancelled() {
                    debug!(queue = %self.key, "legacy stream cancelled");
                    break;
                }

                match self.store.pop_front(&self.key).await? {
                    Some(entry) => yield entry,
                    None => {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => {
                                debug!(queue = %self.key, "legacy stream cancelled while idle");
                                break;
                            }
                            _ = tokio::time::sleep(self.poll_interval) => {}
                        }
                    }
                }
            }
        }
    }
}
