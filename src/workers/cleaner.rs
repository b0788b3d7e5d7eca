// Package cleaner provides the periodic cleanup worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bytes::fmt_mem;
use crate::storage::RawCache;

const COMP_CLEANER: &str = "cleaner";

/// Spawns the periodic cleanup task. Each tick runs one `cleanup()` pass,
/// which is a no-op while the free fraction stays above the trigger.
/// Stops on cancellation or once the cache is closed.
pub fn spawn_cleaner(
    cache: Arc<RawCache>,
    every: Duration,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn(async move {
        let mut tick = interval(every);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(component = COMP_CLEANER, event = "stop", "cleanup worker stopped");
                    return;
                }
                _ = tick.tick() => {
                    match cache.cleanup() {
                        Ok(0) => {}
                        Ok(evicted) => {
                            info!(
                                component = COMP_CLEANER,
                                event = "eviction_pass",
                                evicted,
                                mem_used = %fmt_mem(cache.mem_used()),
                                free_fraction = cache.free_space_fraction(),
                                "eviction pass finished"
                            );
                        }
                        Err(e) => {
                            warn!(
                                component = COMP_CLEANER,
                                event = "cleanup_failed",
                                error = %e,
                                "cleanup pass failed; stopping worker"
                            );
                            return;
                        }
                    }
                }
            }
        }
    })
}
