//! Heartbeat liveness monitoring for admitted connections.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ClientChannel;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Number of consecutive silent intervals tolerated before timing out.
fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from((timeout.as_millis() / interval_ms).max(1)).unwrap_or(u32::MAX)
}

/// Watch a channel's liveness.
///
/// Every `interval` the alive flag is checked and reset. Inbound pongs and
/// frames set it again. After `timeout / interval` consecutive silent
/// intervals (at least one) the client is considered dead.
pub async fn run_heartbeat(
    channel: Arc<ClientChannel>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    // The first tick completes immediately.
    let _ = check_interval.tick().await;
    let max_missed = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if channel.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_channel() -> Arc<ClientChannel> {
        let (tx, _rx) = mpsc::channel(32);
        Arc::new(ClientChannel::new(tx))
    }

    #[test]
    fn max_missed_is_ratio_with_floor_of_one() {
        assert_eq!(max_missed(Duration::from_secs(30), Duration::from_secs(90)), 3);
        assert_eq!(max_missed(Duration::from_secs(30), Duration::from_secs(10)), 1);
        assert_eq!(max_missed(Duration::from_millis(100), Duration::from_millis(250)), 2);
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let channel = make_channel();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(
                channel,
                Duration::from_secs(100),
                Duration::from_secs(300),
                cancel2,
            )
            .await
        });

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_times_out() {
        let channel = make_channel();
        let _ = channel.check_alive();

        let result = run_heartbeat(
            channel,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn active_client_stays_alive() {
        let channel = make_channel();
        let watched = Arc::clone(&channel);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(
                watched,
                Duration::from_millis(50),
                Duration::from_millis(100),
                cancel2,
            )
            .await
        });

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            channel.mark_alive();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
