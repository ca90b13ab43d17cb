//! Long-poll event loop
//!
//! One background task per signaling session. Decoded events go out through
//! an mpsc channel; transport failures back off and retry, anything else ends
//! the loop with a final `Hangup`.

use resilience::{Backoff, RetryConfig};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::JanusApi;
use crate::protocol::SfuEvent;

pub struct EventPoller {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl EventPoller {
    pub fn spawn(
        api: Arc<dyn JanusApi>,
        session_id: u64,
        max_events: u32,
        backoff: RetryConfig,
        events: mpsc::Sender<SfuEvent>,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(poll_loop(
            api, session_id, max_events, backoff, events, stop_rx,
        ));
        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop, including an in-flight poll, and wait for it.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            if !e.is_cancelled() {
                warn!(error = %e, "Long-poll task panicked");
            }
        }
    }
}

impl Drop for EventPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn poll_loop(
    api: Arc<dyn JanusApi>,
    session_id: u64,
    max_events: u32,
    backoff: RetryConfig,
    events: mpsc::Sender<SfuEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut backoff = Backoff::new(backoff);

    loop {
        let polled = tokio::select! {
            _ = &mut stop_rx => break,
            polled = api.poll(session_id, max_events) => polled,
        };

        match polled {
            Ok(messages) => {
                backoff.reset();
                for message in messages {
                    let event = SfuEvent::from(message);
                    if event == SfuEvent::Keepalive {
                        continue;
                    }
                    if events.send(event).await.is_err() {
                        debug!(session_id, "Event receiver dropped, stopping long-poll");
                        return;
                    }
                }
            }
            Err(e) if e.is_transient() => {
                let delay = backoff.next_delay();
                warn!(
                    session_id,
                    error = %e,
                    failures = backoff.failures(),
                    delay_ms = delay.as_millis() as u64,
                    "Long-poll failed, retrying"
                );
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                warn!(session_id, error = %e, "Long-poll ended");
                let _ = events
                    .send(SfuEvent::Hangup {
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }

    debug!(session_id, "Long-poll stopped");
}
