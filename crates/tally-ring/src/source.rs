use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use tally_types::PeerAddress;

use crate::error::{RingError, RingResult};
use crate::membership::{encode_endpoints, MembershipEvent};

/// Producer of membership events.
///
/// A source emits an `Added` event for its first observation and `Updated`
/// events afterwards, each carrying the full current endpoints object. It
/// runs until `shutdown` flips to `true` or the receiver is dropped.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn run(
        &self,
        events: mpsc::Sender<MembershipEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> RingResult<()>;
}

/// A fixed peer list, announced once.
#[derive(Clone, Debug)]
pub struct StaticMembership {
    peers: Vec<PeerAddress>,
}

impl StaticMembership {
    pub fn new(peers: Vec<PeerAddress>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl MembershipSource for StaticMembership {
    async fn run(
        &self,
        events: mpsc::Sender<MembershipEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RingResult<()> {
        let current = encode_endpoints(&self.peers);
        events
            .send(MembershipEvent::Added { current })
            .await
            .map_err(|_| RingError::ChannelClosed)?;
        info!(peers = self.peers.len(), "announced static membership");

        // Nothing else to say; idle until asked to stop.
        let _ = shutdown.wait_for(|stop| *stop).await;
        Ok(())
    }
}

/// Polls a JSON endpoints file and reports every change.
///
/// Suited to a mounted volume that an external process keeps in sync with
/// the service's endpoints. Unreadable or non-JSON contents are logged and
/// skipped; the last good object stays the reference for the next diff.
#[derive(Clone, Debug)]
pub struct EndpointsFileSource {
    path: PathBuf,
    interval: Duration,
}

impl EndpointsFileSource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    async fn read(&self) -> RingResult<Value> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        serde_json::from_str(&text).map_err(|e| RingError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MembershipSource for EndpointsFileSource {
    async fn run(
        &self,
        events: mpsc::Sender<MembershipEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RingResult<()> {
        let mut last: Option<Value> = None;
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
            }

            let current = match self.read().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "cannot read endpoints file");
                    continue;
                }
            };

            let event = match last.take() {
                None => MembershipEvent::Added {
                    current: current.clone(),
                },
                Some(previous) if previous == current => {
                    last = Some(previous);
                    continue;
                }
                Some(previous) => MembershipEvent::Updated {
                    previous,
                    current: current.clone(),
                },
            };

            debug!(path = %self.path.display(), "endpoints file changed");
            last = Some(current);
            if events.send(event).await.is_err() {
                return Err(RingError::ChannelClosed);
            }
        }
    }
}
