//! Replication over one stream to one peer.
//!
//! A session runs two duties against the shared chain:
//!
//! - the listener reads chain frames from the peer and offers each one to
//!   [`SharedChain::offer`];
//! - the broadcaster writes the full chain every interval and pushes
//!   operator appends as soon as they happen.
//!
//! Both duties live inside one future. When either finishes, the other is
//! dropped with it, so tearing down a session also stops its broadcaster.
//! A malformed frame is logged and skipped; a read or write failure ends
//! only this session. Reads carry no timeout: a peer that goes silent
//! without closing keeps its listener parked forever.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    select,
    sync::broadcast::{self, error::RecvError},
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::{
    chain::{Chain, KeepReason, Resolution},
    frame::{FrameError, read_frame, write_encoded},
    state::{ChainEvent, SharedChain},
    transport::{PeerId, PeerStream},
};

pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(5);

pub struct Session<R, W> {
    peer: PeerId,
    reader: R,
    writer: W,
    state: Arc<SharedChain>,
    events: broadcast::Receiver<ChainEvent>,
    interval: Duration,
}

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        peer: PeerId,
        reader: R,
        writer: W,
        state: Arc<SharedChain>,
        interval: Duration,
    ) -> Self {
        // Subscribed here so appends made before the first poll still reach
        // this peer.
        let events = state.subscribe();
        Self {
            peer,
            reader,
            writer,
            state,
            events,
            interval,
        }
    }

    /// Runs until the peer closes the stream (`Ok`) or I/O fails (`Err`).
    pub async fn run(self) -> Result<()> {
        let Session {
            peer,
            mut reader,
            mut writer,
            state,
            events,
            interval,
        } = self;

        select! {
            result = run_listener(peer, &mut reader, &state) => result,
            result = run_broadcaster(peer, &mut writer, &state, events, interval) => result,
        }
    }
}

impl Session<BufReader<OwnedReadHalf>, OwnedWriteHalf> {
    pub fn from_stream(stream: PeerStream, state: Arc<SharedChain>, interval: Duration) -> Self {
        let PeerStream {
            peer,
            reader,
            writer,
        } = stream;
        Self::new(peer, reader, writer, state, interval)
    }
}

async fn run_listener<R>(peer: PeerId, reader: &mut R, state: &SharedChain) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_frame::<_, Chain>(reader).await {
            Ok(Some(candidate)) => {
                let len = candidate.len();
                match state.offer(candidate).await {
                    Resolution::Adopt => info!(%peer, len, "adopted longer chain from peer"),
                    Resolution::Keep(KeepReason::Invalid) => {
                        warn!(%peer, len, "ignored longer chain that failed validation")
                    }
                    Resolution::Keep(KeepReason::NotLonger) => {
                        debug!(%peer, len, "peer chain is not longer")
                    }
                }
            }
            Ok(None) => {
                info!(%peer, "peer closed the stream");
                return Ok(());
            }
            Err(FrameError::Decode(error)) => {
                warn!(%peer, %error, "dropping malformed frame");
            }
            Err(FrameError::Io(error)) => {
                return Err(error).with_context(|| format!("failed to read from {peer}"));
            }
        }
    }
}

async fn run_broadcaster<W>(
    peer: PeerId,
    writer: &mut W,
    state: &SharedChain,
    mut events: broadcast::Receiver<ChainEvent>,
    period: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            _ = ticker.tick() => {
                push_current(peer, writer, state).await?;
            }
            event = events.recv() => match event {
                Ok(ChainEvent::Appended { frame }) => {
                    write_encoded(writer, &frame)
                        .await
                        .with_context(|| format!("failed to push chain to {peer}"))?;
                    debug!(%peer, "pushed local append");
                }
                Ok(ChainEvent::Adopted { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%peer, skipped, "session lagged behind chain events");
                    push_current(peer, writer, state).await?;
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

async fn push_current<W>(peer: PeerId, writer: &mut W, state: &SharedChain) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(frame) = state.encode().await? else {
        return Ok(());
    };
    write_encoded(writer, &frame)
        .await
        .with_context(|| format!("failed to broadcast chain to {peer}"))?;
    debug!(%peer, "broadcast chain");
    Ok(())
}
