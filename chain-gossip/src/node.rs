//! Node orchestration: one host, one shared chain, one session per peer.
//!
//! A node without a dial target is the first of its network and starts
//! from a genesis block. A node with a dial target starts empty, opens one
//! outbound session and waits to adopt its peer's chain. Both kinds keep
//! accepting inbound streams for as long as they run.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufRead, AsyncWrite, BufReader},
    select,
    task::JoinSet,
};
use tracing::{info, warn};

use crate::{
    chain::AdoptionPolicy,
    console::run_console,
    session::{DEFAULT_BROADCAST_INTERVAL, Session},
    state::SharedChain,
    transport::{Host, Incoming, PeerAddr, PeerStream},
};

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen: SocketAddr,
    pub dial: Option<PeerAddr>,
    pub seed: u64,
    pub policy: AdoptionPolicy,
    pub interval: Duration,
}

impl NodeConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            dial: None,
            seed: 0,
            policy: AdoptionPolicy::default(),
            interval: DEFAULT_BROADCAST_INTERVAL,
        }
    }
}

pub struct Node {
    host: Host,
    state: Arc<SharedChain>,
    dial: Option<PeerAddr>,
    interval: Duration,
}

impl Node {
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        let host = Host::bind(config.listen, config.seed)
            .await
            .with_context(|| format!("failed to listen on {}", config.listen))?;

        let state = match config.dial {
            None => SharedChain::with_genesis(config.policy),
            Some(_) => SharedChain::awaiting_peer(config.policy),
        };

        Ok(Self {
            host,
            state: Arc::new(state),
            dial: config.dial,
            interval: config.interval,
        })
    }

    pub fn state(&self) -> Arc<SharedChain> {
        Arc::clone(&self.state)
    }

    pub fn address(&self) -> io::Result<PeerAddr> {
        self.host.address()
    }

    /// Command line another operator can run to join this node.
    pub fn dial_hint(&self) -> io::Result<String> {
        let address = self.address()?;
        Ok(format!(
            "chain-gossip -l {} -d {}",
            address.socket.port().saturating_add(1),
            address
        ))
    }

    /// Serves peers until `shutdown` resolves, then aborts every session.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Node {
            host,
            state,
            dial,
            interval,
        } = self;
        let mut sessions = JoinSet::new();

        if let Some(target) = dial {
            info!(%target, "opening new stream");
            let stream = host
                .dial(&target)
                .await
                .with_context(|| format!("failed to open stream to {target}"))?;
            sessions.spawn(serve(stream, Arc::clone(&state), interval));
        } else {
            info!("listening for connections");
        }

        tokio::pin!(shutdown);
        loop {
            select! {
                _ = &mut shutdown => {
                    info!("node shutting down");
                    break;
                }
                accepted = host.accept() => match accepted {
                    Ok(incoming) => {
                        sessions.spawn(negotiate_and_serve(incoming, Arc::clone(&state), interval));
                    }
                    Err(error) => warn!(?error, "failed to accept connection"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(error) = joined {
                        warn!(?error, "session task failed");
                    }
                }
            }
        }

        sessions.shutdown().await;
        Ok(())
    }
}

async fn negotiate_and_serve(incoming: Incoming, state: Arc<SharedChain>, interval: Duration) {
    let remote = incoming.remote();
    match incoming.negotiate().await {
        Ok(stream) => serve(stream, state, interval).await,
        Err(error) => warn!(%remote, %error, "rejected inbound stream"),
    }
}

async fn serve(stream: PeerStream, state: Arc<SharedChain>, interval: Duration) {
    let peer = stream.peer;
    info!(%peer, "got a new stream");
    match Session::from_stream(stream, state, interval).run().await {
        Ok(()) => info!(%peer, "session closed"),
        Err(error) => warn!(%peer, error = ?error, "session ended with error"),
    }
}

/// Runs a node with the operator console on stdin/stdout. Stops on EOF on
/// stdin or Ctrl-C.
pub async fn run(config: NodeConfig) -> Result<()> {
    run_with_console(config, BufReader::new(io::stdin()), io::stdout()).await
}

/// Runs a node driven by the given console streams until `input` reaches
/// EOF, the console fails, or Ctrl-C arrives. Every session is closed
/// before returning.
pub async fn run_with_console<R, W>(config: NodeConfig, input: R, output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let node = Node::bind(config).await?;
    info!("host address: {}", node.address()?);
    info!("run \"{}\" on a different node", node.dial_hint()?);

    let state = node.state();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut node_task = tokio::spawn(node.run_until(async move {
        let _ = shutdown_rx.await;
    }));

    select! {
        console = run_console(input, output, &state) => match console {
            Ok(()) => info!("operator input closed"),
            Err(error) => warn!(error = ?error, "console stopped"),
        },
        finished = &mut node_task => {
            return finished.context("node task panicked")?;
        }
        ctrl_c = tokio::signal::ctrl_c() => {
            if let Err(error) = ctrl_c {
                warn!(?error, "failed to install ctrl-c handler");
            }
        }
    }

    let _ = shutdown_tx.send(());
    node_task.await.context("node task panicked")?
}
