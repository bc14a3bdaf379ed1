use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use clap::{Parser, ValueEnum};

use crate::{chain::AdoptionPolicy, node::NodeConfig, transport::PeerAddr};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port to accept peer streams on.
    #[arg(short = 'l', long = "listen", value_parser = clap::value_parser!(u16).range(1..))]
    pub listen: u16,

    /// Interface to bind the listening socket to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Peer to join, e.g. /ip4/127.0.0.1/tcp/4001/p2p/<peer-id>. Without it
    /// this node starts a new chain.
    #[arg(short = 'd', long = "dial")]
    pub dial: Option<PeerAddr>,

    /// Seed for the host identity. 0 picks a random identity.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Rule for replacing the local chain with a peer's chain.
    #[arg(long, value_enum, default_value_t = Adoption::Validated)]
    pub adoption: Adoption,

    /// Milliseconds between full-chain broadcasts on each session.
    #[arg(long = "interval-ms", default_value_t = 5000, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adoption {
    /// Any strictly longer chain replaces the local one.
    LengthOnly,
    /// A strictly longer chain must also validate.
    Validated,
}

impl From<Adoption> for AdoptionPolicy {
    fn from(value: Adoption) -> Self {
        match value {
            Adoption::LengthOnly => AdoptionPolicy::LengthOnly,
            Adoption::Validated => AdoptionPolicy::ValidatedLength,
        }
    }
}

impl Cli {
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            listen: SocketAddr::new(self.host, self.listen),
            dial: self.dial,
            seed: self.seed,
            policy: self.adoption.into(),
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}
