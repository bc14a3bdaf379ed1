//! The node's single chain, guarded by one lock.
//!
//! Every reader and writer goes through [`SharedChain`]. The lock is held
//! for a read-modify-write or for serializing a snapshot, never across
//! network I/O. Changes are announced on a broadcast channel so every live
//! session can push operator appends and the console can render adoptions.
//! Events are sent while the lock is still held, so subscribers see them in
//! the order the chain changed.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use crate::{
    chain::{AdoptionPolicy, Chain, ChainError, Resolution},
    frame::encode_frame,
};

/// Buffered change notifications before slow subscribers start lagging.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// The operator appended a block. `frame` is the full chain, encoded
    /// under the lock right after the append.
    Appended { frame: Arc<str> },
    /// A peer's chain replaced the local one.
    Adopted { chain: Arc<Chain> },
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no chain yet; waiting to receive one from a peer")]
    NoChain,
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("failed to encode chain: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct SharedChain {
    chain: Mutex<Option<Chain>>,
    policy: AdoptionPolicy,
    events: broadcast::Sender<ChainEvent>,
}

impl SharedChain {
    pub fn new(initial: Option<Chain>, policy: AdoptionPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            chain: Mutex::new(initial),
            policy,
            events,
        }
    }

    /// State for the first node of a network.
    pub fn with_genesis(policy: AdoptionPolicy) -> Self {
        Self::new(Some(Chain::genesis()), policy)
    }

    /// State for a node that expects to receive its chain from a peer.
    pub fn awaiting_peer(policy: AdoptionPolicy) -> Self {
        Self::new(None, policy)
    }

    /// Appends `content` and announces the new chain to every session.
    pub async fn append(&self, content: &str) -> Result<Chain, StateError> {
        let mut guard = self.chain.lock().await;
        let current = guard.as_ref().ok_or(StateError::NoChain)?;
        let next = current.append(content)?;
        let frame = encode_frame(&next)?;
        *guard = Some(next.clone());

        // Sent under the lock so events keep mutation order.
        self.publish(ChainEvent::Appended {
            frame: Arc::from(frame),
        });
        Ok(next)
    }

    /// Offers a peer's chain. The local chain is replaced wholesale or not
    /// at all.
    pub async fn offer(&self, candidate: Chain) -> Resolution {
        let mut guard = self.chain.lock().await;
        let resolution = self.policy.decide(guard.as_ref(), &candidate);
        if resolution == Resolution::Adopt {
            *guard = Some(candidate.clone());
            self.publish(ChainEvent::Adopted {
                chain: Arc::new(candidate),
            });
        }
        resolution
    }

    /// Serializes the current chain as a wire frame. `None` while there is
    /// no chain yet.
    pub async fn encode(&self) -> Result<Option<String>, StateError> {
        let guard = self.chain.lock().await;
        match guard.as_ref() {
            Some(chain) => Ok(Some(encode_frame(chain)?)),
            None => Ok(None),
        }
    }

    pub async fn snapshot(&self) -> Option<Chain> {
        self.chain.lock().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ChainEvent) {
        if self.events.send(event).is_err() {
            debug!("no subscribers for chain event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::KeepReason;

    #[tokio::test]
    async fn append_without_chain_is_refused() {
        let state = SharedChain::awaiting_peer(AdoptionPolicy::default());
        let result = state.append("hello").await;
        assert!(matches!(result, Err(StateError::NoChain)));
        assert!(state.snapshot().await.is_none());
        assert!(state.encode().await.expect("encode").is_none());
    }

    #[tokio::test]
    async fn append_publishes_encoded_chain() {
        let state = SharedChain::with_genesis(AdoptionPolicy::default());
        let mut events = state.subscribe();

        let chain = state.append("hello").await.expect("append");
        assert_eq!(chain.len(), 2);

        match events.recv().await.expect("event") {
            ChainEvent::Appended { frame } => {
                let decoded: Chain = serde_json::from_str(frame.trim_end()).expect("decode");
                assert_eq!(decoded, chain);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn offer_adopts_longer_chain_and_announces_it() {
        let state = SharedChain::with_genesis(AdoptionPolicy::default());
        let mut events = state.subscribe();
        let remote = Chain::genesis()
            .append("a")
            .and_then(|chain| chain.append("b"))
            .expect("append");

        assert_eq!(state.offer(remote.clone()).await, Resolution::Adopt);
        assert_eq!(state.snapshot().await, Some(remote.clone()));
        match events.recv().await.expect("event") {
            ChainEvent::Adopted { chain } => assert_eq!(*chain, remote),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn offer_keeps_local_on_equal_length() {
        let state = SharedChain::with_genesis(AdoptionPolicy::default());
        let before = state.snapshot().await;

        let resolution = state.offer(Chain::genesis()).await;
        assert_eq!(resolution, Resolution::Keep(KeepReason::NotLonger));
        assert_eq!(state.snapshot().await, before);
    }

    #[tokio::test]
    async fn empty_node_adopts_first_chain() {
        let state = SharedChain::awaiting_peer(AdoptionPolicy::default());
        let remote = Chain::genesis();
        assert_eq!(state.offer(remote.clone()).await, Resolution::Adopt);
        assert_eq!(state.snapshot().await, Some(remote));
        assert!(state.append("now possible").await.is_ok());
    }

    #[tokio::test]
    async fn append_on_exhausted_chain_is_an_error() {
        use crate::block::Block;

        let last = Block::new(u64::MAX, "t".into(), "x".into(), String::new());
        let exhausted = Chain::try_from(vec![last]).expect("non-empty");

        let state = SharedChain::awaiting_peer(AdoptionPolicy::LengthOnly);
        assert_eq!(state.offer(exhausted.clone()).await, Resolution::Adopt);
        let result = state.append("next").await;
        assert!(matches!(
            result,
            Err(StateError::Chain(ChainError::IndexOverflow))
        ));
        assert_eq!(state.snapshot().await, Some(exhausted.clone()));

        let state = SharedChain::awaiting_peer(AdoptionPolicy::ValidatedLength);
        assert_eq!(
            state.offer(exhausted).await,
            Resolution::Keep(KeepReason::Invalid)
        );
        assert!(state.snapshot().await.is_none());
    }

    fn event_len(event: &ChainEvent) -> usize {
        match event {
            ChainEvent::Appended { frame } => serde_json::from_str::<Chain>(frame.trim_end())
                .expect("decode")
                .len(),
            ChainEvent::Adopted { chain } => chain.len(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn events_follow_mutation_order() {
        let state = Arc::new(SharedChain::with_genesis(AdoptionPolicy::default()));
        let mut events = state.subscribe();

        let appender = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                for i in 0..20 {
                    state.append(&format!("local {i}")).await.expect("append");
                    tokio::task::yield_now().await;
                }
            })
        };
        let offerer = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let mut remote = Chain::genesis();
                for i in 0..40 {
                    remote = remote.append(format!("remote {i}")).expect("append");
                    state.offer(remote.clone()).await;
                    tokio::task::yield_now().await;
                }
            })
        };
        appender.await.expect("appender task");
        offerer.await.expect("offerer task");

        // Every change grows the chain, so lengths seen in event order must
        // strictly increase and end at the final chain.
        let mut last_len = 1;
        while let Ok(event) = events.try_recv() {
            let len = event_len(&event);
            assert!(len > last_len, "event for {len} blocks after {last_len}");
            last_len = len;
        }
        assert_eq!(state.snapshot().await.map(|c| c.len()), Some(last_len));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn encode_never_sees_a_torn_chain() {
        let state = Arc::new(SharedChain::with_genesis(AdoptionPolicy::default()));

        let writer = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                for i in 0..200 {
                    state.append(&format!("entry {i}")).await.expect("append");
                }
            })
        };

        let reader = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                let mut last_len = 0;
                for _ in 0..200 {
                    let frame = state.encode().await.expect("encode").expect("chain");
                    let chain: Chain = serde_json::from_str(frame.trim_end()).expect("decode");
                    assert!(chain.validate(), "snapshot must be internally consistent");
                    assert!(chain.len() >= last_len, "length never goes backwards");
                    last_len = chain.len();
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.expect("writer task");
        reader.await.expect("reader task");
        assert_eq!(state.snapshot().await.map(|c| c.len()), Some(201));
    }
}
