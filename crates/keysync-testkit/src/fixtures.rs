//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use keysync::{NodeConfig, NodeError, SyncNode};
use keysync_core::Object;
use keysync_engine::{MemoryNetwork, MemoryTransport, PeerId, SyncEngine};
use keysync_store::merge::NewestWins;
use keysync_store::MemoryDataSource;

/// Well-known peer identities.
pub const PEER_A: PeerId = PeerId::from_bytes([0xAA; 32]);
pub const PEER_B: PeerId = PeerId::from_bytes([0xBB; 32]);

/// A generic password item keyed by class and account.
pub fn keychain_item(account: &str, modified: i64, secret: &[u8]) -> Object {
    Object::builder()
        .set("class", "genp")
        .set("acct", account)
        .set("mdat", modified)
        .set("v_Data", secret.to_vec())
        .build()
}

/// `count` items with random timestamps and secrets, reproducible from
/// `seed`. Accounts are `acct-0000`, `acct-0001`, ... so two calls with
/// different seeds produce conflicting versions of the same records.
pub fn random_items(count: usize, seed: u64) -> Vec<Object> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let secret: [u8; 16] = rng.gen();
            keychain_item(&format!("acct-{:04}", i), rng.gen_range(0..1_000), &secret)
        })
        .collect()
}

/// A memory store keyed like a keychain, where the newest edit wins.
pub fn keychain_store(items: &[Object]) -> Arc<MemoryDataSource> {
    let store = MemoryDataSource::new(["class", "acct"], NewestWins::new("mdat"));
    for item in items {
        store
            .insert(item.clone())
            .expect("keychain items carry class and acct");
    }
    Arc::new(store)
}

/// Two engines wired back to back without a transport.
pub struct EnginePair {
    pub a: SyncEngine<MemoryDataSource>,
    pub b: SyncEngine<MemoryDataSource>,
}

impl EnginePair {
    pub fn new(items_a: &[Object], items_b: &[Object]) -> Self {
        Self {
            a: SyncEngine::create(keychain_store(items_a)),
            b: SyncEngine::create(keychain_store(items_b)),
        }
    }

    /// One round: each side produces a message and the other handles it.
    /// Returns how many messages were exchanged.
    pub async fn step(&self) -> keysync::Result<usize> {
        let to_b = self.a.sync_with_peer(PEER_B, false).await?;
        let to_a = self.b.sync_with_peer(PEER_A, false).await?;

        let mut exchanged = 0;
        if let Some(bytes) = to_b {
            self.b.handle_message(PEER_A, &bytes).await?;
            exchanged += 1;
        }
        if let Some(bytes) = to_a {
            self.a.handle_message(PEER_B, &bytes).await?;
            exchanged += 1;
        }
        Ok(exchanged)
    }

    /// Step until a round exchanges nothing. Returns the rounds taken.
    pub async fn converge(&self, max_rounds: usize) -> keysync::Result<usize> {
        for round in 0..max_rounds {
            if self.step().await? == 0 {
                return Ok(round);
            }
        }
        Err(NodeError::NotQuiet { rounds: max_rounds })
    }
}

/// Nodes sharing one in-memory network.
pub struct Mesh {
    pub network: Arc<MemoryNetwork>,
    pub nodes: Vec<SyncNode<MemoryDataSource, MemoryTransport>>,
}

impl Mesh {
    /// One node per entry of `stores`, with peer ids `[1; 32]`, `[2; 32]`...
    pub async fn new(stores: Vec<Vec<Object>>) -> Self {
        let network = MemoryNetwork::new();
        let config = NodeConfig {
            message_timeout: Duration::from_millis(20),
            ..NodeConfig::default()
        };

        let mut nodes = Vec::with_capacity(stores.len());
        for (i, items) in stores.iter().enumerate() {
            let id = PeerId::from_bytes([i as u8 + 1; 32]);
            let transport = network.create_transport(id).await;
            nodes.push(SyncNode::new(
                keychain_store(items),
                transport,
                config.clone(),
            ));
        }
        Self { network, nodes }
    }

    /// Step every node in lockstep until a round has no traffic.
    pub async fn converge(&self, max_rounds: usize) -> keysync::Result<usize> {
        for round in 0..max_rounds {
            let mut traffic = 0;
            for node in &self.nodes {
                traffic += node.sync_all(false).await?;
            }
            for node in &self.nodes {
                traffic += node.drain(Duration::from_millis(5)).await?;
            }
            if traffic == 0 {
                return Ok(round);
            }
        }
        Err(NodeError::NotQuiet { rounds: max_rounds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_engine_pair_converges() {
        let pair = EnginePair::new(
            &[keychain_item("alice", 1, b"a")],
            &[keychain_item("bob", 1, b"b")],
        );
        pair.converge(16).await.unwrap();

        let a = pair.a.local_manifest().await.unwrap();
        let b = pair.b.local_manifest().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.count(), 2);
    }

    #[tokio::test]
    async fn test_mesh_converges() {
        let mesh = Mesh::new(vec![
            vec![keychain_item("alice", 1, b"a")],
            vec![keychain_item("alice", 5, b"newer")],
            vec![keychain_item("carol", 1, b"c")],
        ])
        .await;
        mesh.converge(32).await.unwrap();

        let first = mesh.nodes[0].engine().local_manifest().await.unwrap();
        assert_eq!(first.count(), 2);
        for node in &mesh.nodes[1..] {
            assert_eq!(node.engine().local_manifest().await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_conflicting_keychains_converge_past_message_cap() {
        let pair = EnginePair::new(&random_items(120, 1), &random_items(30, 2));
        pair.converge(64).await.unwrap();

        let a = pair.a.local_manifest().await.unwrap();
        assert_eq!(a.count(), 120);
        assert_eq!(a, pair.b.local_manifest().await.unwrap());
    }

    #[test]
    fn test_random_items_are_reproducible() {
        assert_eq!(random_items(5, 7), random_items(5, 7));
        assert_ne!(random_items(5, 7), random_items(5, 8));
    }

    #[test]
    fn test_keychain_items_share_key_across_versions() {
        let store = keychain_store(&[keychain_item("alice", 1, b"one")]);
        store.insert(keychain_item("alice", 2, b"two")).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }
}
