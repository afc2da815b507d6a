//! Multi-node test harness: spins N nodes on ephemeral localhost ports
//! and wires them into one gossip mesh.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use weave_primitives::params::Network;

use crate::config::NodeConfig;
use crate::node::Node;

pub struct System {
    pub nodes: Vec<Arc<Node>>,
    _dirs: Vec<TempDir>,
}

impl System {
    /// Starts `count` test-network nodes; every node greets the first so
    /// the mesh assembles through keepalive gossip.
    pub async fn new(count: usize) -> System {
        let mut nodes = Vec::with_capacity(count);
        let mut dirs = Vec::with_capacity(count);
        for _ in 0..count {
            let dir = TempDir::new().expect("temp dir");
            let mut config = NodeConfig::with_data_dir(dir.path().to_path_buf(), Network::Test);
            config.listen = IpAddr::V4(Ipv4Addr::LOCALHOST);
            config.peering_port = 0;
            config.bootstrap_port = 0;
            let node = Node::start(config).await.expect("start node");
            nodes.push(node);
            dirs.push(dir);
        }
        for node in nodes.iter().skip(1) {
            node.peers
                .insert(nodes[0].udp_addr(), weave_primitives::params::PROTOCOL_VERSION, None);
            node.send_keepalive(nodes[0].udp_addr());
        }
        System {
            nodes,
            _dirs: dirs,
        }
    }

    /// One poll step for convergence loops.
    pub async fn poll(&self) {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    pub fn stop(&self) {
        for node in &self.nodes {
            node.stop();
        }
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_primitives::crypto::Keypair;
    use weave_primitives::Amount;
    use weave_state::genesis::{genesis_amount, test_genesis_key};
    use weave_state::{Block, SendBlock, Vote};

    fn forked_sends(node: &Node) -> (Block, Block) {
        let gkey = test_genesis_key();
        let a = Block::Send(SendBlock::new(
            node.genesis.hash(),
            Keypair::generate().public,
            Amount(genesis_amount().number() - 1),
            &gkey.raw,
            &gkey.public,
            0,
        ));
        let b = Block::Send(SendBlock::new(
            node.genesis.hash(),
            Keypair::generate().public,
            Amount(genesis_amount().number() - 2),
            &gkey.raw,
            &gkey.public,
            0,
        ));
        (a, b)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_genesis_state_on_boot() {
        let system = System::new(1).await;
        let node = &system.nodes[0];
        let txn = node.store.tx_begin_read();
        assert_eq!(
            node.ledger
                .account_balance(&txn, &node.genesis.account)
                .unwrap(),
            genesis_amount()
        );
        assert_eq!(node.store.block_count(&txn).unwrap().sum(), 1);
        assert_eq!(
            node.ledger.latest(&txn, &node.genesis.account).unwrap(),
            Some(node.genesis.hash())
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fork_resolved_by_votes() {
        let system = System::new(1).await;
        let node = system.nodes[0].clone();
        let (a, b) = forked_sends(&node);

        node.processor.add(a.clone());
        node.processor.flush();
        node.processor.add(b.clone());
        node.processor.flush();

        // The fork opened an election rooted at genesis.
        assert_eq!(node.active.roots_len(), 1);

        // The genesis rep's weight decides for B.
        let gkey = test_genesis_key();
        let vote = Vote::new(gkey.public, &gkey.raw, 1, b.clone());
        node.vote_processor.vote(vote);
        node.vote_processor.flush();

        for _ in 0..200 {
            let txn = node.store.tx_begin_read();
            if node.ledger.latest(&txn, &node.genesis.account).unwrap() == Some(b.hash()) {
                break;
            }
            drop(txn);
            system.poll().await;
        }
        let txn = node.store.tx_begin_read();
        assert_eq!(
            node.ledger.latest(&txn, &node.genesis.account).unwrap(),
            Some(b.hash())
        );
        assert!(!node.ledger.block_exists(&txn, &a.hash()).unwrap());
        assert!(node.active.roots_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_gap_then_heal() {
        let system = System::new(1).await;
        let node = &system.nodes[0];
        let gkey = test_genesis_key();
        let send1 = Block::Send(SendBlock::new(
            node.genesis.hash(),
            Keypair::generate().public,
            Amount(genesis_amount().number() - 1),
            &gkey.raw,
            &gkey.public,
            0,
        ));
        let send2 = Block::Send(SendBlock::new(
            send1.hash(),
            Keypair::generate().public,
            Amount(genesis_amount().number() - 2),
            &gkey.raw,
            &gkey.public,
            0,
        ));

        // Child first: parks, then the parent heals it in the same worker.
        node.processor.add(send2.clone());
        node.processor.flush();
        {
            let txn = node.store.tx_begin_read();
            assert!(!node.ledger.block_exists(&txn, &send2.hash()).unwrap());
        }
        node.processor.add(send1.clone());
        node.processor.flush();
        let txn = node.store.tx_begin_read();
        assert!(node.ledger.block_exists(&txn, &send1.hash()).unwrap());
        assert!(node.ledger.block_exists(&txn, &send2.hash()).unwrap());
        assert_eq!(node.store.unchecked_count(&txn).unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bootstrap_convergence() {
        let system = System::new(2).await;
        let source = system.nodes[0].clone();
        let target = system.nodes[1].clone();

        // Grow the source by three blocks.
        let gkey = test_genesis_key();
        let mut head = source.genesis.hash();
        let mut balance = genesis_amount().number();
        for _ in 0..3 {
            balance -= 1;
            let send = Block::Send(SendBlock::new(
                head,
                Keypair::generate().public,
                Amount(balance),
                &gkey.raw,
                &gkey.public,
                0,
            ));
            head = send.hash();
            source.processor.add(send);
        }
        source.processor.flush();

        let handle = target.bootstrap_to(source.bootstrap_addr()).unwrap();

        let mut converged = false;
        for _ in 0..200 {
            system.poll().await;
            target.processor.flush();
            let txn = target.store.tx_begin_read();
            if target.ledger.latest(&txn, &target.genesis.account).unwrap() == Some(head) {
                converged = true;
                break;
            }
        }
        assert!(converged, "target never caught up");
        assert!(target.active.roots_empty());
        assert!(handle.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_keepalive_peer_discovery() {
        let system = System::new(2).await;
        let a = &system.nodes[0];
        let b = &system.nodes[1];

        let mut linked = false;
        for _ in 0..200 {
            if a.peers.contains(&b.udp_addr()) && b.peers.contains(&a.udp_addr()) {
                linked = true;
                break;
            }
            system.poll().await;
        }
        assert!(linked, "peers never discovered each other");
        // Exactly once each.
        assert_eq!(a.peers.len(), 1);
        assert_eq!(b.peers.len(), 1);
    }
}
