//! Cluster-level integration tests (spec.md §8): multiple in-process nodes,
//! wired together the same way `bin/backend.rs` wires one, exercising
//! leader election, replication, and leader-loss recovery. All nodes run
//! fully in-memory (`data_dir: None`) so the tests don't touch disk.

use hangman_cluster::consensus::raft::{Raft, RaftConfig};
use hangman_cluster::game::{Command, Phase};
use hangman_cluster::mux::PortMultiplexer;
use std::net::SocketAddr;
use std::time::Duration;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(5);
const LEADER_TIMEOUT: Duration = Duration::from_secs(5);
const CONVERGE_POLL: Duration = Duration::from_millis(50);

fn spawn_node(id: &str, bootstrap: bool) -> (Raft, SocketAddr) {
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (addr, raft_listener, _rpc_listener) = PortMultiplexer::bind(bind).expect("bind mux");
    let config = RaftConfig {
        node_id: id.to_string(),
        rpc_addr: addr,
        data_dir: None,
        bootstrap,
        secret: "rust".to_string(),
    };
    let raft = Raft::start(config, raft_listener).expect("start raft");
    (raft, addr)
}

/// Builds a three-node cluster: node `a` bootstraps alone, then `b` and `c`
/// join through it. Returns once every node has observed a leader.
fn three_node_cluster() -> Vec<Raft> {
    let (a, _addr_a) = spawn_node("a", true);
    a.wait_for_leader(LEADER_TIMEOUT).expect("a should self-elect as a lone bootstrap node");

    let (b, addr_b) = spawn_node("b", false);
    let (c, addr_c) = spawn_node("c", false);
    a.join("b".to_string(), addr_b, JOIN_TIMEOUT).expect("join b");
    a.join("c".to_string(), addr_c, JOIN_TIMEOUT).expect("join c");

    for node in [&a, &b, &c] {
        node.wait_for_leader(LEADER_TIMEOUT).expect("every node should learn of the leader");
    }
    vec![a, b, c]
}

fn find_leader(nodes: &[Raft]) -> Raft {
    let deadline = std::time::Instant::now() + LEADER_TIMEOUT;
    loop {
        for node in nodes {
            let is_leader = node
                .servers()
                .into_iter()
                .any(|s| s.node_id == node.node_id() && s.is_leader);
            if is_leader {
                return node.clone();
            }
        }
        assert!(std::time::Instant::now() < deadline, "no leader found before deadline");
        std::thread::sleep(CONVERGE_POLL);
    }
}

#[test]
fn three_peer_cluster_converges_to_one_leader() {
    let nodes = three_node_cluster();
    let leader = find_leader(&nodes);
    let followers: Vec<&Raft> = nodes.iter().filter(|n| n.node_id() != leader.node_id()).collect();
    assert_eq!(followers.len(), 2);

    for node in &nodes {
        node.close();
    }
}

#[test]
fn leader_write_becomes_visible_on_followers() {
    let nodes = three_node_cluster();
    let leader = find_leader(&nodes);

    leader.submit(Command::ApplyLetter("r".to_string()), SUBMIT_TIMEOUT).expect("submit should succeed on the leader");

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    for node in &nodes {
        loop {
            let game = node.read_game();
            if game.guessed_characters().contains(&"r".to_string()) {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "node {} never saw the replicated letter",
                node.node_id()
            );
            std::thread::sleep(CONVERGE_POLL);
        }
    }

    for node in &nodes {
        node.close();
    }
}

#[test]
fn killing_the_leader_triggers_a_new_election() {
    let nodes = three_node_cluster();
    let first_leader = find_leader(&nodes);
    first_leader.close();

    let remaining: Vec<Raft> = nodes
        .iter()
        .filter(|n| n.node_id() != first_leader.node_id())
        .cloned()
        .collect();

    for node in &remaining {
        node.wait_for_leader(LEADER_TIMEOUT).expect("a new leader should be elected after the old one is gone");
    }
    let second_leader = find_leader(&remaining);
    assert_ne!(second_leader.node_id(), first_leader.node_id());

    second_leader
        .submit(Command::ApplyLetter("u".to_string()), SUBMIT_TIMEOUT)
        .expect("the new leader should still accept writes");

    for node in &remaining {
        node.close();
    }
}

#[test]
fn submitting_to_a_follower_fails_with_not_leader_hint() {
    let nodes = three_node_cluster();
    let leader = find_leader(&nodes);
    let follower = nodes.iter().find(|n| n.node_id() != leader.node_id()).unwrap();

    let err = follower
        .submit(Command::ApplyLetter("s".to_string()), SUBMIT_TIMEOUT)
        .expect_err("a follower must not accept writes directly");
    match err {
        hangman_cluster::error::RaftError::NotLeader { hint } => {
            assert!(hint.is_some(), "a follower that knows the leader should hint at its address");
        }
        other => panic!("expected NotLeader, got {other:?}"),
    }

    for node in &nodes {
        node.close();
    }
}

#[test]
fn reset_restores_a_fresh_game_after_progress() {
    let nodes = three_node_cluster();
    let leader = find_leader(&nodes);

    leader.submit(Command::ApplyLetter("r".to_string()), SUBMIT_TIMEOUT).unwrap();
    leader.submit(Command::Reset, SUBMIT_TIMEOUT).unwrap();

    let game = leader.read_game();
    assert_eq!(game.phase(), Phase::Start);
    assert!(game.incorrect_guesses().is_empty());

    for node in &nodes {
        node.close();
    }
}
