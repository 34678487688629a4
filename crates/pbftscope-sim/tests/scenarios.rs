//! End-to-end protocol scenarios driven through the simulation facade.

use pbftscope_pbft::{MessageKind, ProtocolConfig, ReplicaStatus};
use pbftscope_sim::{SCENARIO_REQUEST_DELAY, Simulation};
use pbftscope_types::{NodeId, ReplicaId, SeqNumber, SimTime, ViewNumber};
use test_case::test_case;

const TICK: u64 = 1_000;

fn at(micros: u64) -> SimTime {
    SimTime::from_micros(micros)
}

fn scenario(replicas: usize) -> Simulation {
    let config = ProtocolConfig {
        replicas,
        auto_requests: false,
        ..ProtocolConfig::default()
    };
    let mut sim = Simulation::new(&config).unwrap();
    sim.setup_scenario().unwrap();
    sim
}

#[test]
fn scheduled_request_commits() {
    let mut sim = scenario(5);

    sim.run_until(at(SCENARIO_REQUEST_DELAY - TICK), TICK).unwrap();
    assert!(sim.cluster().pending_request().is_none());

    sim.run_until(at(SCENARIO_REQUEST_DELAY), TICK).unwrap();
    let pending = sim.cluster().pending_request().unwrap();
    assert_eq!(pending.primary, Some(ReplicaId::new(1)));
    assert!(sim.time_model().timers().is_empty());

    sim.run_until(at(200_000), TICK).unwrap();
    let cluster = sim.cluster();
    assert!(cluster.client().unwrap().accepted_result(SeqNumber::new(1)).is_some());
    assert!(cluster.pending_request().is_none());
    for replica in cluster.replicas() {
        assert_eq!(replica.commit_index(), SeqNumber::new(1));
    }
}

#[test]
fn client_accepts_on_second_reply() {
    let mut sim = scenario(5);
    // Request at 10ms, ordered at 35ms, replies sent at 95ms land at 125ms.
    sim.run_until(at(124_000), TICK).unwrap();
    assert!(sim.cluster().client().unwrap().accepted().is_empty());

    let replies: Vec<_> = sim
        .cluster()
        .messages()
        .iter()
        .filter(|m| m.kind() == MessageKind::Reply)
        .map(|m| m.id)
        .collect();
    assert_eq!(replies.len(), 5);

    // Leave exactly two replies in flight.
    for id in &replies[2..] {
        sim.drop_message(*id).unwrap();
    }
    sim.run_until(at(130_000), TICK).unwrap();
    assert!(sim.cluster().client().unwrap().accepted_result(SeqNumber::new(1)).is_some());
}

#[test]
fn one_reply_is_not_enough() {
    let mut sim = scenario(5);
    sim.run_until(at(124_000), TICK).unwrap();

    let replies: Vec<_> = sim
        .cluster()
        .messages()
        .iter()
        .filter(|m| m.kind() == MessageKind::Reply)
        .map(|m| m.id)
        .collect();
    for id in &replies[1..] {
        sim.drop_message(*id).unwrap();
    }

    sim.run_until(at(200_000), TICK).unwrap();
    let client = sim.cluster().client().unwrap();
    assert!(client.accepted().is_empty());
    assert_eq!(client.replies()[&SeqNumber::new(1)].len(), 1);
    assert!(sim.cluster().pending_request().is_some());
}

#[test]
fn stopped_primary_triggers_view_change() {
    let mut sim = scenario(5);
    sim.run_until(at(SCENARIO_REQUEST_DELAY), TICK).unwrap();
    sim.stop(ReplicaId::new(1)).unwrap();

    sim.run_until(at(400_000), TICK).unwrap();
    let cluster = sim.cluster();
    let primaries: Vec<_> = cluster.primaries().map(|r| r.id()).collect();
    assert_eq!(primaries, vec![ReplicaId::new(2)]);
    assert!(
        cluster
            .replicas()
            .iter()
            .filter(|r| !r.is_stopped())
            .all(|r| r.view() == ViewNumber::new(1))
    );
    assert!(cluster.client().unwrap().accepted_result(SeqNumber::new(1)).is_some());
}

#[test]
fn restarted_replica_catches_up_to_view() {
    let mut sim = scenario(5);
    sim.run_until(at(SCENARIO_REQUEST_DELAY), TICK).unwrap();
    sim.stop(ReplicaId::new(1)).unwrap();
    sim.run_until(at(400_000), TICK).unwrap();

    sim.restart(ReplicaId::new(1)).unwrap();
    let replica = sim.cluster().replica(ReplicaId::new(1)).unwrap();
    assert_eq!(replica.status(), ReplicaStatus::Follower);
    assert_eq!(replica.view(), ViewNumber::new(1));
    assert!(replica.prepare_votes().is_empty());
}

#[test]
fn resume_all_restores_a_single_primary() {
    let mut sim = scenario(5);
    sim.run_until(at(SCENARIO_REQUEST_DELAY), TICK).unwrap();
    sim.stop(ReplicaId::new(1)).unwrap();
    sim.stop(ReplicaId::new(4)).unwrap();
    sim.run_until(at(400_000), TICK).unwrap();

    sim.resume_all().unwrap();
    let cluster = sim.cluster();
    assert!(cluster.replicas().iter().all(|r| !r.is_stopped()));
    let views: Vec<_> = cluster.replicas().iter().map(|r| r.view()).collect();
    assert!(views.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cluster.primaries().count(), 1);
    assert!(cluster.pending_request().is_some());
}

#[test]
fn dropped_commits_from_one_replica_are_tolerated() {
    let mut sim = scenario(5);
    // Prepares land at 70ms and the commits go out in the same step.
    sim.run_until(at(70_000), TICK).unwrap();

    let from_five: Vec<_> = sim
        .cluster()
        .messages()
        .iter()
        .filter(|m| m.kind() == MessageKind::Commit && m.from == NodeId::Replica(ReplicaId::new(5)))
        .map(|m| m.id)
        .collect();
    assert_eq!(from_five.len(), 4);
    for id in from_five {
        sim.drop_message(id).unwrap();
    }

    sim.run_until(at(200_000), TICK).unwrap();
    assert!(
        sim.cluster()
            .replicas()
            .iter()
            .all(|r| r.commit_index() == SeqNumber::new(1))
    );
}

#[test_case(4; "f = 1, minimum")]
#[test_case(7; "f = 2")]
#[test_case(10; "f = 3")]
fn cluster_sizes_commit(replicas: usize) {
    let mut sim = scenario(replicas);
    sim.run_until(at(200_000), TICK).unwrap();

    let cluster = sim.cluster();
    assert_eq!(cluster.replicas().len(), replicas);
    assert!(cluster.client().unwrap().accepted_result(SeqNumber::new(1)).is_some());
}

#[test]
fn invalid_cluster_size_is_rejected() {
    let config = ProtocolConfig {
        replicas: 3,
        ..ProtocolConfig::default()
    };
    assert!(Simulation::new(&config).is_err());
}
