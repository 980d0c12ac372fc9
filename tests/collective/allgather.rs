use super::helpers::{
    GROUP, Outcome, SCHEDULES, Schedule, Sim, allgather_all, assert_gathered, payload_of,
};
use overlay::protocol::encode_message;
use overlay::types::tags;
use overlay::{AllgatherAlgorithm, Bucket, OverlayError, OverlayMessage, Signature, TopologyKind};

fn all_ranks(n: u32) -> Vec<u32> {
    (0..n).collect()
}

#[test]
fn test_direct_allgather_three_members() {
    let mut sim = Sim::with_algorithm(3, AllgatherAlgorithm::Direct, Schedule::Fifo);
    let outcomes: Vec<Outcome> = (0..3).map(|_| Outcome::new()).collect();
    for (rank, value) in [10u8, 20, 30].into_iter().enumerate() {
        sim.engines[rank].allgather(&[], vec![value], outcomes[rank].callback());
    }
    sim.run();

    for outcome in &outcomes {
        let bucket = outcome.take().unwrap();
        assert_eq!(bucket.into_payloads(), vec![vec![10], vec![20], vec![30]]);
    }
    // One release broadcast: the master relays it to its two children.
    assert_eq!(sim.sent(0, tags::XCAST), 2);
    assert_eq!(sim.sent(1, tags::ALLGATHER_DIRECT), 1);
    assert_eq!(sim.sent(2, tags::ALLGATHER_DIRECT), 1);
    assert_eq!(sim.sent(0, tags::ALLGATHER_DIRECT), 0);
    sim.assert_idle();
}

#[test]
fn test_rcd_power_of_two_sizes() {
    for n in [1u32, 2, 4, 8, 16] {
        for schedule in SCHEDULES {
            let mut sim = Sim::with_algorithm(n, AllgatherAlgorithm::RecursiveDoubling, schedule);
            let outcomes = allgather_all(&mut sim);
            for (rank, outcome) in outcomes.iter().enumerate() {
                let bucket = outcome
                    .take()
                    .unwrap_or_else(|e| panic!("n={n} rank={rank} {schedule:?}: {e}"));
                assert_gathered(&bucket, &all_ranks(n));
                assert_eq!(
                    sim.sent(rank as u32, tags::ALLGATHER_RCD),
                    n.trailing_zeros() as usize,
                    "n={n} rank={rank} round messages"
                );
            }
            assert_eq!(sim.total_sent(), (n * n.trailing_zeros()) as usize);
            sim.assert_idle();
        }
    }
}

#[test]
fn test_brucks_any_size() {
    for n in [1u32, 3, 5, 6, 7, 9] {
        for schedule in SCHEDULES {
            let mut sim = Sim::with_algorithm(n, AllgatherAlgorithm::Brucks, schedule);
            let outcomes = allgather_all(&mut sim);
            for (rank, outcome) in outcomes.iter().enumerate() {
                let bucket = outcome
                    .take()
                    .unwrap_or_else(|e| panic!("n={n} rank={rank} {schedule:?}: {e}"));
                assert_gathered(&bucket, &all_ranks(n));
            }
            sim.assert_idle();
        }
    }
}

#[test]
fn test_brucks_message_count() {
    // floor(log2 n) regular rounds plus one straggler when n is not a power of two.
    for (n, per_member) in [(2u32, 1usize), (3, 2), (4, 2), (6, 3), (8, 3), (9, 4)] {
        let mut sim = Sim::with_algorithm(n, AllgatherAlgorithm::Brucks, Schedule::Fifo);
        allgather_all(&mut sim);
        for rank in 0..n {
            assert_eq!(sim.sent(rank, tags::ALLGATHER_BRUCKS), per_member, "n={n} rank={rank}");
        }
    }
}

#[test]
fn test_auto_selects_by_size() {
    let mut sim = Sim::with_algorithm(8, AllgatherAlgorithm::Auto, Schedule::Fifo);
    allgather_all(&mut sim);
    assert_eq!(sim.sent(0, tags::ALLGATHER_RCD), 3);
    assert_eq!(sim.sent(0, tags::ALLGATHER_BRUCKS), 0);

    let mut sim = Sim::with_algorithm(6, AllgatherAlgorithm::Auto, Schedule::Fifo);
    let outcomes = allgather_all(&mut sim);
    assert_eq!(sim.sent(0, tags::ALLGATHER_RCD), 0);
    assert!(sim.sent(0, tags::ALLGATHER_BRUCKS) > 0);
    for outcome in outcomes {
        assert_gathered(&outcome.take().unwrap(), &all_ranks(6));
    }
}

#[test]
fn test_rcd_falls_back_to_brucks() {
    let mut sim = Sim::with_algorithm(5, AllgatherAlgorithm::RecursiveDoubling, Schedule::Lifo);
    let outcomes = allgather_all(&mut sim);
    for outcome in outcomes {
        assert_gathered(&outcome.take().unwrap(), &all_ranks(5));
    }
    assert_eq!(sim.sent(2, tags::ALLGATHER_RCD), 0);
}

#[test]
fn test_direct_any_size_and_topology() {
    for topology in [TopologyKind::Binomial, TopologyKind::Flat] {
        for n in 1..=9u32 {
            for schedule in SCHEDULES {
                let mut sim = Sim::new(
                    n,
                    overlay::OverlayConfig {
                        allgather: AllgatherAlgorithm::Direct,
                        topology,
                        ..Default::default()
                    },
                    schedule,
                );
                let outcomes = allgather_all(&mut sim);
                for outcome in outcomes {
                    assert_gathered(&outcome.take().unwrap(), &all_ranks(n));
                }
                sim.assert_idle();
            }
        }
    }
}

#[test]
fn test_direct_forwards_through_tree() {
    // Rank 3's parent is 1, so its contribution hops through 1.
    let mut sim = Sim::with_algorithm(4, AllgatherAlgorithm::Direct, Schedule::Fifo);
    allgather_all(&mut sim);
    assert_eq!(sim.sent(3, tags::FORWARD), 1);
    assert_eq!(sim.sent(1, tags::FORWARD), 1);
    assert_eq!(sim.sent(3, tags::ALLGATHER_DIRECT), 0);
}

#[test]
fn test_subset_participants() {
    for algorithm in [
        AllgatherAlgorithm::Direct,
        AllgatherAlgorithm::RecursiveDoubling,
        AllgatherAlgorithm::Brucks,
    ] {
        for participants in [vec![3u32, 1], vec![4, 2, 1], vec![1, 2, 3, 4]] {
            let mut sim = Sim::with_algorithm(5, algorithm, Schedule::Random(3));
            let outcomes: Vec<Outcome> = participants.iter().map(|_| Outcome::new()).collect();
            for (&rank, outcome) in participants.iter().zip(&outcomes) {
                sim.engines[rank as usize].allgather(
                    &participants,
                    payload_of(rank),
                    outcome.callback(),
                );
            }
            sim.run();

            let mut sorted = participants.clone();
            sorted.sort_unstable();
            for outcome in &outcomes {
                assert_gathered(&outcome.take().unwrap(), &sorted);
            }
            // Non-participants never deliver anything.
            assert!(sim.delivered(0).is_empty());
            sim.assert_idle();
        }
    }
}

#[test]
fn test_late_joiner_consumes_buffered_rounds() {
    for algorithm in [
        AllgatherAlgorithm::Direct,
        AllgatherAlgorithm::RecursiveDoubling,
        AllgatherAlgorithm::Brucks,
    ] {
        let n = 4;
        let mut sim = Sim::with_algorithm(n, algorithm, Schedule::Fifo);
        let outcomes: Vec<Outcome> = (0..n).map(|_| Outcome::new()).collect();
        for rank in [0u32, 2, 3] {
            sim.engines[rank as usize].allgather(&[], payload_of(rank), outcomes[rank as usize].callback());
        }
        sim.run();
        assert!(outcomes.iter().all(|o| o.calls() == 0), "{algorithm:?} completed early");

        sim.engines[1].allgather(&[], payload_of(1), outcomes[1].callback());
        sim.run();
        for outcome in &outcomes {
            assert_gathered(&outcome.take().unwrap(), &all_ranks(n));
        }
        sim.assert_idle();
    }
}

#[test]
fn test_back_to_back_allgathers() {
    let mut sim = Sim::with_algorithm(6, AllgatherAlgorithm::Brucks, Schedule::Random(11));
    let first: Vec<Outcome> = (0..6).map(|_| Outcome::new()).collect();
    let second: Vec<Outcome> = (0..6).map(|_| Outcome::new()).collect();
    for rank in 0..6u32 {
        let engine = &mut sim.engines[rank as usize];
        engine.allgather(&[], vec![rank as u8], first[rank as usize].callback());
        engine.allgather(&[], vec![100 + rank as u8], second[rank as usize].callback());
    }
    sim.run();
    for rank in 0..6 {
        let a = first[rank].take().unwrap();
        let b = second[rank].take().unwrap();
        assert_eq!(a.concat(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(b.concat(), vec![100, 101, 102, 103, 104, 105]);
    }
}

fn round(signature: &Signature, distance: u32, from: u32) -> Vec<u8> {
    encode_message(&OverlayMessage::Round {
        signature: signature.clone(),
        distance,
        bucket: Bucket::single(from, payload_of(from)),
    })
    .unwrap()
}

#[test]
fn test_duplicate_round_fails_collective() {
    let mut sim = Sim::with_algorithm(4, AllgatherAlgorithm::RecursiveDoubling, Schedule::Fifo);
    let outcome = Outcome::new();
    sim.engines[0].allgather(&[], payload_of(0), outcome.callback());

    let sig = Signature::new(GROUP, vec![0, 1, 2, 3], 0);
    let msg = round(&sig, 0, 1);
    sim.engines[0].handle_message(1, tags::ALLGATHER_RCD, &msg);
    assert_eq!(outcome.calls(), 0);
    sim.engines[0].handle_message(1, tags::ALLGATHER_RCD, &msg);

    let err = outcome.take().unwrap_err();
    assert!(matches!(err, OverlayError::DistanceAlreadyReceived { distance: 0, .. }));
    assert_eq!(sim.engines[0].active_trackers(), 0);
}

#[test]
fn test_round_from_wrong_sender_fails_collective() {
    let mut sim = Sim::with_algorithm(4, AllgatherAlgorithm::RecursiveDoubling, Schedule::Fifo);
    let outcome = Outcome::new();
    sim.engines[0].allgather(&[], payload_of(0), outcome.callback());

    // Rank 0's distance-0 partner is rank 1, not rank 2.
    let sig = Signature::new(GROUP, vec![0, 1, 2, 3], 0);
    sim.engines[0].handle_message(2, tags::ALLGATHER_RCD, &round(&sig, 0, 2));
    assert!(matches!(outcome.take(), Err(OverlayError::ProtocolViolation { .. })));
}

#[test]
fn test_foreign_group_is_ignored() {
    let mut sim = Sim::with_algorithm(2, AllgatherAlgorithm::RecursiveDoubling, Schedule::Fifo);
    let outcome = Outcome::new();
    sim.engines[0].allgather(&[], payload_of(0), outcome.callback());

    let foreign = Signature::new(GROUP + 1, vec![0, 1], 0);
    sim.engines[0].handle_message(1, tags::ALLGATHER_RCD, &round(&foreign, 0, 1));
    assert_eq!(outcome.calls(), 0);
    assert_eq!(sim.engines[0].active_trackers(), 1);

    sim.engines[1].allgather(&[], payload_of(1), Outcome::new().callback());
    sim.run();
    assert_gathered(&outcome.take().unwrap(), &[0, 1]);
}

fn round_carrying(signature: &Signature, distance: u32, contributors: &[u32]) -> Vec<u8> {
    let mut bucket = Bucket::new();
    for &r in contributors {
        bucket.absorb(Bucket::single(r, payload_of(r))).unwrap();
    }
    encode_message(&OverlayMessage::Round {
        signature: signature.clone(),
        distance,
        bucket,
    })
    .unwrap()
}

#[test]
fn test_rcd_round_with_outside_contributor_fails() {
    let mut sim = Sim::with_algorithm(4, AllgatherAlgorithm::RecursiveDoubling, Schedule::Fifo);
    let outcome = Outcome::new();
    sim.engines[0].allgather(&[0, 1], payload_of(0), outcome.callback());

    // Rank 1 is the right partner but ships rank 3's contribution instead of its own.
    let sig = Signature::new(GROUP, vec![0, 1], 0);
    sim.engines[0].handle_message(1, tags::ALLGATHER_RCD, &round_carrying(&sig, 0, &[3]));

    assert!(matches!(outcome.take(), Err(OverlayError::ProtocolViolation { .. })));
    assert_eq!(sim.engines[0].active_trackers(), 0);
}

#[test]
fn test_brucks_round_with_outside_contributor_fails() {
    let mut sim = Sim::with_algorithm(4, AllgatherAlgorithm::Brucks, Schedule::Fifo);
    let outcome = Outcome::new();
    sim.engines[0].allgather(&[0, 1, 2], payload_of(0), outcome.callback());

    let sig = Signature::new(GROUP, vec![0, 1, 2], 0);
    sim.engines[0].handle_message(1, tags::ALLGATHER_BRUCKS, &round_carrying(&sig, 0, &[1, 3]));

    assert!(matches!(outcome.take(), Err(OverlayError::ProtocolViolation { .. })));
}

#[test]
fn test_release_with_wrong_ranks_fails() {
    let mut sim = Sim::with_algorithm(4, AllgatherAlgorithm::Direct, Schedule::Fifo);
    let outcome = Outcome::new();
    sim.engines[1].allgather(&[0, 1], payload_of(1), outcome.callback());

    // Right size, wrong members.
    let sig = Signature::new(GROUP, vec![0, 1], 0);
    let mut bucket = Bucket::single(0, payload_of(0));
    bucket.absorb(Bucket::single(3, payload_of(3))).unwrap();
    let release = encode_message(&OverlayMessage::Release {
        signature: sig.clone(),
        bucket,
    })
    .unwrap();
    let xcast = encode_message(&OverlayMessage::Xcast {
        signature: sig,
        target_tag: tags::RELEASE,
        origin: 0,
        payload: release,
    })
    .unwrap();
    sim.engines[1].handle_message(0, tags::XCAST, &xcast);

    assert!(matches!(outcome.take(), Err(OverlayError::ProtocolViolation { .. })));
    assert_eq!(sim.engines[1].active_trackers(), 0);
}
