use overlay::collective::{Delivery, Outbound};
use overlay::{
    AllgatherAlgorithm, Bucket, CompletionFn, GroupEngine, OverlayConfig, OverlayGroup, Rank,
    Result, Tag, TopologyKind,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub const GROUP: u64 = 0x0f1e;

/// Order in which the simulator hands queued messages to their receivers.
#[derive(Debug, Clone, Copy)]
pub enum Schedule {
    Fifo,
    Lifo,
    Random(u64),
}

/// Every schedule the property tests sweep over.
pub const SCHEDULES: [Schedule; 5] = [
    Schedule::Fifo,
    Schedule::Lifo,
    Schedule::Random(1),
    Schedule::Random(7),
    Schedule::Random(0xdead_beef),
];

struct InFlight {
    from: Rank,
    out: Outbound,
}

/// Deterministic in-memory network of engines.
pub struct Sim {
    pub engines: Vec<GroupEngine>,
    queue: Vec<InFlight>,
    schedule: Schedule,
    rng: StdRng,
    sends: HashMap<(Rank, Tag), usize>,
    dead: HashSet<Rank>,
    delivered: Vec<Vec<Delivery>>,
}

impl Sim {
    pub fn new(n: u32, config: OverlayConfig, schedule: Schedule) -> Self {
        let seed = match schedule {
            Schedule::Random(seed) => seed,
            _ => 0,
        };
        Self {
            engines: (0..n)
                .map(|r| GroupEngine::new(GROUP, r, n, config.clone()).unwrap())
                .collect(),
            queue: Vec::new(),
            schedule,
            rng: StdRng::seed_from_u64(seed),
            sends: HashMap::new(),
            dead: HashSet::new(),
            delivered: vec![Vec::new(); n as usize],
        }
    }

    pub fn with_algorithm(n: u32, algorithm: AllgatherAlgorithm, schedule: Schedule) -> Self {
        Self::new(
            n,
            OverlayConfig {
                allgather: algorithm,
                ..OverlayConfig::default()
            },
            schedule,
        )
    }

    pub fn with_topology(n: u32, topology: TopologyKind, schedule: Schedule) -> Self {
        Self::new(
            n,
            OverlayConfig {
                topology,
                ..OverlayConfig::default()
            },
            schedule,
        )
    }

    pub fn size(&self) -> u32 {
        self.engines.len() as u32
    }

    /// Move every engine's queued sends and deliveries into the simulator.
    fn collect(&mut self) {
        for (rank, engine) in self.engines.iter_mut().enumerate() {
            let rank = rank as Rank;
            while let Some(out) = engine.poll_outbound() {
                *self.sends.entry((rank, out.tag)).or_insert(0) += 1;
                self.queue.push(InFlight { from: rank, out });
            }
            while let Some(d) = engine.poll_delivery() {
                self.delivered[rank as usize].push(d);
            }
        }
    }

    fn pick(&mut self) -> Option<InFlight> {
        if self.queue.is_empty() {
            return None;
        }
        let idx = match self.schedule {
            Schedule::Fifo => 0,
            Schedule::Lifo => self.queue.len() - 1,
            Schedule::Random(_) => self.rng.gen_range(0..self.queue.len()),
        };
        Some(self.queue.remove(idx))
    }

    /// Deliver one message. Returns false when the network is idle.
    pub fn step(&mut self) -> bool {
        self.collect();
        let Some(InFlight { from, out }) = self.pick() else {
            return false;
        };
        if self.dead.contains(&out.dest) {
            self.engines[from as usize].handle_send_complete(
                out.id,
                Err(overlay::OverlayError::PeerUnreachable {
                    rank: out.dest,
                    reason: "dead".into(),
                }),
            );
        } else if !self.dead.contains(&from) {
            self.engines[out.dest as usize].handle_message(from, out.tag, &out.payload);
            self.engines[from as usize].handle_send_complete(out.id, Ok(()));
        }
        self.collect();
        true
    }

    /// Deliver messages until the network is idle.
    pub fn run(&mut self) {
        let mut steps = 0usize;
        while self.step() {
            steps += 1;
            assert!(steps < 1_000_000, "simulation did not quiesce");
        }
    }

    /// Take `rank` down and tell every survivor.
    pub fn kill(&mut self, rank: Rank) {
        self.dead.insert(rank);
        for (r, engine) in self.engines.iter_mut().enumerate() {
            if r as Rank != rank {
                engine.handle_peer_lost(rank);
            }
        }
        self.collect();
    }

    /// Messages `rank` sent under `tag`.
    pub fn sent(&self, rank: Rank, tag: Tag) -> usize {
        self.sends.get(&(rank, tag)).copied().unwrap_or(0)
    }

    pub fn total_sent(&self) -> usize {
        self.sends.values().sum()
    }

    /// Deliveries made to `rank` so far.
    pub fn delivered(&self, rank: Rank) -> &[Delivery] {
        &self.delivered[rank as usize]
    }

    /// Every live engine has dropped its trackers.
    pub fn assert_idle(&self) {
        for (r, engine) in self.engines.iter().enumerate() {
            if !self.dead.contains(&(r as Rank)) {
                assert_eq!(engine.active_trackers(), 0, "rank {r} still tracks a collective");
            }
        }
    }
}

/// Records every invocation of a completion callback.
#[derive(Clone, Default)]
pub struct Outcome(Arc<Mutex<Vec<Result<Bucket>>>>);

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> CompletionFn {
        let calls = Arc::clone(&self.0);
        Box::new(move |_, result| calls.lock().unwrap().push(result))
    }

    pub fn calls(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// The single result, panicking if the callback fired zero or many times.
    pub fn take(&self) -> Result<Bucket> {
        let mut calls = self.0.lock().unwrap();
        assert_eq!(calls.len(), 1, "completion must fire exactly once");
        calls.pop().unwrap()
    }
}

/// Payload contributed by `rank` in the allgather tests.
pub fn payload_of(rank: Rank) -> Vec<u8> {
    format!("rank-{rank}").into_bytes()
}

/// Run one allgather over the whole group and return every member's outcome.
pub fn allgather_all(sim: &mut Sim) -> Vec<Outcome> {
    let outcomes: Vec<Outcome> = (0..sim.size()).map(|_| Outcome::new()).collect();
    for (rank, outcome) in outcomes.iter().enumerate() {
        let rank = rank as Rank;
        sim.engines[rank as usize].allgather(&[], payload_of(rank), outcome.callback());
    }
    sim.run();
    outcomes
}

/// Assert `bucket` holds exactly one payload per rank in `ranks`, in order.
pub fn assert_gathered(bucket: &Bucket, ranks: &[Rank]) {
    assert_eq!(bucket.ranks(), ranks);
    for &r in ranks {
        assert_eq!(bucket.payload(r), Some(payload_of(r).as_slice()), "payload of rank {r}");
    }
}

/// Config with short timers for runtime tests.
pub fn fast_config() -> OverlayConfig {
    OverlayConfig {
        collective_timeout: std::time::Duration::from_secs(5),
        sweep_interval: std::time::Duration::from_millis(50),
        ..OverlayConfig::default()
    }
}

/// Run `f` on every member of a local group concurrently.
/// Keeps all members alive until every task completes.
pub async fn run_group<F, Fut>(size: u32, config: OverlayConfig, f: F)
where
    F: Fn(Arc<OverlayGroup>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let members = OverlayGroup::bootstrap_local(GROUP, size, config).unwrap();
    let members: Vec<Arc<OverlayGroup>> = members.into_iter().map(Arc::new).collect();

    let f = Arc::new(f);
    let mut handles = Vec::new();
    for m in &members {
        let m = Arc::clone(m);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move { f(m).await }));
    }
    for h in handles {
        h.await.unwrap();
    }
    for m in &members {
        m.close().await.unwrap();
    }
}
