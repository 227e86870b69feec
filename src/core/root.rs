//! Root: the top of a network tree and its clock.
//!
//! A cycle is one fanout sweep over the whole token range followed by one
//! `update()` (buffer swap). The sweep is split into contiguous sub-ranges,
//! one per worker, and every worker joins before the swap.

use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::{Duration, Instant};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::Serialize;
use tracing::{debug, error, info};

use crate::buffer::ValueView;
use crate::config::{ExecutionTier, NetConfig};
use crate::error::{NetError, NetResult};
use crate::fixed::{Count, Rc, Token};
use crate::network::{Net, NetId, Network};

/// Split `[origin, origin + length)` into `threads` contiguous ranges.
///
/// The split is by token count; the remainder goes one token each to the
/// first ranges.
pub fn partition(origin: Token, length: Count, threads: usize) -> NetResult<Vec<Range<Token>>> {
    if threads == 0 {
        return Err(NetError::ShouldNotOccur("partition into zero workers"));
    }
    if threads > length {
        return Err(NetError::ShouldNotOccur("more workers than tokens"));
    }
    let chunk = length / threads;
    let extra = length % threads;
    let mut start = origin;
    let mut ranges = Vec::with_capacity(threads);
    for i in 0..threads {
        let len = chunk + usize::from(i < extra);
        ranges.push(start..start + len);
        start += len;
    }
    Ok(ranges)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// One worker thread bound to a sub-range for a single sweep.
pub struct Worker<'scope> {
    index: usize,
    range: Range<Token>,
    handle: ScopedJoinHandle<'scope, NetResult<Rc>>,
}

impl<'scope> Worker<'scope> {
    pub fn start<'env>(
        scope: &'scope Scope<'scope, 'env>,
        net: &'env Net,
        index: usize,
        range: Range<Token>,
    ) -> NetResult<Self> {
        let top = net.top();
        let (origin, count) = (range.start, range.end - range.start);
        let handle = thread::Builder::new()
            .name(format!("pulsenet-worker-{index}"))
            .spawn_scoped(scope, move || net.fanout(top, origin, count))?;
        Ok(Self {
            index,
            range,
            handle,
        })
    }

    pub fn range(&self) -> Range<Token> {
        self.range.clone()
    }

    /// Block until the sweep returns. Failures and panics are reported with
    /// the worker's index.
    pub fn join(self) -> NetResult<Rc> {
        match self.handle.join() {
            Ok(Ok(rc)) => Ok(rc),
            Ok(Err(e)) => Err(NetError::worker(self.index, e)),
            Err(payload) => Err(NetError::WorkerPanic {
                worker: self.index,
                message: panic_message(&*payload),
            }),
        }
    }
}

/// Outcome of one clock cycle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CycleReport {
    /// Cycles completed, including this one.
    pub cycle: u64,
    /// Fanin acknowledgments summed over every worker.
    pub fanins: Rc,
    pub workers: usize,
    pub tier: ExecutionTier,
    pub elapsed: Duration,
}

/// Owner of a network tree and driver of its clock.
#[derive(Debug)]
pub struct Root {
    net: Net,
    cfg: NetConfig,
    cycle: u64,
    settled: bool,
}

impl Root {
    pub fn new(cfg: NetConfig) -> NetResult<Self> {
        cfg.validate()?;
        info!(
            threads = cfg.threads,
            tier = ?cfg.tier.effective(),
            seed = cfg.seed_or_default(),
            "root created"
        );
        Ok(Self {
            net: Net::new(&cfg),
            cfg,
            cycle: 0,
            settled: false,
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.cfg
    }

    pub fn net(&self) -> &Net {
        &self.net
    }

    pub fn top(&self) -> NetId {
        self.net.top()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn set_tier(&mut self, tier: ExecutionTier) {
        self.cfg.tier = tier;
    }

    pub fn set_threads(&mut self, threads: usize) -> NetResult<()> {
        if threads == 0 {
            return Err(NetError::Config("threads must be at least 1".into()));
        }
        self.cfg.threads = threads;
        Ok(())
    }

    pub fn set_verbose(&self, verbose: u8) {
        self.net.context().set_verbose(verbose);
    }

    pub fn insert_layer(&mut self, parent: NetId, network: Network) -> NetResult<NetId> {
        self.net.insert_layer(parent, network)
    }

    pub fn build(&mut self, origin: Token) -> NetResult<Count> {
        let top = self.net.top();
        let length = self.net.build(top, origin)?;
        info!(origin, length, nodes = self.net.node_count(), "built");
        Ok(length)
    }

    pub fn build_update(&mut self, pass: u32) -> NetResult<bool> {
        let top = self.net.top();
        self.net.build_update(top, pass)
    }

    /// Run settle passes until none asks for another; returns the pass count.
    pub fn settle(&mut self) -> NetResult<u32> {
        if !self.net.base(self.net.top())?.is_built() {
            return Err(NetError::ShouldNotOccur("settle before build"));
        }
        let mut pass = 0;
        loop {
            if pass >= self.cfg.max_build_passes {
                return Err(NetError::ShouldNotOccur(
                    "build_update did not reach a fixed point",
                ));
            }
            let again = self.build_update(pass)?;
            pass += 1;
            if !again {
                break;
            }
        }
        self.settled = true;
        debug!(passes = pass, "settled");
        Ok(pass)
    }

    /// The leaf owning `token`; no owner exists above the Root.
    pub fn locate(&self, token: Token) -> NetResult<NetId> {
        self.net.locate(self.net.top(), token)
    }

    pub fn build_locate(&self, token: Token) -> NetResult<NetId> {
        self.net.build_locate(self.net.top(), token)
    }

    pub fn fanout(&self, token: Token, count: Count) -> NetResult<Rc> {
        self.net.fanout(self.net.top(), token, count)
    }

    pub fn to_values(&self, id: NetId) -> NetResult<ValueView<'_>> {
        self.net.to_values(id)
    }

    /// Run one clock cycle: sweep, join, then swap.
    ///
    /// Every worker is joined and the buffers swap even when a sweep fails;
    /// the failure only drops that worker's share of the cycle. The first
    /// failure is returned after the swap.
    pub fn update(&mut self) -> NetResult<CycleReport> {
        if !self.settled {
            return Err(NetError::ShouldNotOccur("update before settle"));
        }
        let started = Instant::now();
        let top = self.net.top();
        let base = *self.net.base(top)?;
        let tier = self.cfg.tier.effective();

        let (swept, workers) = match tier {
            ExecutionTier::Single => (self.net.fanout(top, base.origin(), base.length()), 1),
            ExecutionTier::Threaded | ExecutionTier::Parallel => {
                let threads = self.cfg.threads.min(base.length()).max(1);
                let parts = if base.length() == 0 {
                    vec![base.origin()..base.origin()]
                } else {
                    partition(base.origin(), base.length(), threads)?
                };
                let outcomes = if tier == ExecutionTier::Parallel {
                    self.sweep_parallel(&parts)
                } else {
                    self.sweep_threaded(&parts)
                };
                (collect_outcomes(outcomes), parts.len())
            }
        };

        self.net.update(top)?;
        self.cycle += 1;
        let fanins = swept?;
        let report = CycleReport {
            cycle: self.cycle,
            fanins,
            workers,
            tier,
            elapsed: started.elapsed(),
        };
        debug!(
            cycle = report.cycle,
            fanins = report.fanins,
            workers = report.workers,
            "cycle complete"
        );
        Ok(report)
    }

    /// Run `cycles` clock cycles, stopping at the first failure.
    pub fn run(&mut self, cycles: u64) -> NetResult<Vec<CycleReport>> {
        (0..cycles).map(|_| self.update()).collect()
    }

    fn sweep_threaded(&self, parts: &[Range<Token>]) -> Vec<NetResult<Rc>> {
        let net = &self.net;
        thread::scope(|scope| {
            let started: Vec<NetResult<Worker<'_>>> = parts
                .iter()
                .cloned()
                .enumerate()
                .map(|(i, range)| Worker::start(scope, net, i, range))
                .collect();
            started
                .into_iter()
                .map(|worker| worker.and_then(Worker::join))
                .collect()
        })
    }

    #[cfg(feature = "parallel")]
    fn sweep_parallel(&self, parts: &[Range<Token>]) -> Vec<NetResult<Rc>> {
        let net = &self.net;
        let top = net.top();
        parts
            .par_iter()
            .enumerate()
            .map(|(i, range)| {
                guarded(i, || net.fanout(top, range.start, range.end - range.start))
            })
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn sweep_parallel(&self, parts: &[Range<Token>]) -> Vec<NetResult<Rc>> {
        self.sweep_threaded(parts)
    }
}

/// Run one worker's sweep on the current thread, turning its failure or
/// panic into the same errors `Worker::join` reports.
#[cfg_attr(not(feature = "parallel"), allow(dead_code))]
fn guarded(worker: usize, sweep: impl FnOnce() -> NetResult<Rc>) -> NetResult<Rc> {
    match panic::catch_unwind(AssertUnwindSafe(sweep)) {
        Ok(Ok(rc)) => Ok(rc),
        Ok(Err(e)) => Err(NetError::worker(worker, e)),
        Err(payload) => Err(NetError::WorkerPanic {
            worker,
            message: panic_message(&*payload),
        }),
    }
}

/// Sum worker acknowledgments, logging every failure and returning the first.
fn collect_outcomes(outcomes: Vec<NetResult<Rc>>) -> NetResult<Rc> {
    let mut fanins = 0;
    let mut first = None;
    for outcome in outcomes {
        match outcome {
            Ok(rc) => fanins += rc,
            Err(e) => {
                error!("{e}");
                first.get_or_insert(e);
            }
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(fanins),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::{Pulse, UNIT};
    use crate::middle::FanoutBundle;

    #[test]
    fn partition_covers_range() {
        let parts = partition(10, 10, 3).unwrap();
        assert_eq!(parts, vec![10..14, 14..17, 17..20]);
        assert_eq!(partition(0, 4, 4).unwrap().len(), 4);
        assert!(partition(0, 2, 3).is_err());
        assert!(partition(0, 2, 0).is_err());
    }

    #[test]
    fn update_requires_settle() {
        let mut root = Root::new(NetConfig::default()).unwrap();
        let top = root.top();
        root.insert_layer(top, Network::leaf(4)).unwrap();
        assert!(root.settle().is_err());
        root.build(0).unwrap();
        assert!(root.update().is_err());
        assert_eq!(root.settle().unwrap(), 1);
        assert_eq!(root.update().unwrap().cycle, 1);
    }

    #[test]
    fn root_lookup_fails_outside_the_tree() {
        let mut root = Root::new(NetConfig::default()).unwrap();
        let top = root.top();
        let a = root.insert_layer(top, Network::leaf(4)).unwrap();
        let b = root.insert_layer(top, Network::leaf(4)).unwrap();
        root.build(0).unwrap();
        assert_eq!(root.locate(5).unwrap(), b);
        assert_eq!(root.build_locate(0).unwrap(), a);
        assert!(matches!(root.locate(8), Err(NetError::Lookup { token: 8 })));
        assert!(matches!(root.build_locate(99), Err(NetError::Lookup { .. })));
    }

    fn buffered(tier: ExecutionTier, threads: usize) -> (Root, NetId) {
        let cfg = NetConfig::default().with_tier(tier).with_threads(threads);
        let mut root = Root::new(cfg).unwrap();
        let top = root.top();
        let m = root.insert_layer(top, Network::middle("m")).unwrap();
        let out = root.insert_layer(m, Network::out_buffer(16)).unwrap();
        root.build(0).unwrap();
        root.settle().unwrap();
        (root, out)
    }

    #[test]
    fn every_tier_swaps_once_per_cycle() {
        for tier in [ExecutionTier::Single, ExecutionTier::Threaded, ExecutionTier::Parallel] {
            let (mut root, out) = buffered(tier, 3);
            root.net().fanin(out, 4, 12).unwrap();
            let report = root.update().unwrap();
            assert_eq!(report.cycle, 1);
            assert_eq!(report.fanins, 0);
            assert_eq!(root.to_values(out).unwrap().get(4), Some(12));

            let report = root.update().unwrap();
            assert_eq!(report.cycle, 2);
            assert!(root.to_values(out).unwrap().iter().all(|v| v == 0));
        }
    }

    #[test]
    fn threads_are_capped_by_tokens() {
        let (mut root, _) = buffered(ExecutionTier::Threaded, 64);
        assert_eq!(root.update().unwrap().workers, 16);
    }

    fn single_edge(index: u32) -> FanoutBundle {
        let mut bundle = FanoutBundle::default();
        bundle.set_edge(0, index, UNIT).unwrap();
        bundle
    }

    #[test]
    fn worker_failure_is_reported_and_still_swaps() {
        // m -> [Fanout a(8), Fanout b(8), OutBuffer(8)], one worker each.
        let mut root = Root::new(NetConfig::default().with_threads(3)).unwrap();
        let top = root.top();
        let m = root.insert_layer(top, Network::middle("m")).unwrap();
        let a = root.insert_layer(m, Network::fanout(8)).unwrap();
        let b = root.insert_layer(m, Network::fanout(8)).unwrap();
        let out = root.insert_layer(m, Network::out_buffer(8)).unwrap();
        root.build(0).unwrap();
        root.settle().unwrap();

        // a[0] points far past b; b[8] feeds out[16].
        let bundles = root.net.storage_mut(m).unwrap().bundles_mut();
        bundles.fill(FanoutBundle::default());
        bundles[0] = single_edge(1000);
        bundles[8] = single_edge(0);

        root.net().fanin(a, 0, 50 as Pulse).unwrap();
        root.net().fanin(b, 8, 30 as Pulse).unwrap();
        root.update().unwrap();

        let clock = root.net().clock();
        let err = root.update().unwrap_err();
        assert!(
            matches!(
                &err,
                NetError::Worker { worker: 0, source } if matches!(**source, NetError::Lookup { token: 1008 })
            ),
            "{err}"
        );
        assert_eq!(root.cycle(), 2);
        assert_eq!(root.net().clock(), clock + 1);
        assert_eq!(root.to_values(out).unwrap().get(0), Some(30));

        // The failed cycle consumed its inputs; nothing is pushed twice.
        root.net.storage_mut(m).unwrap().bundles_mut()[0] = single_edge(0);
        root.update().unwrap();
        assert!(root.to_values(out).unwrap().iter().all(|v| v == 0));
        assert_eq!(root.to_values(a).unwrap().get(0), Some(0));
    }

    #[test]
    fn guarded_sweep_reports_errors_and_panics() {
        assert_eq!(guarded(0, || Ok(7)).unwrap(), 7);

        let err = guarded(1, || Err(NetError::ShouldNotOccur("x"))).unwrap_err();
        assert!(matches!(err, NetError::Worker { worker: 1, .. }), "{err}");

        let err = guarded(2, || panic!("sweep blew up")).unwrap_err();
        match err {
            NetError::WorkerPanic { worker, message } => {
                assert_eq!(worker, 2);
                assert_eq!(message, "sweep blew up");
            }
            other => panic!("unexpected {other}"),
        }
    }
}
