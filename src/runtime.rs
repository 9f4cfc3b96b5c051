use core::sync::atomic::{AtomicU64, Ordering};

use minstant::Instant;

/// Relaxed event counter padded out to its own cache line, so the reactor
/// hot loop and whoever reads the stats never share one.
#[repr(C, align(64))]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub const fn zero() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn inc(&self) {
        self.add(1);
    }

    #[inline(always)]
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-reactor counters covering each station a frame offset moves through.
pub struct ReactorStats {
    /// Frames dequeued from the rx ring.
    pub rx_frames: Counter,
    /// Response frames published on the tx ring.
    pub tx_frames: Counter,
    /// Frame offsets drained from the completion ring.
    pub completions: Counter,
    /// Handler invocations that returned an error.
    pub handler_errors: Counter,
    /// Rx frame offsets handed back to the fill ring.
    pub fill_recycled: Counter,
}

impl ReactorStats {
    pub const fn new() -> Self {
        Self {
            rx_frames: Counter::zero(),
            tx_frames: Counter::zero(),
            completions: Counter::zero(),
            handler_errors: Counter::zero(),
            fill_recycled: Counter::zero(),
        }
    }

    /// Point-in-time copy for logging. Counters are relaxed, so the fields
    /// are individually exact but not mutually synchronized.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_frames: self.rx_frames.get(),
            tx_frames: self.tx_frames.get(),
            completions: self.completions.get(),
            handler_errors: self.handler_errors.get(),
            fill_recycled: self.fill_recycled.get(),
        }
    }
}

impl Default for ReactorStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub completions: u64,
    pub handler_errors: u64,
    pub fill_recycled: u64,
}

/// One sampled handler latency, TSC-backed through `minstant`.
#[derive(Clone, Copy, Debug)]
pub struct LatencySample {
    pub nanos: u64,
}

/// Decimated latency sampling. Timing every frame costs two clock reads per
/// packet in the hot loop, so the probe arms a stopwatch only once per
/// `interval` calls (rounded up to a power of two for a mask test).
pub struct LatencyProbe {
    mask: u64,
    calls: u64,
}

impl LatencyProbe {
    pub fn new(interval: u64) -> Self {
        Self {
            mask: interval.max(1).next_power_of_two() - 1,
            calls: 0,
        }
    }

    /// A stopwatch on the sampled calls, `None` on the rest.
    #[inline(always)]
    pub fn start_sample(&mut self) -> Option<LatencyClock> {
        let sampled = self.calls & self.mask == 0;
        self.calls = self.calls.wrapping_add(1);
        sampled.then(LatencyClock::start)
    }
}

pub struct LatencyClock {
    started: Instant,
}

impl LatencyClock {
    #[inline(always)]
    fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    #[inline(always)]
    pub fn stop(self) -> LatencySample {
        LatencySample {
            nanos: self.started.elapsed().as_nanos() as u64,
        }
    }
}
