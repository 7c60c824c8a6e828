//! Throttled, single-flight population sampler.

use crate::sim::{PendingReadback, ReadbackPoll, StatsSnapshot};

struct InFlight<R> {
    readback: R,
    generation: u64,
    cell_count: u64,
}

/// What became of an in-flight readback on this poll.
pub enum SampleOutcome {
    Idle,
    Pending,
    Published(StatsSnapshot),
    /// The async path failed; the caller may retry with a blocking read.
    Failed { generation: u64, error: anyhow::Error },
}

pub struct StatsSampler<R> {
    interval_ms: f64,
    last_begin_ms: Option<f64>,
    in_flight: Option<InFlight<R>>,
    force_next: bool,
}

impl<R: PendingReadback> StatsSampler<R> {
    pub fn new(interval_ms: f64) -> Self {
        Self {
            interval_ms,
            last_begin_ms: None,
            in_flight: None,
            force_next: false,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True when a new cycle may start at `now_ms`.
    pub fn is_due(&self, now_ms: f64) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.force_next
            || self
                .last_begin_ms
                .is_none_or(|last| now_ms - last >= self.interval_ms)
    }

    pub fn begin(&mut self, now_ms: f64, readback: R, generation: u64, cell_count: u64) {
        debug_assert!(self.in_flight.is_none(), "stats readback already in flight");
        self.in_flight = Some(InFlight {
            readback,
            generation,
            cell_count,
        });
        self.last_begin_ms = Some(now_ms);
        self.force_next = false;
    }

    pub fn poll(&mut self) -> SampleOutcome {
        let Some(flight) = self.in_flight.as_mut() else {
            return SampleOutcome::Idle;
        };
        match flight.readback.poll() {
            ReadbackPoll::Pending => SampleOutcome::Pending,
            ReadbackPoll::Ready(cells) => {
                let generation = flight.generation;
                let expected = flight.cell_count;
                self.in_flight = None;
                if cells.len() as u64 != expected {
                    log::warn!(
                        "stats readback returned {} cells, expected {expected}; dropped",
                        cells.len()
                    );
                    return SampleOutcome::Idle;
                }
                SampleOutcome::Published(StatsSnapshot::count(generation, &cells))
            }
            ReadbackPoll::Failed(error) => {
                let generation = flight.generation;
                self.in_flight = None;
                SampleOutcome::Failed { generation, error }
            }
        }
    }

    /// Drop any in-flight readback so its result is never published.
    pub fn invalidate(&mut self) {
        if self.in_flight.take().is_some() {
            log::debug!("in-flight stats readback invalidated");
        }
    }

    /// Sample on the next opportunity regardless of the throttle.
    pub fn request_immediate(&mut self) {
        self.force_next = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Vec<ReadbackPoll>);

    impl PendingReadback for Scripted {
        fn poll(&mut self) -> ReadbackPoll {
            if self.0.is_empty() {
                ReadbackPoll::Pending
            } else {
                self.0.remove(0)
            }
        }
    }

    fn ready(cells: &[f32]) -> Scripted {
        Scripted(vec![ReadbackPoll::Ready(cells.to_vec())])
    }

    #[test]
    fn throttles_by_interval() {
        let mut sampler = StatsSampler::<Scripted>::new(1000.0);
        assert!(sampler.is_due(0.0));
        sampler.begin(0.0, ready(&[1.0, 0.0]), 0, 2);
        assert!(matches!(sampler.poll(), SampleOutcome::Published(_)));
        assert!(!sampler.is_due(999.0));
        assert!(sampler.is_due(1000.0));
    }

    #[test]
    fn single_flight_blocks_new_cycles() {
        let mut sampler = StatsSampler::new(10.0);
        sampler.begin(0.0, Scripted(Vec::new()), 0, 1);
        assert!(!sampler.is_due(500.0));
        assert!(matches!(sampler.poll(), SampleOutcome::Pending));
        sampler.request_immediate();
        assert!(!sampler.is_due(500.0));
    }

    #[test]
    fn invalidated_results_are_never_published() {
        let mut sampler = StatsSampler::new(10.0);
        sampler.begin(0.0, ready(&[1.0]), 4, 1);
        sampler.invalidate();
        assert!(matches!(sampler.poll(), SampleOutcome::Idle));
        assert!(!sampler.in_flight());
    }

    #[test]
    fn snapshot_carries_generation_at_begin() {
        let mut sampler = StatsSampler::new(10.0);
        sampler.begin(0.0, ready(&[1.0, 1.0, 0.0]), 9, 3);
        match sampler.poll() {
            SampleOutcome::Published(s) => {
                assert_eq!(s.generation, 9);
                assert_eq!(s.alive_count, 2);
                assert_eq!(s.dead_count, 1);
            }
            _ => panic!("expected a published snapshot"),
        }
    }

    #[test]
    fn mismatched_sizes_are_dropped() {
        let mut sampler = StatsSampler::new(10.0);
        sampler.begin(0.0, ready(&[1.0, 1.0]), 0, 3);
        assert!(matches!(sampler.poll(), SampleOutcome::Idle));
    }

    #[test]
    fn failures_surface_generation_for_fallback() {
        let mut sampler = StatsSampler::new(10.0);
        sampler.begin(
            0.0,
            Scripted(vec![ReadbackPoll::Failed(anyhow::anyhow!("device lost"))]),
            5,
            1,
        );
        assert!(matches!(
            sampler.poll(),
            SampleOutcome::Failed { generation: 5, .. }
        ));
        assert!(!sampler.in_flight());
        assert!(sampler.is_due(10.0));
    }
}
