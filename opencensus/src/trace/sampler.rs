use std::fmt;

use crate::trace::TraceId;

/// Policy deciding whether a trace is recorded.
///
/// Implementations receive the trace id and the inherited parent decision and
/// return a boolean vote. The tracer consults the sampler exactly once when a
/// trace enters the process; the resulting decision is stable for the
/// lifetime of the trace here.
///
/// Note that a sampled parent delivered by inbound propagation forces the
/// trace on before the sampler is asked, so a child process never punches a
/// hole in a trace its parent is recording.
pub trait ShouldSample: Send + Sync + fmt::Debug {
    /// Returns `true` iff a trace with this id should be recorded.
    fn should_sample(&self, trace_id: TraceId, parent_sampled: bool) -> bool;
}

/// Built-in sampling strategies.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Sampler {
    /// Sample every trace.
    AlwaysOn,
    /// Never sample.
    AlwaysOff,
    /// Sample a given fraction of traces, decided deterministically from the
    /// low 64 bits of the trace id so that processes sharing a rate agree on
    /// the same traces. Rates outside `[0, 1]` are clamped.
    Probability(f64),
}

impl Default for Sampler {
    fn default() -> Self {
        // The conventional default rate: one trace in ten thousand.
        Sampler::Probability(1e-4)
    }
}

impl ShouldSample for Sampler {
    fn should_sample(&self, trace_id: TraceId, parent_sampled: bool) -> bool {
        match self {
            Sampler::AlwaysOn => true,
            Sampler::AlwaysOff => false,
            Sampler::Probability(rate) => {
                if parent_sampled {
                    return true;
                }
                sample_based_on_rate(*rate, trace_id)
            }
        }
    }
}

fn sample_based_on_rate(rate: f64, trace_id: TraceId) -> bool {
    if rate >= 1.0 {
        return true;
    }
    if rate <= 0.0 {
        return false;
    }
    // The bound is rate scaled to the full 64-bit space, rounded up so that
    // a trace id sitting exactly on the truncated product is still inside the
    // sampled fraction.
    let bound = (rate * (u64::MAX as f64 + 1.0)).ceil() as u64;
    trace_id.low_u64() < bound
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(hex: &str) -> TraceId {
        TraceId::from_hex(hex).unwrap()
    }

    #[test]
    fn always_on_samples_everything() {
        for hex in [
            "00000000000000000000000000000001",
            "ffffffffffffffffffffffffffffffff",
            "12345678901234567890123456789012",
        ] {
            assert!(Sampler::AlwaysOn.should_sample(id(hex), false));
            assert!(!Sampler::AlwaysOff.should_sample(id(hex), false));
        }
    }

    #[test]
    fn probability_extremes() {
        for hex in [
            "00000000000000000000000000000001",
            "ffffffffffffffffffffffffffffffff",
        ] {
            assert!(Sampler::Probability(1.0).should_sample(id(hex), false));
            assert!(!Sampler::Probability(0.0).should_sample(id(hex), false));
        }
    }

    #[test]
    fn probability_clamps_out_of_range_rates() {
        let tid = id("ffffffffffffffffffffffffffffffff");
        assert!(Sampler::Probability(2.5).should_sample(tid, false));
        assert!(!Sampler::Probability(-0.5).should_sample(tid, false));
    }

    #[test]
    fn probability_boundary_is_deterministic() {
        // The default 1e-4 rate scales to a bound between these two adjacent
        // trace ids; they are the canonical boundary cases.
        let inside = id("000000000000000000068db8bac710cb");
        let outside = id("000000000000000000068db8bac710cc");
        let sampler = Sampler::default();
        assert!(sampler.should_sample(inside, false));
        assert!(!sampler.should_sample(outside, false));
        // The decision is a pure function of (rate, trace_id).
        assert!(sampler.should_sample(inside, false));
        assert!(!sampler.should_sample(outside, false));
    }

    #[test]
    fn sampled_parent_wins_over_rate() {
        let outside = id("000000000000000000068db8bac710cc");
        assert!(Sampler::Probability(1e-4).should_sample(outside, true));
    }
}
