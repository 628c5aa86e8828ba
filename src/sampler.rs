//! Trace sampling.
//!
//! The sampling decision is made once per trace, at local root creation, and
//! inherited by every descendant. Built-in samplers are deterministic
//! functions of the trace id, so concurrently created spans of one trace
//! always agree without sharing any mutable state.

/// Sampling priorities understood by the collector agent. Positive values
/// keep the trace.
pub mod priority {
    /// The user explicitly rejected the trace.
    pub const USER_REJECT: i32 = -1;
    /// The sampler rejected the trace.
    pub const AUTO_REJECT: i32 = 0;
    /// The sampler kept the trace.
    pub const AUTO_KEEP: i32 = 1;
    /// The user explicitly kept the trace.
    pub const USER_KEEP: i32 = 2;
}

/// The verdict returned by a sampler for a new trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplingResult {
    /// Whether spans of the trace are retained at full fidelity.
    pub sampled: bool,
    /// The priority attached to the trace, consulted downstream.
    pub priority: i32,
}

/// Decides, per new trace, whether it is kept and with what priority.
///
/// Implementations must be deterministic in the trace id: the same id must
/// always yield the same result, or spans of one trace could disagree.
pub trait ShouldSample: Send + Sync + std::fmt::Debug {
    /// Returns the sampling verdict for a trace.
    fn should_sample(&self, trace_id: u64) -> SamplingResult;
}

/// Built-in samplers.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Sampler {
    /// Keep every trace.
    AlwaysOn,
    /// Keep no trace.
    AlwaysOff,
    /// Keep the given fraction of traces, decided deterministically from the
    /// trace id. Fractions >= 1 keep everything, fractions <= 0 nothing.
    TraceIdRatioBased(f64),
}

impl ShouldSample for Sampler {
    fn should_sample(&self, trace_id: u64) -> SamplingResult {
        let sampled = match self {
            Sampler::AlwaysOn => true,
            Sampler::AlwaysOff => false,
            Sampler::TraceIdRatioBased(rate) => sample_based_on_rate(*rate, trace_id),
        };
        SamplingResult {
            sampled,
            priority: if sampled {
                priority::AUTO_KEEP
            } else {
                priority::AUTO_REJECT
            },
        }
    }
}

fn sample_based_on_rate(rate: f64, trace_id: u64) -> bool {
    if rate >= 1.0 {
        return true;
    }
    let upper_bound = (rate.max(0.0) * (1u64 << 63) as f64) as u64;
    (trace_id >> 1) < upper_bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn rate_bounds() {
        let keep_all = Sampler::TraceIdRatioBased(1.0);
        let keep_none = Sampler::TraceIdRatioBased(0.0);
        let mut rng = rand::thread_rng();
        for _ in 0..256 {
            let id: u64 = rng.gen();
            assert!(keep_all.should_sample(id).sampled);
            assert!(!keep_none.should_sample(id).sampled);
        }
    }

    #[test]
    fn negative_rate_is_treated_as_zero() {
        assert!(!Sampler::TraceIdRatioBased(-0.5).should_sample(42).sampled);
    }

    #[test]
    fn decision_is_deterministic_per_trace_id() {
        let sampler = Sampler::TraceIdRatioBased(0.5);
        let mut rng = rand::thread_rng();
        for _ in 0..256 {
            let id: u64 = rng.gen();
            let first = sampler.should_sample(id);
            for _ in 0..8 {
                assert_eq!(sampler.should_sample(id), first);
            }
        }
    }

    #[test]
    fn verdicts_carry_agent_priorities() {
        assert_eq!(
            Sampler::AlwaysOn.should_sample(7),
            SamplingResult {
                sampled: true,
                priority: priority::AUTO_KEEP
            }
        );
        assert_eq!(
            Sampler::AlwaysOff.should_sample(7),
            SamplingResult {
                sampled: false,
                priority: priority::AUTO_REJECT
            }
        );
    }

    #[test]
    fn half_rate_keeps_roughly_half() {
        let sampler = Sampler::TraceIdRatioBased(0.5);
        let mut rng = rand::thread_rng();
        let kept = (0..4096)
            .filter(|_| sampler.should_sample(rng.gen()).sampled)
            .count();
        // Loose bound; 4096 coin flips stay well inside it.
        assert!((1024..=3072).contains(&kept), "kept {kept} of 4096");
    }
}
