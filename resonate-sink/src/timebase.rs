//! Host-clock conversion. Some platform audio APIs (CoreAudio's host time
//! among them) schedule deadlines in native ticks, not nanoseconds — a
//! `local_monotonic_µs → host_native_ticks` conversion through the
//! platform's timebase ratio is required before such a sink can be handed
//! a deadline.
//!
//! `cpal` output streams are not deadline-aware (they pull samples at
//! their own callback cadence), so [`CpalAudioSink`](crate::CpalAudioSink)
//! does not consume this trait today — ticks arrive at Scheduler cadence
//! and the device's own small FIFO smooths jitter, exactly the fallback
//! the module above describes. The trait exists so a future deadline-aware sink
//! backend has a ready seam, and so the ratio arithmetic is tested in
//! isolation from any particular backend.

use resonate_proto::LocalMicros;

pub trait Timebase: Send + Sync {
    fn local_to_host_ticks(&self, local: LocalMicros) -> u64;
}

/// A `numer/denom` tick ratio, in the shape of a mach `timebase_info`:
/// `host_ticks = nanoseconds * denom / numer`.
#[derive(Debug, Clone, Copy)]
pub struct RatioTimebase {
    numer: u32,
    denom: u32,
}

impl RatioTimebase {
    pub fn new(numer: u32, denom: u32) -> Self {
        assert!(numer > 0, "timebase numerator must be nonzero");
        Self { numer, denom }
    }

    /// 1:1 ratio — ticks equal nanoseconds. Correct wherever the sink's
    /// native clock already counts nanoseconds; a placeholder elsewhere
    /// until that platform's real ratio is wired in.
    pub fn identity() -> Self {
        Self { numer: 1, denom: 1 }
    }
}

impl Timebase for RatioTimebase {
    fn local_to_host_ticks(&self, local: LocalMicros) -> u64 {
        let nanos = local.get() as i128 * 1_000;
        let ticks = nanos * self.denom as i128 / self.numer as i128;
        ticks.max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ratio_converts_micros_to_nanos() {
        let tb = RatioTimebase::identity();
        assert_eq!(tb.local_to_host_ticks(LocalMicros::new(1_000)), 1_000_000);
    }

    #[test]
    fn non_unity_ratio_scales_correctly() {
        // e.g. a 1/2 mach ratio: ticks = nanos * 2 / 1
        let tb = RatioTimebase::new(1, 2);
        assert_eq!(tb.local_to_host_ticks(LocalMicros::new(1)), 2_000);
    }

    #[test]
    fn negative_local_time_clamps_to_zero() {
        let tb = RatioTimebase::identity();
        assert_eq!(tb.local_to_host_ticks(LocalMicros::new(-5)), 0);
    }
}
