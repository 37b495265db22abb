//! Clock Sync: estimates the server-clock offset and drift relative to the
//! local monotonic clock from NTP-style four-timestamp exchanges.
//!
//! A single-state offset estimator oscillates under
//! sustained clock skew; tracking drift lets us extrapolate correctly
//! between syncs (sent every 5 seconds) — median filtering cannot project
//! forward the way a drift-aware model can.

use resonate_proto::{LocalMicros, ServerMicros};

/// Fixed Kalman-style gain applied to the residual on every update from
/// the third sample onward.
const GAIN: f64 = 0.1;

/// Samples with `rtt` above this are rejected outright.
const MAX_ACCEPTED_RTT_US: i64 = 100_000;

/// Samples whose raw offset strays more than this from the model's
/// prediction are rejected as outliers.
const MAX_OFFSET_RESIDUAL_US: f64 = 50_000.0;

const GOOD_RTT_US: i64 = 50_000;
const LOST_AFTER_US: i64 = 5_000_000;

/// `|drift| >= 1e-3` (1000 ppm) is outside any crystal oscillator's real
/// tolerance and indicates a bad sample rather than true skew.
const MAX_ABS_DRIFT: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncQuality {
    Good,
    Degraded,
    Lost,
}

/// Point-in-time snapshot returned by [`ClockSync::stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockStats {
    pub offset_us: i64,
    pub rtt_us: i64,
    pub quality: SyncQuality,
    pub sample_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct ClockModel {
    offset_us: f64,
    drift: f64,
    last_update_local: LocalMicros,
    rtt_us: i64,
    sample_count: u64,
}

/// Tracks the running offset/drift estimate between the server's
/// monotonic clock and this client's local monotonic clock.
#[derive(Debug, Clone)]
pub struct ClockSync {
    model: Option<ClockModel>,
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSync {
    pub fn new() -> Self {
        Self { model: None }
    }

    /// Clears all state, as if newly constructed.
    pub fn reset(&mut self) {
        self.model = None;
    }

    /// Ingests one four-point NTP-style exchange.
    ///
    /// `t1` = client send (local), `t2` = server receive (server), `t3` =
    /// server send (server), `t4` = client receive (local). Returns `true`
    /// if the sample was accepted.
    pub fn process_sample(
        &mut self,
        t1: LocalMicros,
        t2: ServerMicros,
        t3: ServerMicros,
        t4: LocalMicros,
    ) -> bool {
        let rtt = (t4 - t1) - (t3 - t2);
        let raw_offset = ((t2.get() - t1.get()) + (t3.get() - t4.get())) as f64 / 2.0;

        if rtt < 0 || rtt > MAX_ACCEPTED_RTT_US {
            tracing::warn!(rtt_us = rtt, "clock sync: rejecting sample, rtt out of range");
            return false;
        }

        if let Some(model) = &self.model {
            if t4 <= model.last_update_local {
                tracing::warn!("clock sync: rejecting sample, non-monotonic arrival");
                return false;
            }
        }

        let Some(model) = self.model.as_mut() else {
            self.model = Some(ClockModel {
                offset_us: raw_offset,
                drift: 0.0,
                last_update_local: t4,
                rtt_us: rtt,
                sample_count: 1,
            });
            return true;
        };

        let dt_local = (t4 - model.last_update_local) as f64;
        let dt_local_safe = if dt_local == 0.0 { 1.0 } else { dt_local };

        if model.sample_count >= 2 {
            let predicted = model.offset_us + model.drift * dt_local_safe;
            let residual = raw_offset - predicted;
            if residual.abs() > MAX_OFFSET_RESIDUAL_US {
                tracing::warn!(
                    residual_us = residual,
                    "clock sync: rejecting outlier sample"
                );
                return false;
            }
            let new_drift = model.drift + GAIN * (residual / dt_local_safe);
            if new_drift.abs() >= MAX_ABS_DRIFT {
                tracing::warn!(drift = new_drift, "clock sync: rejecting sample, drift out of range");
                return false;
            }
            model.offset_us = predicted + GAIN * residual;
            model.drift = new_drift;
        } else {
            // sample_count == 1: first drift estimate.
            model.drift = (raw_offset - model.offset_us) / dt_local_safe;
            model.offset_us = raw_offset;
        }

        model.last_update_local = t4;
        model.rtt_us = rtt;
        model.sample_count += 1;
        true
    }

    /// Maps a server timestamp forward to the local domain using the
    /// current model. Exact inverse of the forward prediction; falls back
    /// to a plain offset subtraction if `drift` makes the exact inverse
    /// numerically unstable.
    pub fn server_to_local(&self, server: ServerMicros) -> LocalMicros {
        let Some(model) = &self.model else {
            return LocalMicros::new(server.get());
        };
        let denom = 1.0 + model.drift;
        if denom.abs() < 1e-10 {
            return LocalMicros::new(server.get() - model.offset_us as i64);
        }
        let local = (server.get() as f64 - model.offset_us
            + model.drift * model.last_update_local.get() as f64)
            / denom;
        LocalMicros::new(local.round() as i64)
    }

    /// Inverse of [`Self::server_to_local`].
    pub fn local_to_server(&self, local: LocalMicros) -> ServerMicros {
        let Some(model) = &self.model else {
            return ServerMicros::new(local.get());
        };
        let dt = (local - model.last_update_local) as f64;
        let predicted_offset = model.offset_us + model.drift * dt;
        ServerMicros::new((local.get() as f64 + predicted_offset).round() as i64)
    }

    /// Side-effect-free snapshot. `now` is used only to classify
    /// staleness ("Lost after 5s without an accepted sample" needs a
    /// current-time reference; this clock has no wall clock of its own).
    pub fn stats(&self, now: LocalMicros) -> ClockStats {
        let Some(model) = &self.model else {
            return ClockStats {
                offset_us: 0,
                rtt_us: 0,
                quality: SyncQuality::Lost,
                sample_count: 0,
            };
        };

        let age = now - model.last_update_local;
        let quality = if age > LOST_AFTER_US {
            SyncQuality::Lost
        } else if model.rtt_us < GOOD_RTT_US {
            SyncQuality::Good
        } else if model.rtt_us < MAX_ACCEPTED_RTT_US {
            SyncQuality::Degraded
        } else {
            SyncQuality::Lost
        };

        ClockStats {
            offset_us: model.offset_us.round() as i64,
            rtt_us: model.rtt_us,
            quality,
            sample_count: model.sample_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_path_server_ahead_by_100us() {
        let mut sync = ClockSync::new();
        let accepted = sync.process_sample(
            LocalMicros::new(1000),
            ServerMicros::new(1150),
            ServerMicros::new(1155),
            LocalMicros::new(1205),
        );
        assert!(accepted);
        let stats = sync.stats(LocalMicros::new(1205));
        assert_eq!(stats.rtt_us, 200);
        assert_eq!(stats.offset_us, 50);

        // Second sample with identical deltas: offset stays at 50, drift ~ 0.
        sync.process_sample(
            LocalMicros::new(2000),
            ServerMicros::new(2150),
            ServerMicros::new(2155),
            LocalMicros::new(2205),
        );
        let stats = sync.stats(LocalMicros::new(2205));
        assert_eq!(stats.offset_us, 50);
    }

    #[test]
    fn outlier_is_rejected_by_rtt_filter() {
        let mut sync = ClockSync::new();
        // offsets 50, 50, 250 (rtt 200ms -> rejected), 50
        assert!(sync.process_sample(
            LocalMicros::new(0),
            ServerMicros::new(50),
            ServerMicros::new(50),
            LocalMicros::new(0),
        ));
        assert!(sync.process_sample(
            LocalMicros::new(1_000_000),
            ServerMicros::new(1_000_050),
            ServerMicros::new(1_000_050),
            LocalMicros::new(1_000_000),
        ));
        let rejected = sync.process_sample(
            LocalMicros::new(2_000_000),
            ServerMicros::new(2_000_150),
            ServerMicros::new(2_000_350),
            LocalMicros::new(2_000_200),
        );
        assert!(!rejected);
        assert!(sync.process_sample(
            LocalMicros::new(3_000_000),
            ServerMicros::new(3_000_050),
            ServerMicros::new(3_000_050),
            LocalMicros::new(3_000_000),
        ));
        let stats = sync.stats(LocalMicros::new(3_000_000));
        assert!((45..=55).contains(&stats.offset_us));
    }

    #[test]
    fn rejected_sample_leaves_model_unchanged() {
        let mut sync = ClockSync::new();
        sync.process_sample(
            LocalMicros::new(0),
            ServerMicros::new(50),
            ServerMicros::new(50),
            LocalMicros::new(0),
        );
        let before = sync.stats(LocalMicros::new(0));
        let accepted = sync.process_sample(
            LocalMicros::new(1),
            ServerMicros::new(300_000),
            ServerMicros::new(300_001),
            LocalMicros::new(1),
        );
        assert!(!accepted);
        let after = sync.stats(LocalMicros::new(1));
        assert_eq!(before.offset_us, after.offset_us);
        assert_eq!(before.sample_count, after.sample_count);
    }

    #[test]
    fn server_to_local_roundtrips_through_local_to_server() {
        let mut sync = ClockSync::new();
        for i in 0..3i64 {
            let base = i * 5_000_000;
            sync.process_sample(
                LocalMicros::new(base),
                ServerMicros::new(base + 50),
                ServerMicros::new(base + 52),
                LocalMicros::new(base + 100),
            );
        }
        let probe = LocalMicros::new(10_000_500);
        let server = sync.local_to_server(probe);
        let back = sync.server_to_local(server);
        assert!((back.get() - probe.get()).abs() <= 1);
    }

    #[test]
    fn lost_quality_before_any_sample() {
        let sync = ClockSync::new();
        assert_eq!(sync.stats(LocalMicros::new(0)).quality, SyncQuality::Lost);
    }

    #[test]
    fn quality_degrades_to_lost_after_five_seconds_idle() {
        let mut sync = ClockSync::new();
        sync.process_sample(
            LocalMicros::new(0),
            ServerMicros::new(10),
            ServerMicros::new(10),
            LocalMicros::new(0),
        );
        assert_eq!(sync.stats(LocalMicros::new(0)).quality, SyncQuality::Good);
        assert_eq!(
            sync.stats(LocalMicros::new(6_000_000)).quality,
            SyncQuality::Lost
        );
    }

    #[test]
    fn reset_clears_state() {
        let mut sync = ClockSync::new();
        sync.process_sample(
            LocalMicros::new(0),
            ServerMicros::new(10),
            ServerMicros::new(10),
            LocalMicros::new(0),
        );
        sync.reset();
        assert_eq!(sync.stats(LocalMicros::new(0)).sample_count, 0);
    }
}
