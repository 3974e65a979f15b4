//! Synthetic storage device with a known latency curve.

use adios_core::OpType;
use rand::rngs::StdRng;
use rand::Rng;

/// Ground-truth service model: `base + slope * KiB(payload)` with
/// multiplicative jitter and a rare latency spike, per operation class.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Fixed per-request overhead, ns.
    pub base_ns: u64,
    /// Cost per KiB of payload beyond 4 KiB, ns.
    pub slope_ns_per_kib: u64,
    /// Jitter amplitude as a percentage of the nominal latency.
    pub jitter_pct: u64,
    /// Write service-time multiplier relative to reads.
    pub write_penalty: u64,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            base_ns: 80_000,
            slope_ns_per_kib: 2_500,
            jitter_pct: 10,
            write_penalty: 3,
        }
    }
}

impl DeviceProfile {
    /// Service latency for one request, ns.
    pub fn service_ns(&self, rng: &mut StdRng, op: OpType, total_bytes: u64) -> u64 {
        let mut nominal = self.base_ns;
        if total_bytes > 4096 {
            nominal += self.slope_ns_per_kib * (total_bytes - 4096).div_ceil(1024);
        }
        if op == OpType::Write {
            nominal *= self.write_penalty;
        }
        if op == OpType::Discard {
            // Discards are near-free but occasionally stall the device.
            nominal = self.base_ns / 2;
        }

        let jitter_span = nominal * self.jitter_pct / 100;
        let jitter = if jitter_span > 0 {
            rng.gen_range(0..=2 * jitter_span)
        } else {
            0
        };
        let mut latency = (nominal + jitter).saturating_sub(jitter_span);

        // One request in 500 hits a garbage-collection style spike.
        if rng.gen_ratio(1, 500) {
            latency *= 10;
        }
        latency.max(1)
    }

    /// The latency the device would nominally charge a read of this size.
    pub fn nominal_read_ns(&self, total_bytes: u64) -> u64 {
        let mut nominal = self.base_ns;
        if total_bytes > 4096 {
            nominal += self.slope_ns_per_kib * (total_bytes - 4096).div_ceil(1024);
        }
        nominal
    }
}
