//! Per-operation latency model.
//!
//! Each model learns two parameters from completion latencies: `base`,
//! the fixed per-request overhead in nanoseconds, and `slope`, the cost
//! in nanoseconds per KiB beyond the small-request threshold. Samples
//! are binned into 64 buckets by their measured-to-predicted ratio,
//! trimmed at an outlier percentile, then folded into running
//! aggregates from which the parameters are recomputed.
//!
//! Requests of at most [`SMALL_BLOCK_THRESHOLD`] bytes train `base`;
//! larger requests train `slope` once `base` is known. A large sample
//! arriving with a zero predicted latency is dropped: there is no
//! denominator to bin it by.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Requests at or below this byte size train the fixed overhead.
pub const SMALL_BLOCK_THRESHOLD: u64 = 4096;

/// Number of histogram buckets per sample class.
pub const BUCKET_COUNT: usize = 64;

/// Accumulated bucket samples that force processing between intervals.
const SAMPLES_THRESHOLD: u64 = 1024;

/// Percentile above which binned samples are discarded as outliers.
const OUTLIER_PERCENTILE: u64 = 99;

/// Small-side aggregate sample count that triggers geometric decay.
const SHRINK_AT_SAMPLES: u64 = 10_000_000;

/// Large-side aggregate byte volume that triggers geometric decay.
const SHRINK_AT_BYTES: u64 = 100 << 30;

/// Decay shift: shrinking removes `x >> SHRINK_SHIFT` (25%) from an aggregate.
const SHRINK_SHIFT: u32 = 2;

/// One histogram slot.
#[derive(Debug, Clone, Copy, Default)]
struct LatencyBucket {
    count: u64,
    sum_latency: u64,
    sum_block_size: u64,
}

#[derive(Debug)]
struct BucketArrays {
    small: [LatencyBucket; BUCKET_COUNT],
    large: [LatencyBucket; BUCKET_COUNT],
}

impl BucketArrays {
    fn new() -> Self {
        Self {
            small: [LatencyBucket::default(); BUCKET_COUNT],
            large: [LatencyBucket::default(); BUCKET_COUNT],
        }
    }
}

/// Running aggregates the parameters are derived from.
#[derive(Debug)]
struct ModelStats {
    small_sum_delay: u64,
    small_count: u64,
    large_sum_delay: u64,
    large_sum_bsize: u64,
    last_update: Instant,
}

/// Learned latency curve for one operation class.
///
/// `base` and `slope` are plain atomics so the submit and completion
/// paths can read them without taking either model lock; the aggregates
/// sit behind the parameter lock and the bucket arrays behind their own
/// finer lock. `update` takes the parameter lock first, then the bucket
/// lock.
#[derive(Debug)]
pub struct LatencyModel {
    base: AtomicU64,
    slope: AtomicU64,
    stats: Mutex<ModelStats>,
    buckets: Mutex<BucketArrays>,
    update_interval: Duration,
}

/// Map a measured latency onto a bucket by its ratio to the prediction.
///
/// Three linear regions stretch resolution near the expected latency and
/// compress the far tail: ratios below 2 land in buckets 0..40, below 5
/// in 40..64, and everything beyond is clamped into the top bucket.
fn bucket_index(measured: u64, predicted: u64) -> usize {
    let index = if measured < predicted * 2 {
        (measured * 20) / predicted
    } else if measured < predicted * 5 {
        (measured * 10) / predicted + 20
    } else {
        (measured * 3) / predicted + 40
    };
    index.min(BUCKET_COUNT as u64 - 1) as usize
}

/// Trim result for the small-request buckets.
struct SmallTrim {
    sum_latency: u64,
    sum_count: u64,
}

/// Trim result for the large-request buckets.
struct LargeTrim {
    sum_latency: u64,
    sum_block_size: u64,
    threshold_count: u64,
}

/// Locate the bucket holding the outlier percentile.
///
/// Returns the index of the first bucket at which the cumulative count
/// reaches `threshold`, along with that cumulative count.
fn outlier_cut(buckets: &[LatencyBucket; BUCKET_COUNT], threshold: u64) -> (usize, u64) {
    let mut cumulative = 0u64;
    for (i, bucket) in buckets.iter().enumerate() {
        cumulative += bucket.count;
        if cumulative >= threshold {
            return (i, cumulative);
        }
    }
    (BUCKET_COUNT - 1, cumulative)
}

fn trim_small(
    buckets: &mut [LatencyBucket; BUCKET_COUNT],
    total: u64,
    count_all: bool,
) -> SmallTrim {
    let percentile = if count_all { 100 } else { OUTLIER_PERCENTILE };
    let threshold = total * percentile / 100;
    let (cut, cumulative) = outlier_cut(buckets, threshold);

    let mut sum_latency = 0u64;
    let mut sum_count = 0u64;
    for (i, bucket) in buckets.iter().enumerate().take(cut + 1) {
        if i < cut {
            sum_latency += bucket.sum_latency;
            sum_count += bucket.count;
        } else if bucket.count > 0 {
            // The threshold bucket contributes proportionally.
            let remaining = threshold - (cumulative - bucket.count);
            sum_latency += bucket.sum_latency * remaining / bucket.count;
            sum_count += remaining;
        }
    }

    *buckets = [LatencyBucket::default(); BUCKET_COUNT];
    SmallTrim {
        sum_latency,
        sum_count,
    }
}

fn trim_large(
    buckets: &mut [LatencyBucket; BUCKET_COUNT],
    total: u64,
    count_all: bool,
) -> LargeTrim {
    let percentile = if count_all { 100 } else { OUTLIER_PERCENTILE };
    let threshold = total * percentile / 100;
    let (cut, cumulative) = outlier_cut(buckets, threshold);

    let mut sum_latency = 0u64;
    let mut sum_block_size = 0u64;
    for (i, bucket) in buckets.iter().enumerate().take(cut + 1) {
        if i < cut {
            sum_latency += bucket.sum_latency;
            sum_block_size += bucket.sum_block_size;
        } else if bucket.count > 0 {
            let remaining = threshold - (cumulative - bucket.count);
            sum_latency += bucket.sum_latency * remaining / bucket.count;
            sum_block_size += bucket.sum_block_size * remaining / bucket.count;
        }
    }

    *buckets = [LatencyBucket::default(); BUCKET_COUNT];
    LargeTrim {
        sum_latency,
        sum_block_size,
        threshold_count: threshold,
    }
}

impl LatencyModel {
    /// Create a model with the default recomputation interval.
    #[must_use]
    pub fn new() -> Self {
        Self::with_interval(crate::config::DEFAULT_UPDATE_INTERVAL)
    }

    /// Create a model with a custom minimum recomputation interval.
    #[must_use]
    pub fn with_interval(update_interval: Duration) -> Self {
        Self {
            base: AtomicU64::new(0),
            slope: AtomicU64::new(0),
            stats: Mutex::new(ModelStats {
                small_sum_delay: 0,
                small_count: 0,
                large_sum_delay: 0,
                large_sum_bsize: 0,
                last_update: Instant::now(),
            }),
            buckets: Mutex::new(BucketArrays::new()),
            update_interval,
        }
    }

    /// Learned fixed overhead, ns. Zero until the first small sample.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base.load(Ordering::Relaxed)
    }

    /// Learned per-KiB cost beyond the small threshold, ns/KiB.
    #[must_use]
    pub fn slope(&self) -> u64 {
        self.slope.load(Ordering::Relaxed)
    }

    /// Forget the fixed overhead so it is relearned from scratch.
    ///
    /// Used when the latency target changes: deadlines computed with the
    /// old base would no longer match the new policy.
    pub fn reset_base(&self) {
        self.base.store(0, Ordering::Relaxed);
    }

    /// Zero the parameters and aggregates.
    ///
    /// Binned but unprocessed samples survive; the next update relearns
    /// from them.
    pub fn reset(&self) {
        let mut stats = self.stats.lock();
        self.base.store(0, Ordering::Relaxed);
        self.slope.store(0, Ordering::Relaxed);
        stats.small_sum_delay = 0;
        stats.small_count = 0;
        stats.large_sum_delay = 0;
        stats.large_sum_bsize = 0;
    }

    /// Predict the service latency of a request, ns.
    ///
    /// Returns `base` for small requests and
    /// `base + slope * ceil((bytes - 4096) / 1024)` beyond the threshold,
    /// which makes the prediction non-decreasing in block size.
    #[must_use]
    pub fn predict(&self, block_size: u64) -> u64 {
        let mut latency = self.base.load(Ordering::Relaxed);
        if block_size > SMALL_BLOCK_THRESHOLD {
            latency += self.slope.load(Ordering::Relaxed)
                * (block_size - SMALL_BLOCK_THRESHOLD).div_ceil(1024);
        }
        latency
    }

    /// Feed one completion sample into the model.
    ///
    /// Small samples bin against the current `base` (or 1 while cold);
    /// the first small sample on a cold model triggers an immediate
    /// update so `base` bootstraps without waiting for the timer. Large
    /// samples bin against the prediction captured at insert and are
    /// dropped while `base` is unknown or the prediction was zero.
    pub fn input(&self, block_size: u64, latency: u64, pred_lat: u64) {
        let mut bootstrap = false;
        {
            let mut buckets = self.buckets.lock();
            if block_size <= SMALL_BLOCK_THRESHOLD {
                let base = self.base.load(Ordering::Relaxed);
                let index = bucket_index(latency, base.max(1));
                buckets.small[index].count += 1;
                buckets.small[index].sum_latency += latency;
                bootstrap = base == 0;
            } else {
                let base = self.base.load(Ordering::Relaxed);
                if base == 0 || pred_lat == 0 {
                    return;
                }
                let index = bucket_index(latency, pred_lat);
                buckets.large[index].count += 1;
                buckets.large[index].sum_latency += latency;
                buckets.large[index].sum_block_size += block_size;
            }
        }
        if bootstrap {
            self.update();
        }
    }

    /// Recompute `base` and `slope` from the binned samples.
    ///
    /// Buckets are processed when the update interval has elapsed, when
    /// they hold at least 1024 samples, or while the corresponding
    /// parameter is still zero (cold start, which also disables outlier
    /// trimming so the very first samples count in full).
    pub fn update(&self) {
        let mut stats = self.stats.lock();
        let now = Instant::now();
        let base = self.base.load(Ordering::Relaxed);
        let slope = self.slope.load(Ordering::Relaxed);

        let time_elapsed;
        let mut small_trim = None;
        let mut large_trim = None;
        {
            let mut buckets = self.buckets.lock();
            time_elapsed = base == 0
                || now.duration_since(stats.last_update) >= self.update_interval;

            let small_total: u64 = buckets.small.iter().map(|b| b.count).sum();
            let large_total: u64 = buckets.large.iter().map(|b| b.count).sum();

            if small_total > 0
                && (time_elapsed || small_total >= SAMPLES_THRESHOLD || base == 0)
            {
                small_trim = Some(trim_small(&mut buckets.small, small_total, base == 0));
            }
            if large_total > 0
                && (time_elapsed || large_total >= SAMPLES_THRESHOLD || slope == 0)
            {
                large_trim = Some(trim_large(&mut buckets.large, large_total, slope == 0));
            }
        }

        if let Some(trim) = small_trim {
            if stats.small_count >= SHRINK_AT_SAMPLES
                && (stats.small_count >> SHRINK_SHIFT) != 0
            {
                stats.small_sum_delay -= stats.small_sum_delay >> SHRINK_SHIFT;
                stats.small_count -= stats.small_count >> SHRINK_SHIFT;
            }
            stats.small_sum_delay += trim.sum_latency;
            stats.small_count += trim.sum_count;
            if stats.small_count > 0 {
                self.base.store(
                    stats.small_sum_delay / stats.small_count,
                    Ordering::Relaxed,
                );
            }
        }

        if let Some(trim) = large_trim {
            if stats.large_sum_bsize >= SHRINK_AT_BYTES
                && (stats.large_sum_bsize >> SHRINK_SHIFT) != 0
            {
                stats.large_sum_delay -= stats.large_sum_delay >> SHRINK_SHIFT;
                stats.large_sum_bsize -= stats.large_sum_bsize >> SHRINK_SHIFT;
            }
            // The large side must learn only the per-KiB cost, so the fixed
            // overhead of the trimmed sample population is removed first.
            let intercept = base.saturating_mul(trim.threshold_count);
            let sum_latency = trim.sum_latency.saturating_sub(intercept);
            stats.large_sum_delay += sum_latency;
            stats.large_sum_bsize += trim.sum_block_size;
            if stats.large_sum_bsize > 0 {
                self.slope.store(
                    stats.large_sum_delay / stats.large_sum_bsize.div_ceil(1024),
                    Ordering::Relaxed,
                );
            }
        }

        if time_elapsed {
            stats.last_update = now;
        }
    }
}

impl Default for LatencyModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eager_model() -> LatencyModel {
        LatencyModel::with_interval(Duration::ZERO)
    }

    #[test]
    fn test_bucket_index_zero_measured() {
        assert_eq!(bucket_index(0, 1000), 0);
    }

    #[test]
    fn test_bucket_index_near_expected() {
        // measured == predicted lands in bucket 20.
        assert_eq!(bucket_index(1000, 1000), 20);
        assert_eq!(bucket_index(1999, 1000), 39);
    }

    #[test]
    fn test_bucket_index_mid_region() {
        assert_eq!(bucket_index(2000, 1000), 40);
        assert_eq!(bucket_index(4999, 1000), 63);
    }

    #[test]
    fn test_bucket_index_far_tail_clamped() {
        assert_eq!(bucket_index(5000, 1000), 55);
        assert_eq!(bucket_index(1_000_000, 1), 63);
    }

    #[test]
    fn test_predict_cold_model_is_zero() {
        let model = LatencyModel::new();
        assert_eq!(model.predict(4096), 0);
        assert_eq!(model.predict(1 << 20), 0);
    }

    #[test]
    fn test_cold_start_bootstrap() {
        let model = eager_model();
        model.input(4096, 1000, 0);
        assert_eq!(model.base(), 1000, "first small sample must set base");
    }

    #[test]
    fn test_base_converges_on_steady_samples() {
        let model = eager_model();
        for _ in 0..100 {
            model.input(4096, 1000, model.base());
        }
        model.update();
        assert_eq!(model.base(), 1000);
    }

    #[test]
    fn test_predict_boundary_block_sizes() {
        let model = eager_model();
        model.input(4096, 1000, 0);
        // Learn a slope of exactly 100 ns/KiB: one sample of 4096 + 1024
        // bytes, one KiB unit past the threshold.
        model.input(5120, 1100, model.predict(5120).max(1000));
        model.update();
        assert_eq!(model.predict(4096), model.base());
        assert_eq!(model.predict(4097), model.base() + model.slope());
        assert!(model.predict(8192) >= model.predict(4097));
    }

    #[test]
    fn test_predict_monotone_in_block_size() {
        let model = eager_model();
        model.input(4096, 500, 0);
        model.input(65536, 2000, 500);
        model.update();
        let mut previous = 0;
        for bs in [1, 4096, 4097, 5120, 65536, 1 << 20] {
            let predicted = model.predict(bs);
            assert!(predicted >= previous, "predict must be non-decreasing");
            previous = predicted;
        }
    }

    #[test]
    fn test_large_sample_dropped_while_cold() {
        let model = eager_model();
        model.input(65536, 8_000_000, 8_000_000);
        model.update();
        assert_eq!(model.slope(), 0, "large samples before base must be dropped");
    }

    #[test]
    fn test_large_sample_dropped_without_prediction() {
        let model = eager_model();
        model.input(4096, 1000, 0);
        model.input(65536, 8_000_000, 0);
        model.update();
        assert_eq!(model.slope(), 0);
    }

    #[test]
    fn test_slope_learning_removes_intercept() {
        let model = eager_model();
        model.input(4096, 500_000, 0);
        assert_eq!(model.base(), 500_000);

        for _ in 0..2000 {
            model.input(65536, 8_000_000, 8_000_000);
        }
        model.update();

        // sum_latency = 2000 * 8e6 minus the intercept 2000 * base, over
        // ceil(2000 * 65536 / 1024) KiB.
        let expected = (2000u64 * 8_000_000 - 2000 * 500_000) / (2000 * 65536 / 1024);
        assert_eq!(model.slope(), expected);
    }

    #[test]
    fn test_outlier_trimming_excludes_tail() {
        let model = eager_model();
        model.input(4096, 1000, 0);
        // 99 well-behaved samples and one wild outlier.
        for _ in 0..99 {
            model.input(4096, 1000, 0);
        }
        model.input(4096, 1_000_000, 0);
        model.update();
        // With the outlier trimmed at the 99th percentile the mean stays
        // near the steady value.
        assert!(model.base() < 2000, "outlier must not drag base: {}", model.base());
    }

    #[test]
    fn test_reset_clears_parameters() {
        let model = eager_model();
        model.input(4096, 1000, 0);
        assert_ne!(model.base(), 0);
        model.reset();
        assert_eq!(model.base(), 0);
        assert_eq!(model.slope(), 0);
    }

    #[test]
    fn test_reset_preserves_binned_samples() {
        let model = eager_model();
        model.input(4096, 1000, 0);
        // Bin more samples, then reset parameters before they are processed.
        for _ in 0..10 {
            model.input(4096, 2000, 0);
        }
        model.reset();
        // The unprocessed samples are still there: the next update relearns.
        model.update();
        assert_ne!(model.base(), 0);
    }

    #[test]
    fn test_reset_base_only() {
        let model = eager_model();
        model.input(4096, 1000, 0);
        model.reset_base();
        assert_eq!(model.base(), 0);
    }

    #[test]
    fn test_interval_gating_defers_processing() {
        let model = LatencyModel::with_interval(Duration::from_secs(3600));
        model.input(4096, 1000, 0); // bootstraps, base = 1000
        for _ in 0..10 {
            model.input(4096, 9000, 0);
        }
        model.update();
        // Neither cold, nor 1024 samples, nor an hour elapsed: untouched.
        assert_eq!(model.base(), 1000);
    }

    #[test]
    fn test_sample_threshold_overrides_interval() {
        let model = LatencyModel::with_interval(Duration::from_secs(3600));
        model.input(4096, 1000, 0);
        for _ in 0..1024 {
            model.input(4096, 3000, 0);
        }
        model.update();
        assert!(model.base() > 1000, "1024 samples must force processing");
    }

    #[test]
    fn test_shrink_decays_aggregates() {
        let model = eager_model();
        model.input(4096, 1000, 0);
        {
            // Push the aggregates over the shrink trigger by hand.
            let mut stats = model.stats.lock();
            stats.small_count = SHRINK_AT_SAMPLES;
            stats.small_sum_delay = SHRINK_AT_SAMPLES * 1000;
        }
        model.input(4096, 1000, 0);
        model.update();
        let stats = model.stats.lock();
        // Decay removed a quarter before the new sample accumulated.
        let decayed = SHRINK_AT_SAMPLES - (SHRINK_AT_SAMPLES >> SHRINK_SHIFT);
        assert!(stats.small_count >= decayed && stats.small_count <= decayed + 2);
    }

    #[test]
    fn test_model_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LatencyModel>();
    }
}
