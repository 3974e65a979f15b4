//! adios-sim: replay a synthetic workload against the scheduler core.
//!
//! Drives every scheduler hook end to end: requests are prepared,
//! inserted (a small share head-inserted), dispatched, serviced by a
//! synthetic device with a known latency curve, completed, and finished.
//! At the end the learned model parameters are printed next to the
//! device's ground truth.

#![deny(missing_docs)]
#![deny(clippy::panic)]
#![warn(clippy::all, clippy::pedantic)]

mod device;

use adios_core::{NoMerge, OpType, RequestDesc, RequestId, Scheduler, SchedulerConfig};
use anyhow::Result;
use clap::Parser;
use device::DeviceProfile;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};

/// adios-sim: adaptive-deadline scheduler workload simulator
#[derive(Debug, Parser)]
#[command(name = "adios-sim")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of requests to replay
    #[arg(long, default_value_t = 50_000)]
    requests: u64,

    /// Percentage of requests that are reads
    #[arg(long, default_value_t = 70)]
    read_pct: u32,

    /// Percentage of requests that are discards
    #[arg(long, default_value_t = 2)]
    discard_pct: u32,

    /// Largest request size in KiB
    #[arg(long, default_value_t = 512)]
    max_kib: u64,

    /// Device queue depth (requests in flight)
    #[arg(long, default_value_t = 32)]
    queue_depth: usize,

    /// Device fixed overhead in nanoseconds
    #[arg(long, default_value_t = 80_000)]
    device_base_ns: u64,

    /// Device per-KiB cost in nanoseconds
    #[arg(long, default_value_t = 2_500)]
    device_slope_ns: u64,

    /// Jitter amplitude as a percentage of nominal latency
    #[arg(long, default_value_t = 10)]
    jitter_pct: u64,

    /// RNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Log per-phase details
    #[arg(long, short)]
    verbose: bool,
}

/// One request being serviced by the simulated device.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct InFlight {
    completes_at_ns: u64,
    rq: RequestId,
}

fn pick_op(rng: &mut StdRng, cli: &Cli) -> OpType {
    let roll = rng.gen_range(0..100);
    if roll < cli.read_pct {
        OpType::Read
    } else if roll < cli.read_pct + cli.discard_pct {
        OpType::Discard
    } else {
        OpType::Write
    }
}

fn pick_bytes(rng: &mut StdRng, op: OpType, max_kib: u64) -> u64 {
    match op {
        // Discards cover whole extents.
        OpType::Discard => 1024 * rng.gen_range(256..=max_kib.max(256)),
        // A third of the I/O is single-page; the rest spreads out.
        _ if rng.gen_ratio(1, 3) => 4096,
        _ => 1024 * rng.gen_range(5..=max_kib.max(5)),
    }
}

#[allow(clippy::too_many_lines)]
fn run(cli: &Cli) -> Result<()> {
    let profile = DeviceProfile {
        base_ns: cli.device_base_ns,
        slope_ns_per_kib: cli.device_slope_ns,
        jitter_pct: cli.jitter_pct,
        ..DeviceProfile::default()
    };
    let mut rng = StdRng::seed_from_u64(cli.seed);

    let config = SchedulerConfig {
        // The simulation runs on a virtual clock, so periodic gating is
        // driven explicitly rather than by wall time.
        update_interval: Duration::ZERO,
        ..SchedulerConfig::default()
    };
    let sched = Scheduler::with_config(config)?;
    sched.depth_updated(u32::try_from(cli.queue_depth).unwrap_or(u32::MAX));

    info!(
        requests = cli.requests,
        read_pct = cli.read_pct,
        queue_depth = cli.queue_depth,
        device_base_ns = profile.base_ns,
        device_slope_ns = profile.slope_ns_per_kib,
        "replaying workload"
    );

    let mut now_ns: u64 = 0;
    let mut submitted: u64 = 0;
    let mut completed: u64 = 0;
    let mut head_inserted: u64 = 0;
    let mut in_flight: BinaryHeap<Reverse<InFlight>> = BinaryHeap::new();

    while completed < cli.requests {
        // Keep the backlog topped up ahead of the dispatcher.
        while submitted < cli.requests && sched.tracked_requests() < cli.queue_depth * 4 {
            now_ns += rng.gen_range(1_000..20_000);
            let op = pick_op(&mut rng, cli);
            let total_bytes = pick_bytes(&mut rng, op, cli.max_kib);
            let rq = sched.prepare_request(&RequestDesc {
                op,
                sync: op == OpType::Read,
                mergeable: op != OpType::Discard,
                start_time_ns: now_ns,
                total_bytes,
            });
            // A sliver of requeued I/O goes through the bypass path.
            let at_head = rng.gen_ratio(1, 200);
            if at_head {
                head_inserted += 1;
            }
            sched.insert_request(rq, at_head, &NoMerge);
            submitted += 1;
        }

        // Feed the device up to its queue depth.
        while in_flight.len() < cli.queue_depth {
            let Some(rq) = sched.dispatch_request(&NoMerge) else {
                break;
            };
            let Some(snap) = sched.request_snapshot(rq) else {
                continue;
            };
            sched.start_io(rq, now_ns);
            let service = profile.service_ns(&mut rng, snap.op, snap.block_size.max(4096));
            in_flight.push(Reverse(InFlight {
                completes_at_ns: now_ns + service,
                rq,
            }));
        }

        // Advance the clock to the next completion.
        let Some(Reverse(next)) = in_flight.pop() else {
            // Nothing in flight and nothing dispatchable: idle gap.
            continue;
        };
        now_ns = now_ns.max(next.completes_at_ns);
        sched.completed_request(next.rq, now_ns);
        sched.finish_request(next.rq);
        completed += 1;

        if completed % 256 == 0 {
            sched.update_models();
            if cli.verbose {
                let (base, slope) = sched.model_params(OpType::Read);
                debug!(completed, base, slope, "model checkpoint");
            }
        }
    }

    sched.update_models();

    println!("workload: {submitted} submitted, {completed} completed, {head_inserted} bypassed");
    println!(
        "device truth (read): base {} ns, slope {} ns/KiB, 64 KiB read {} ns",
        profile.base_ns,
        profile.slope_ns_per_kib,
        profile.nominal_read_ns(65536)
    );
    for op in [OpType::Read, OpType::Write, OpType::Discard] {
        let (base, slope) = sched.model_params(op);
        println!("learned {:>7}: base {base} ns, slope {slope} ns/KiB", op.name());
    }
    println!();
    print!("{}", sched.read_attr("batch_actual_max")?);
    let read_err = relative_error(sched.model_params(OpType::Read).0, profile.base_ns);
    info!(read_base_error_pct = read_err, "done");

    sched.shutdown();
    Ok(())
}

fn relative_error(learned: u64, truth: u64) -> u64 {
    if truth == 0 {
        return 0;
    }
    learned.abs_diff(truth) * 100 / truth
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli() -> Cli {
        Cli::parse_from(["adios-sim", "--requests", "2000", "--seed", "7"])
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["adios-sim"]);
        assert_eq!(cli.requests, 50_000);
        assert_eq!(cli.read_pct, 70);
        assert_eq!(cli.queue_depth, 32);
    }

    #[test]
    fn test_pick_bytes_small_share() {
        let mut rng = StdRng::seed_from_u64(1);
        let cli = cli();
        let mut small = 0;
        for _ in 0..1000 {
            if pick_bytes(&mut rng, OpType::Read, cli.max_kib) == 4096 {
                small += 1;
            }
        }
        assert!(small > 200, "about a third of reads are single-page: {small}");
    }

    #[test]
    fn test_relative_error() {
        assert_eq!(relative_error(110, 100), 10);
        assert_eq!(relative_error(90, 100), 10);
        assert_eq!(relative_error(0, 0), 0);
    }

    #[test]
    fn test_short_run_learns_the_device() {
        let cli = cli();
        run(&cli).unwrap();
    }
}
