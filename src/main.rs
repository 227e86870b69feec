//! Demo driver: builds the reference video chain and runs it.
//!
//! Examples:
//!   pulsenet
//!   pulsenet --threads 3 --cycles 64
//!   pulsenet --tier single --seed 7 --verbose 1
//!   pulsenet --config net.json --snapshot

use std::process;

use pulsenet::prelude::*;
use tracing::{error, info};

fn usage() -> ! {
    eprintln!("Usage: pulsenet [options]\n");
    eprintln!("Options:");
    eprintln!("  --threads N        worker threads per cycle (default 4)");
    eprintln!("  --cycles N         clock cycles to run (default 16)");
    eprintln!("  --tier T           single | threaded | parallel");
    eprintln!("  --seed N           seed for wiring and noise frames");
    eprintln!("  --config PATH      load a JSON NetConfig first");
    eprintln!("  --verbose N        trace every fanout when N > 0");
    eprintln!("  --snapshot         print a JSON snapshot after the run");
    process::exit(2);
}

struct Args {
    cfg: NetConfig,
    cycles: u64,
    snapshot: bool,
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: Option<String>) -> T {
    let Some(value) = value else {
        eprintln!("{flag} needs a value");
        usage();
    };
    value.parse().unwrap_or_else(|_| {
        eprintln!("{flag} expects a number, got '{value}'");
        usage();
    })
}

fn parse_args() -> Args {
    let mut cfg = NetConfig::default();
    let mut cycles = 16;
    let mut snapshot = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" | "help" => usage(),
            "--threads" => cfg.threads = parse_number("--threads", args.next()),
            "--cycles" => cycles = parse_number("--cycles", args.next()),
            "--seed" => cfg.seed = Some(parse_number("--seed", args.next())),
            "--verbose" => cfg.verbose = parse_number("--verbose", args.next()),
            "--tier" => {
                let value = args.next().unwrap_or_else(|| usage());
                cfg.tier = ExecutionTier::parse(&value).unwrap_or_else(|| {
                    eprintln!("tier must be single|threaded|parallel");
                    usage();
                });
            }
            "--config" => {
                let path = args.next().unwrap_or_else(|| usage());
                cfg = load_config(&path);
            }
            "--snapshot" => snapshot = true,
            other => {
                eprintln!("Unknown option: {other}");
                usage();
            }
        }
    }

    Args {
        cfg,
        cycles,
        snapshot,
    }
}

#[cfg(feature = "serde")]
fn load_config(path: &str) -> NetConfig {
    NetConfig::from_path(path).unwrap_or_else(|e| {
        eprintln!("{path}: {e}");
        process::exit(1);
    })
}

#[cfg(not(feature = "serde"))]
fn load_config(_path: &str) -> NetConfig {
    eprintln!("--config requires the `serde` feature");
    process::exit(2);
}

fn run(args: Args) -> NetResult<()> {
    let seed = args.cfg.seed_or_default();
    let (mut root, chain) = VideoChain::build(args.cfg, NoiseSource::new(seed))?;
    root.net().log_tree();

    let mut fanins: Rc = 0;
    for _ in 0..args.cycles {
        let report = root.update()?;
        fanins += report.fanins;
        let out = root.to_values(chain.output)?;
        let active = out.iter().filter(|&v| v != 0).count();
        let sum: i64 = out.iter().map(i64::from).sum();
        info!(
            cycle = report.cycle,
            fanins = report.fanins,
            workers = report.workers,
            elapsed_us = report.elapsed.as_micros() as u64,
            active,
            sum,
            "cycle"
        );
    }
    info!(cycles = root.cycle(), fanins, "done");

    if args.snapshot {
        print_snapshot(&root)?;
    }
    Ok(())
}

#[cfg(feature = "serde")]
fn print_snapshot(root: &Root) -> NetResult<()> {
    println!("{}", NetAdapter::new(root).snapshot()?.to_json()?);
    Ok(())
}

#[cfg(not(feature = "serde"))]
fn print_snapshot(root: &Root) -> NetResult<()> {
    println!("{:#?}", NetAdapter::new(root).snapshot()?);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = parse_args();
    if let Err(e) = run(args) {
        error!("{e}");
        process::exit(1);
    }
}
