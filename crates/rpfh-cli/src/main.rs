#![forbid(unsafe_code)]

mod workload;

use anyhow::{Context, Result};
use clap::Parser;
use rpfh::{RpfhConfig, RPFH_MMIO_BASE};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::workload::{Workload, WorkloadConfig, MAX_PAGES};

fn parse_u64(s: &str) -> std::result::Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid address `{s}`: {e}"))
}

/// Drives a synthetic guest through the remote page fault handler: donate frames, evict every
/// page, fault each one back in and verify its contents.
#[derive(Debug, Parser)]
#[command(name = "rpfh", version, about)]
struct Args {
    /// Guest RAM size in MiB.
    #[arg(long, env = "RPFH_RAM_MIB", default_value_t = 16)]
    ram: u64,

    /// Guest-physical base of RAM.
    #[arg(long, env = "RPFH_DRAM_BASE", default_value = "0x80000000", value_parser = parse_u64)]
    dram_base: u64,

    /// Guest-physical base of the three-register RPFH window.
    #[arg(long, env = "RPFH_MMIO_BASE", default_value_t = RPFH_MMIO_BASE, value_parser = parse_u64)]
    mmio_base: u64,

    /// Number of synthetic pages to evict and fault back in each round.
    #[arg(long, env = "RPFH_PAGES", default_value_t = 64)]
    pages: usize,

    /// Spare frames donated before the first round (defaults to `--pages`).
    #[arg(long, env = "RPFH_EXTRA_FRAMES")]
    extra_frames: Option<usize>,

    /// Eviction/fault rounds.
    #[arg(long, env = "RPFH_ROUNDS", default_value_t = 4)]
    rounds: usize,

    /// Leave evicted frames' bytes in place instead of zeroing them.
    #[arg(long, env = "RPFH_NO_SCRUB")]
    no_scrub: bool,

    /// Log filter (tracing-subscriber EnvFilter syntax). Falls back to `RUST_LOG`, then `info`.
    ///
    /// Environment variable: `RPFH_LOG`.
    #[arg(long, env = "RPFH_LOG")]
    log: Option<String>,
}

fn init_tracing(directive: Option<&str>) {
    let filter = directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log.as_deref());

    let ram_bytes = args
        .ram
        .checked_mul(1024 * 1024)
        .context("RAM size overflow")?;
    let pages = args.pages.min(MAX_PAGES);
    if pages != args.pages {
        tracing::warn!(requested = args.pages, pages, "page count clamped");
    }

    let config = WorkloadConfig {
        ram_bytes,
        dram_base: args.dram_base,
        pages,
        extra_frames: args.extra_frames.unwrap_or(pages),
        rounds: args.rounds,
        rpfh: RpfhConfig {
            mmio_base: args.mmio_base,
            scrub_on_evict: !args.no_scrub,
        },
    };
    info!(
        ram_bytes,
        dram_base = format_args!("{:#x}", config.dram_base),
        mmio_base = format_args!("{:#x}", config.rpfh.mmio_base),
        pages = config.pages,
        extra_frames = config.extra_frames,
        rounds = config.rounds,
        "starting workload"
    );

    let report = Workload::new(config)?
        .run()
        .context("workload failed")?;

    let stats = report.stats;
    println!("rounds:              {}", report.rounds);
    println!("pages verified:      {}", report.pages_verified);
    println!("notifications:       {}", report.notifications);
    println!("frees:               {}", stats.frees);
    println!("evictions:           {}", stats.evictions);
    println!("redundant evictions: {}", stats.redundant_evictions);
    println!("fetches:             {}", stats.fetches);
    println!("ignored accesses:    {}", stats.ignored_accesses);
    println!("free frames left:    {}", report.free_frames);
    println!("evicted pages left:  {}", report.evicted_pages);
    println!("RAM chunks touched:  {}", report.allocated_chunks);
    Ok(())
}
