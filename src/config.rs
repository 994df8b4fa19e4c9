use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{ArgAction, Parser};

pub const DEFAULT_MEM_BASE: u32 = 0x8000_0000;
pub const DEFAULT_MEM_SIZE: usize = 128 * 1024 * 1024;

/// Accepts `0x`-prefixed hex or plain decimal.
fn parse_number(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid number `{s}`: {e}"))
}

fn parse_addr(s: &str) -> Result<u32, String> {
    let value = parse_number(s)?;
    u32::try_from(value).map_err(|_| format!("address `{s}` does not fit in 32 bits"))
}

fn parse_size(s: &str) -> Result<usize, String> {
    let value = parse_number(s)?;
    usize::try_from(value).map_err(|_| format!("size `{s}` is too large"))
}

#[derive(Debug, Clone, Parser)]
#[command(name = "rv32dbg", version, about = "RV32IM emulator with an interactive debugger")]
pub struct Config {
    #[clap(help = "ELF or raw binary image; runs a built-in program when omitted")]
    pub image: Option<PathBuf>,

    #[clap(short, long, env = "RV32DBG_BATCH", action = ArgAction::SetTrue, help = "Run to completion without the monitor prompt")]
    pub batch: bool,

    #[clap(long, env = "RV32DBG_LOG", default_value = "warn", help = "Log filter, e.g. `info` or `rv32dbg=trace`")]
    pub log_level: String,

    #[clap(long, value_parser = parse_addr, default_value = "0x80000000", help = "Guest RAM base address")]
    pub mem_base: u32,

    #[clap(long, value_parser = parse_size, default_value = "0x8000000", help = "Guest RAM size in bytes")]
    pub mem_size: usize,

    #[clap(long, default_value_t = crate::monitor::watchpoint::DEFAULT_CAPACITY, help = "Number of watchpoint slots")]
    pub watchpoints: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            image: None,
            batch: false,
            log_level: "warn".to_string(),
            mem_base: DEFAULT_MEM_BASE,
            mem_size: DEFAULT_MEM_SIZE,
            watchpoints: crate::monitor::watchpoint::DEFAULT_CAPACITY,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.mem_size == 0 {
            bail!("--mem-size must be non-zero");
        }
        let end = self.mem_base as u64 + self.mem_size as u64;
        if end > u32::MAX as u64 + 1 {
            bail!(
                "RAM at {:#010x} with size {:#x} does not fit in the 32-bit address space",
                self.mem_base,
                self.mem_size
            );
        }
        Ok(())
    }
}
