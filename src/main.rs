use std::io;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;

use rv32dbg::{config::Config, cpu::Cpu, loader, monitor::Monitor};

fn main() {
    match run() {
        Ok(status) => std::process::exit(status),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let config = Config::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(config.log_level.as_str()))
        .init();
    config.validate()?;

    let image = loader::load(config.image.as_deref(), config.mem_base, config.mem_size)?;
    let cpu = Cpu::new(image.memory, image.entry);
    let mut monitor = Monitor::new(cpu, config.watchpoints, io::stdout().lock());

    if config.batch {
        monitor.run_batch()?;
    } else {
        monitor.run(io::stdin().lock())?;
    }
    Ok(monitor.exit_status())
}
