//! Interactive command monitor driving a [`Cpu`].

pub mod expr;
pub mod watchpoint;

use std::{
    fs,
    io::{BufRead, Write},
    path::Path,
};

use anyhow::{Context, Result, bail};
use log::info;

use crate::{
    cpu::{Cpu, MachineState, RegisterFile},
    memory::{MemoryError, Width},
};

use expr::{Environment, Evaluator, ExprError};
use watchpoint::{Watchpoint, WatchpointError, WatchpointHit, WatchpointPool};

pub const PROMPT: &str = "(rv32dbg) ";

/// Command names and their help text, in the order `help` lists them.
const COMMANDS: &[(&str, &str)] = &[
    ("help", "Display information about all supported commands"),
    ("c", "Continue the execution of the program"),
    ("q", "Exit rv32dbg"),
    ("si", "Step N instructions (default 1)"),
    ("info", "Print program state: `info r` registers, `info w` watchpoints"),
    ("x", "Scan memory: `x N EXPR` dumps N words starting at EXPR"),
    ("p", "Evaluate an expression"),
    ("w", "Stop when the value of an expression changes"),
    ("d", "Delete a watchpoint by number"),
    ("test", "Check a file of `EXPECTED EXPR` lines against the evaluator"),
];

/// Whether the read loop should keep going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl Environment for Cpu {
    fn register(&self, name: &str) -> Option<u32> {
        if name == "pc" {
            return Some(self.pc());
        }
        RegisterFile::index_of(name).map(|index| self.regs().read(index))
    }

    fn read_word(&self, addr: u32) -> Result<u32, MemoryError> {
        self.memory().read(addr, Width::Word)
    }
}

pub struct Monitor<W: Write> {
    cpu: Cpu,
    evaluator: Evaluator,
    watchpoints: WatchpointPool,
    out: W,
}

impl<W: Write> Monitor<W> {
    pub fn new(cpu: Cpu, watchpoints: usize, out: W) -> Self {
        Self {
            cpu,
            evaluator: Evaluator::new(),
            watchpoints: WatchpointPool::new(watchpoints),
            out,
        }
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn watchpoints(&self) -> &WatchpointPool {
        &self.watchpoints
    }

    pub fn evaluate(&mut self, text: &str) -> Result<u32, ExprError> {
        self.evaluator.evaluate(text, &self.cpu)
    }

    pub fn set_watchpoint(&mut self, text: &str) -> Result<usize, WatchpointError> {
        self.watchpoints
            .acquire(text, &mut self.evaluator, &self.cpu)
            .map(Watchpoint::id)
    }

    pub fn delete_watchpoint(&mut self, id: usize) -> Result<Watchpoint, WatchpointError> {
        self.watchpoints.release(id)
    }

    /// Process exit status for the current machine state.
    pub fn exit_status(&self) -> i32 {
        match self.cpu.state() {
            MachineState::End { code: 0, .. } | MachineState::Quit => 0,
            MachineState::Running | MachineState::Stop => 0,
            MachineState::End { .. } | MachineState::Abort { .. } => 1,
        }
    }

    /// Run at most `n` instructions, scanning watchpoints after each one.
    pub fn exec(&mut self, n: u64) -> Result<()> {
        match self.cpu.state() {
            MachineState::End { .. } | MachineState::Abort { .. } | MachineState::Quit => {
                writeln!(
                    self.out,
                    "Program execution has ended. To restart the program, exit rv32dbg and run again."
                )?;
                return Ok(());
            }
            MachineState::Running | MachineState::Stop => {}
        }

        self.cpu.set_state(MachineState::Running);
        for _ in 0..n {
            if let Err(err) = self.cpu.exec_once() {
                writeln!(self.out, "{err}")?;
                break;
            }
            let hits = self.watchpoints.scan(&mut self.evaluator, &self.cpu);
            if !hits.is_empty() {
                self.report_hits(&hits)?;
                if self.cpu.state() == MachineState::Running {
                    self.cpu.set_state(MachineState::Stop);
                }
                break;
            }
            if self.cpu.state() != MachineState::Running {
                break;
            }
        }

        match self.cpu.state() {
            MachineState::Running => self.cpu.set_state(MachineState::Stop),
            MachineState::End { pc, code } => {
                let verdict = if code == 0 { "HIT GOOD TRAP" } else { "HIT BAD TRAP" };
                writeln!(self.out, "rv32dbg: {verdict} at pc = {pc:#010x}")?;
                info!("total guest instructions = {}", self.cpu.executed());
            }
            MachineState::Abort { pc } => {
                writeln!(self.out, "rv32dbg: ABORT at pc = {pc:#010x}")?;
                info!("total guest instructions = {}", self.cpu.executed());
            }
            MachineState::Stop | MachineState::Quit => {}
        }
        Ok(())
    }

    fn report_hits(&mut self, hits: &[WatchpointHit]) -> Result<()> {
        for hit in hits {
            writeln!(self.out, "Watchpoint {}: {}", hit.id, hit.expr)?;
            writeln!(self.out, "old value = {:#010x} ({})", hit.old, hit.old)?;
            writeln!(self.out, "new value = {:#010x} ({})", hit.new, hit.new)?;
        }
        Ok(())
    }

    /// Batch mode: run until the program stops.
    pub fn run_batch(&mut self) -> Result<()> {
        self.exec(u64::MAX)
    }

    /// Read commands from `input` until `q` or end of input.
    pub fn run<R: BufRead>(&mut self, mut input: R) -> Result<()> {
        loop {
            write!(self.out, "{PROMPT}")?;
            self.out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line).context("cannot read command")? == 0 {
                writeln!(self.out)?;
                return Ok(());
            }
            if self.execute(&line)? == Flow::Quit {
                return Ok(());
            }
        }
    }

    /// Run one command line. Command failures are reported on the output;
    /// only output errors are returned.
    pub fn execute(&mut self, line: &str) -> Result<Flow> {
        match self.dispatch(line) {
            Ok(flow) => Ok(flow),
            Err(err) => {
                writeln!(self.out, "{err:#}")?;
                if let Some(pointer) = expr_pointer(&err) {
                    writeln!(self.out, "{pointer}")?;
                }
                Ok(Flow::Continue)
            }
        }
    }

    fn dispatch(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        let (cmd, args) = match line.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd, args.trim()),
            None => (line, ""),
        };

        match cmd {
            "" => {}
            "help" => self.cmd_help(args)?,
            "c" => self.exec(u64::MAX)?,
            "q" => {
                self.cpu.set_state(MachineState::Quit);
                return Ok(Flow::Quit);
            }
            "si" => self.cmd_si(args)?,
            "info" => self.cmd_info(args)?,
            "x" => self.cmd_x(args)?,
            "p" => self.cmd_p(args)?,
            "w" => self.cmd_w(args)?,
            "d" => self.cmd_d(args)?,
            "test" => self.cmd_test(args)?,
            _ => writeln!(self.out, "Unknown command '{cmd}'")?,
        }
        Ok(Flow::Continue)
    }

    fn cmd_help(&mut self, args: &str) -> Result<()> {
        if args.is_empty() {
            for (name, description) in COMMANDS {
                writeln!(self.out, "{name} - {description}")?;
            }
            return Ok(());
        }
        match COMMANDS.iter().find(|(name, _)| *name == args) {
            Some((name, description)) => writeln!(self.out, "{name} - {description}")?,
            None => writeln!(self.out, "Unknown command '{args}'")?,
        }
        Ok(())
    }

    fn cmd_si(&mut self, args: &str) -> Result<()> {
        let steps = match args {
            "" => 1,
            arg => match arg.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => bail!("si expects a positive instruction count, got `{arg}`"),
            },
        };
        self.exec(steps)
    }

    fn cmd_info(&mut self, args: &str) -> Result<()> {
        match args {
            "r" => {
                write!(self.out, "{}", self.cpu.regs())?;
                writeln!(self.out, "pc   {:#010x}", self.cpu.pc())?;
            }
            "w" => {
                if self.watchpoints.is_empty() {
                    writeln!(self.out, "No watchpoints.")?;
                } else {
                    writeln!(self.out, "Num  What")?;
                    for wp in self.watchpoints.iter() {
                        writeln!(self.out, "{:<4} {}", wp.id(), wp.expr())?;
                    }
                }
            }
            "" => bail!("info expects `r` or `w`"),
            other => bail!("unknown info subcommand `{other}`"),
        }
        Ok(())
    }

    fn cmd_x(&mut self, args: &str) -> Result<()> {
        let Some((count, text)) = args.split_once(char::is_whitespace) else {
            bail!("usage: x N EXPR");
        };
        let count: u32 = count
            .parse()
            .with_context(|| format!("invalid word count `{count}`"))?;
        let text = text.trim();
        let base = self
            .evaluate(text)
            .with_context(|| format!("cannot evaluate `{text}`"))?;

        for i in 0..count {
            let addr = base.wrapping_add(i.wrapping_mul(4));
            if i % 4 == 0 {
                if i > 0 {
                    writeln!(self.out)?;
                }
                write!(self.out, "{addr:#010x}:")?;
            }
            let word = self
                .cpu
                .memory()
                .read(addr, Width::Word)
                .with_context(|| format!("cannot read memory at {addr:#010x}"));
            let word = match word {
                Ok(word) => word,
                Err(err) => {
                    writeln!(self.out)?;
                    return Err(err);
                }
            };
            write!(self.out, "  {word:#010x}")?;
        }
        if count > 0 {
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn cmd_p(&mut self, args: &str) -> Result<()> {
        if args.is_empty() {
            bail!("p expects an expression");
        }
        let value = self
            .evaluate(args)
            .with_context(|| format!("cannot evaluate `{args}`"))?;
        writeln!(self.out, "{value:#010x}  {}", value as i32)?;
        Ok(())
    }

    fn cmd_w(&mut self, args: &str) -> Result<()> {
        if args.is_empty() {
            bail!("w expects an expression");
        }
        let id = self
            .set_watchpoint(args)
            .with_context(|| format!("cannot watch `{args}`"))?;
        writeln!(self.out, "Watchpoint {id}: {args}")?;
        Ok(())
    }

    fn cmd_d(&mut self, args: &str) -> Result<()> {
        let id: usize = args
            .parse()
            .with_context(|| format!("invalid watchpoint number `{args}`"))?;
        let wp = self.delete_watchpoint(id)?;
        writeln!(self.out, "Deleted watchpoint {}: {}", wp.id(), wp.expr())?;
        Ok(())
    }

    fn cmd_test(&mut self, args: &str) -> Result<()> {
        if args.is_empty() {
            bail!("test expects a file");
        }
        let path = Path::new(args);
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;

        let mut passed = 0;
        let mut total = 0;
        for (lineno, line) in text.lines().enumerate().map(|(i, l)| (i + 1, l.trim())) {
            if line.is_empty() {
                continue;
            }
            total += 1;
            let Some((expected, text)) = line.split_once(' ') else {
                writeln!(self.out, "line {lineno}: expected `EXPECTED EXPR`")?;
                continue;
            };
            let Ok(expected) = expected.parse::<u32>() else {
                writeln!(self.out, "line {lineno}: bad expected value `{expected}`")?;
                continue;
            };
            match self.evaluate(text) {
                Ok(value) if value == expected => passed += 1,
                Ok(value) => writeln!(
                    self.out,
                    "line {lineno}: `{text}` = {value}, expected {expected}"
                )?,
                Err(err) => writeln!(self.out, "line {lineno}: `{text}`: {err}")?,
            }
        }
        writeln!(self.out, "{passed}/{total} expressions passed")?;
        Ok(())
    }
}

/// Caret diagnostic for lexing failures anywhere in `err`'s chain.
fn expr_pointer(err: &anyhow::Error) -> Option<String> {
    err.chain()
        .find_map(|e| {
            e.downcast_ref::<ExprError>()
                .or_else(|| match e.downcast_ref::<WatchpointError>() {
                    Some(WatchpointError::Expr(inner)) => Some(inner),
                    _ => None,
                })
        })?
        .pointer()
}
