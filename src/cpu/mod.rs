mod exec;
pub mod regs;

use log::{error, info, trace};
use thiserror::Error;

pub use exec::Decode;
pub use regs::RegisterFile;

use crate::{
    decoder::{DecodeError, decode},
    memory::{MemoryError, MemoryImage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Running,
    Stop,
    /// `ebreak` reached; `code` is the value of a0.
    End { pc: u32, code: u32 },
    Abort { pc: u32 },
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("memory fault at pc {pc:#010x}: {source}")]
    Memory {
        pc: u32,
        #[source]
        source: MemoryError,
    },
}

impl CpuError {
    pub fn pc(&self) -> u32 {
        match self {
            CpuError::Decode(DecodeError::InvalidInstruction { pc, .. }) => *pc,
            CpuError::Memory { pc, .. } => *pc,
        }
    }
}

pub struct Cpu {
    regs: RegisterFile,
    pc: u32,
    memory: MemoryImage,
    state: MachineState,
    executed: u64,
}

impl Cpu {
    pub fn new(memory: MemoryImage, entry: u32) -> Self {
        Self {
            regs: RegisterFile::new(),
            pc: entry,
            memory,
            state: MachineState::Stop,
            executed: 0,
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn memory(&self) -> &MemoryImage {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryImage {
        &mut self.memory
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn set_state(&mut self, state: MachineState) {
        self.state = state;
    }

    /// Number of instructions retired so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Halt signal raised by `ebreak`.
    pub fn trap(&mut self, pc: u32, code: u32) {
        info!("trap at pc {pc:#010x} with code {code}");
        self.state = MachineState::End { pc, code };
    }

    /// Fetch, decode and execute the instruction at `pc`.
    ///
    /// On error the machine moves to [`MachineState::Abort`] and `pc` stays
    /// on the faulting instruction.
    pub fn exec_once(&mut self) -> Result<(), CpuError> {
        let result = self.step();
        if let Err(err) = &result {
            error!("{err}");
            self.state = MachineState::Abort { pc: err.pc() };
        }
        result
    }

    fn step(&mut self) -> Result<(), CpuError> {
        let pc = self.pc;
        let word = self
            .memory
            .fetch(pc)
            .map_err(|source| CpuError::Memory { pc, source })?;
        let inst = decode(pc, word)?;
        trace!("{pc:#010x}: {word:08x}  {inst}");

        let mut s = Decode::new(inst, &self.regs);
        let result = exec::execute(self, &mut s);
        self.regs.clear_zero();
        result.map_err(|source| CpuError::Memory { pc, source })?;

        self.pc = s.dnpc;
        self.executed += 1;
        Ok(())
    }
}
