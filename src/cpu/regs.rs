use std::fmt;

/// ABI names of the general purpose registers, indexed by register number.
pub const ABI_NAMES: [&str; 32] = [
    "$0", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

/// Register holding the exit code reported by `ebreak`.
pub const A0: usize = 10;

pub fn abi_name(index: u8) -> &'static str {
    ABI_NAMES[(index & 0x1f) as usize]
}

#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    gpr: [u32; 32],
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register 0 always reads as zero.
    pub fn read(&self, index: usize) -> u32 {
        if index == 0 { 0 } else { self.gpr[index & 0x1f] }
    }

    /// Writes land in the backing array even for index 0; the CPU clears it
    /// again after each instruction.
    pub fn write(&mut self, index: usize, value: u32) {
        self.gpr[index & 0x1f] = value;
    }

    pub fn clear_zero(&mut self) {
        self.gpr[0] = 0;
    }

    /// Raw backing value, including a not-yet-cleared x0.
    pub fn raw(&self, index: usize) -> u32 {
        self.gpr[index & 0x1f]
    }

    /// Resolve a register name: ABI names, `zero`, `0`, `$0` and `x0`..`x31`.
    /// A leading `$` is accepted and ignored.
    pub fn index_of(name: &str) -> Option<usize> {
        let name = name.strip_prefix('$').unwrap_or(name);
        if name == "0" || name == "zero" {
            return Some(0);
        }
        if name == "fp" {
            return Some(8);
        }
        if let Some(pos) = ABI_NAMES.iter().position(|n| *n == name) {
            return Some(pos);
        }
        let num = name.strip_prefix('x')?;
        if num.is_empty() || (num.len() > 1 && num.starts_with('0')) {
            return None;
        }
        num.parse::<usize>().ok().filter(|n| *n < 32)
    }
}

/// `info r` formatting: name, hex value and signed decimal value per line.
impl fmt::Display for RegisterFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in ABI_NAMES.iter().enumerate() {
            let value = self.read(i);
            writeln!(f, "{name:<4} {value:#010x} {}", value as i32)?;
        }
        Ok(())
    }
}
