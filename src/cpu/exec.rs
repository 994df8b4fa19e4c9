use super::{Cpu, regs::A0};
use crate::{
    cpu::RegisterFile,
    decoder::{Instruction, Op},
    memory::{MemoryError, Width},
};

/// Per-instruction execution context. Source operands are values already
/// read from the register file, not indices.
#[derive(Debug, Clone, Copy)]
pub struct Decode {
    pub inst: Instruction,
    pub pc: u32,
    /// Static next pc, always `pc + 4`.
    pub snpc: u32,
    /// Dynamic next pc; starts at `snpc` and may be redirected.
    pub dnpc: u32,
    pub rd: usize,
    pub src1: u32,
    pub src2: u32,
    pub imm: u32,
}

impl Decode {
    pub fn new(inst: Instruction, regs: &RegisterFile) -> Self {
        let snpc = inst.pc.wrapping_add(4);
        Self {
            inst,
            pc: inst.pc,
            snpc,
            dnpc: snpc,
            rd: inst.rd as usize,
            src1: if inst.uses_rs1() { regs.read(inst.rs1 as usize) } else { 0 },
            src2: if inst.uses_rs2() { regs.read(inst.rs2 as usize) } else { 0 },
            imm: inst.imm,
        }
    }
}

pub(super) fn execute(cpu: &mut Cpu, s: &mut Decode) -> Result<(), MemoryError> {
    let (src1, src2, imm) = (s.src1, s.src2, s.imm);
    let addr = src1.wrapping_add(imm);

    let value = match s.inst.op {
        Op::Lui => imm,
        Op::Auipc => s.pc.wrapping_add(imm),
        Op::Jal => {
            s.dnpc = s.pc.wrapping_add(imm);
            s.snpc
        }
        Op::Jalr => {
            s.dnpc = addr & !1;
            s.snpc
        }
        Op::Beq | Op::Bne | Op::Blt | Op::Bge | Op::Bltu | Op::Bgeu => {
            if branch_taken(s.inst.op, src1, src2) {
                s.dnpc = s.pc.wrapping_add(imm);
            }
            return Ok(());
        }
        Op::Lb => cpu.memory.read(addr, Width::Byte)? as u8 as i8 as i32 as u32,
        Op::Lh => cpu.memory.read(addr, Width::Half)? as u16 as i16 as i32 as u32,
        Op::Lw => cpu.memory.read(addr, Width::Word)?,
        Op::Lbu => cpu.memory.read(addr, Width::Byte)?,
        Op::Lhu => cpu.memory.read(addr, Width::Half)?,
        Op::Sb | Op::Sh | Op::Sw => {
            let width = match s.inst.op {
                Op::Sb => Width::Byte,
                Op::Sh => Width::Half,
                _ => Width::Word,
            };
            return cpu.memory.write(addr, width, src2);
        }
        Op::Ebreak => {
            cpu.trap(s.pc, cpu.regs.read(A0));
            return Ok(());
        }
        Op::Inv => unreachable!("invalid instructions are rejected by the decoder"),
        op => alu(op, src1, if s.inst.uses_rs2() { src2 } else { imm }),
    };

    cpu.regs.write(s.rd, value);
    Ok(())
}

fn branch_taken(op: Op, a: u32, b: u32) -> bool {
    match op {
        Op::Beq => a == b,
        Op::Bne => a != b,
        Op::Blt => (a as i32) < (b as i32),
        Op::Bge => (a as i32) >= (b as i32),
        Op::Bltu => a < b,
        Op::Bgeu => a >= b,
        _ => false,
    }
}

/// Register-register and register-immediate arithmetic. `b` is either the
/// second source value or the immediate.
fn alu(op: Op, a: u32, b: u32) -> u32 {
    let shamt = b & 0x1f;
    match op {
        Op::Add | Op::Addi => a.wrapping_add(b),
        Op::Sub => a.wrapping_sub(b),
        Op::Sll | Op::Slli => a << shamt,
        Op::Srl | Op::Srli => a >> shamt,
        Op::Sra | Op::Srai => ((a as i32) >> shamt) as u32,
        Op::Slt | Op::Slti => ((a as i32) < (b as i32)) as u32,
        Op::Sltu | Op::Sltiu => (a < b) as u32,
        Op::Xor | Op::Xori => a ^ b,
        Op::Or | Op::Ori => a | b,
        Op::And | Op::Andi => a & b,
        Op::Mul => a.wrapping_mul(b),
        Op::Mulh => ((a as i32 as i64 * b as i32 as i64) >> 32) as u32,
        Op::Mulhsu => ((a as i32 as i64 * b as u64 as i64) >> 32) as u32,
        Op::Mulhu => ((a as u64 * b as u64) >> 32) as u32,
        // Division by zero and overflow follow the RISC-V M extension.
        Op::Div => match b {
            0 => u32::MAX,
            _ => (a as i32).wrapping_div(b as i32) as u32,
        },
        Op::Divu => a.checked_div(b).unwrap_or(u32::MAX),
        Op::Rem => match b {
            0 => a,
            _ => (a as i32).wrapping_rem(b as i32) as u32,
        },
        Op::Remu => a.checked_rem(b).unwrap_or(a),
        _ => unreachable!("{op:?} is not an ALU operation"),
    }
}
