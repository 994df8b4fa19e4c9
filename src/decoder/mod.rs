mod display;

use thiserror::Error;

use InstType::{B, I, J, N, R, S, U};

/// Field layout of an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstType {
    I,
    U,
    S,
    /// No operands.
    N,
    J,
    R,
    B,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lui,
    Auipc,
    Jal,
    Jalr,
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
    Sb,
    Sh,
    Sw,
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
    Ebreak,
    Inv,
}

/// A compiled `0`/`1`/`?` template: a word matches iff `word & mask == bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    pub mask: u32,
    pub bits: u32,
}

impl Pattern {
    /// Compile a template such as `"??????? ????? ????? 000 ????? 00100 11"`.
    /// Spaces are ignored; exactly 32 significant characters are required.
    /// Used in const context, so a malformed template fails the build.
    pub const fn new(template: &str) -> Self {
        let bytes = template.as_bytes();
        let mut mask = 0u32;
        let mut bits = 0u32;
        let mut count = 0;
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            i += 1;
            if c == b' ' {
                continue;
            }
            if count == 32 {
                panic!("instruction template longer than 32 bits");
            }
            mask <<= 1;
            bits <<= 1;
            match c {
                b'0' => mask |= 1,
                b'1' => {
                    mask |= 1;
                    bits |= 1;
                }
                b'?' => {}
                _ => panic!("instruction template may only contain 0, 1, ? and spaces"),
            }
            count += 1;
        }
        if count != 32 {
            panic!("instruction template shorter than 32 bits");
        }
        Self { mask, bits }
    }

    pub fn matches(&self, word: u32) -> bool {
        word & self.mask == self.bits
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InstPattern {
    pub name: &'static str,
    pub op: Op,
    pub ty: InstType,
    pub pattern: Pattern,
}

const fn inst(name: &'static str, op: Op, ty: InstType, template: &str) -> InstPattern {
    InstPattern {
        name,
        op,
        ty,
        pattern: Pattern::new(template),
    }
}

/// Instruction templates in match priority order. The first matching entry
/// wins, so the catch-all must stay last.
pub static PATTERNS: &[InstPattern] = &[
    inst("lui", Op::Lui, U, "??????? ????? ????? ??? ????? 01101 11"),
    inst("auipc", Op::Auipc, U, "??????? ????? ????? ??? ????? 00101 11"),
    inst("jal", Op::Jal, J, "??????? ????? ????? ??? ????? 11011 11"),
    inst("jalr", Op::Jalr, I, "??????? ????? ????? 000 ????? 11001 11"),
    inst("beq", Op::Beq, B, "??????? ????? ????? 000 ????? 11000 11"),
    inst("bne", Op::Bne, B, "??????? ????? ????? 001 ????? 11000 11"),
    inst("blt", Op::Blt, B, "??????? ????? ????? 100 ????? 11000 11"),
    inst("bge", Op::Bge, B, "??????? ????? ????? 101 ????? 11000 11"),
    inst("bltu", Op::Bltu, B, "??????? ????? ????? 110 ????? 11000 11"),
    inst("bgeu", Op::Bgeu, B, "??????? ????? ????? 111 ????? 11000 11"),
    inst("lb", Op::Lb, I, "??????? ????? ????? 000 ????? 00000 11"),
    inst("lh", Op::Lh, I, "??????? ????? ????? 001 ????? 00000 11"),
    inst("lw", Op::Lw, I, "??????? ????? ????? 010 ????? 00000 11"),
    inst("lbu", Op::Lbu, I, "??????? ????? ????? 100 ????? 00000 11"),
    inst("lhu", Op::Lhu, I, "??????? ????? ????? 101 ????? 00000 11"),
    inst("sb", Op::Sb, S, "??????? ????? ????? 000 ????? 01000 11"),
    inst("sh", Op::Sh, S, "??????? ????? ????? 001 ????? 01000 11"),
    inst("sw", Op::Sw, S, "??????? ????? ????? 010 ????? 01000 11"),
    inst("addi", Op::Addi, I, "??????? ????? ????? 000 ????? 00100 11"),
    inst("slti", Op::Slti, I, "??????? ????? ????? 010 ????? 00100 11"),
    inst("sltiu", Op::Sltiu, I, "??????? ????? ????? 011 ????? 00100 11"),
    inst("xori", Op::Xori, I, "??????? ????? ????? 100 ????? 00100 11"),
    inst("ori", Op::Ori, I, "??????? ????? ????? 110 ????? 00100 11"),
    inst("andi", Op::Andi, I, "??????? ????? ????? 111 ????? 00100 11"),
    inst("slli", Op::Slli, I, "0000000 ????? ????? 001 ????? 00100 11"),
    inst("srli", Op::Srli, I, "0000000 ????? ????? 101 ????? 00100 11"),
    inst("srai", Op::Srai, I, "0100000 ????? ????? 101 ????? 00100 11"),
    inst("add", Op::Add, R, "0000000 ????? ????? 000 ????? 01100 11"),
    inst("sub", Op::Sub, R, "0100000 ????? ????? 000 ????? 01100 11"),
    inst("sll", Op::Sll, R, "0000000 ????? ????? 001 ????? 01100 11"),
    inst("slt", Op::Slt, R, "0000000 ????? ????? 010 ????? 01100 11"),
    inst("sltu", Op::Sltu, R, "0000000 ????? ????? 011 ????? 01100 11"),
    inst("xor", Op::Xor, R, "0000000 ????? ????? 100 ????? 01100 11"),
    inst("srl", Op::Srl, R, "0000000 ????? ????? 101 ????? 01100 11"),
    inst("sra", Op::Sra, R, "0100000 ????? ????? 101 ????? 01100 11"),
    inst("or", Op::Or, R, "0000000 ????? ????? 110 ????? 01100 11"),
    inst("and", Op::And, R, "0000000 ????? ????? 111 ????? 01100 11"),
    inst("mul", Op::Mul, R, "0000001 ????? ????? 000 ????? 01100 11"),
    inst("mulh", Op::Mulh, R, "0000001 ????? ????? 001 ????? 01100 11"),
    inst("mulhsu", Op::Mulhsu, R, "0000001 ????? ????? 010 ????? 01100 11"),
    inst("mulhu", Op::Mulhu, R, "0000001 ????? ????? 011 ????? 01100 11"),
    inst("div", Op::Div, R, "0000001 ????? ????? 100 ????? 01100 11"),
    inst("divu", Op::Divu, R, "0000001 ????? ????? 101 ????? 01100 11"),
    inst("rem", Op::Rem, R, "0000001 ????? ????? 110 ????? 01100 11"),
    inst("remu", Op::Remu, R, "0000001 ????? ????? 111 ????? 01100 11"),
    inst("ebreak", Op::Ebreak, N, "0000000 00001 00000 000 00000 11100 11"),
    inst("inv", Op::Inv, N, "??????? ????? ????? ??? ????? ????? ??"),
];

/// A decoded instruction: the matched template plus its operand fields.
/// Register fields are indices; reading them is the executor's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub pc: u32,
    pub word: u32,
    pub name: &'static str,
    pub op: Op,
    pub ty: InstType,
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub imm: u32,
}

impl Instruction {
    pub fn uses_rs1(&self) -> bool {
        matches!(self.ty, InstType::I | InstType::S | InstType::R | InstType::B)
    }

    pub fn uses_rs2(&self) -> bool {
        matches!(self.ty, InstType::S | InstType::R | InstType::B)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid instruction {word:#010x} at pc {pc:#010x}")]
    InvalidInstruction { pc: u32, word: u32 },
}

/// Scan the template table in priority order. Always succeeds because the
/// last template matches every word.
pub fn match_pattern(word: u32) -> &'static InstPattern {
    PATTERNS
        .iter()
        .find(|p| p.pattern.matches(word))
        .unwrap_or(&PATTERNS[PATTERNS.len() - 1])
}

pub fn decode(pc: u32, word: u32) -> Result<Instruction, DecodeError> {
    let pat = match_pattern(word);
    if pat.op == Op::Inv {
        return Err(DecodeError::InvalidInstruction { pc, word });
    }

    let mut inst = Instruction {
        pc,
        word,
        name: pat.name,
        op: pat.op,
        ty: pat.ty,
        rd: bits(word, 11, 7) as u8,
        rs1: 0,
        rs2: 0,
        imm: 0,
    };
    if inst.uses_rs1() {
        inst.rs1 = bits(word, 19, 15) as u8;
    }
    if inst.uses_rs2() {
        inst.rs2 = bits(word, 24, 20) as u8;
    }
    inst.imm = immediate(word, pat.ty);
    Ok(inst)
}

fn immediate(word: u32, ty: InstType) -> u32 {
    match ty {
        InstType::I => sext(bits(word, 31, 20), 12),
        InstType::U => sext(bits(word, 31, 12), 20) << 12,
        InstType::S => sext((bits(word, 31, 25) << 5) | bits(word, 11, 7), 12),
        InstType::J => sext(
            (bits(word, 31, 31) << 20)
                | (bits(word, 19, 12) << 12)
                | (bits(word, 20, 20) << 11)
                | (bits(word, 30, 21) << 1),
            21,
        ),
        InstType::B => sext(
            (bits(word, 31, 31) << 12)
                | (bits(word, 7, 7) << 11)
                | (bits(word, 30, 25) << 5)
                | (bits(word, 11, 8) << 1),
            13,
        ),
        InstType::R | InstType::N => 0,
    }
}

/// Bits `hi..=lo` of `word`, shifted down to bit 0.
pub fn bits(word: u32, hi: u32, lo: u32) -> u32 {
    assert!(hi >= lo && hi < 32);
    let width = hi - lo + 1;
    let mask = if width == 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    };
    (word >> lo) & mask
}

/// Sign-extend the low `width` bits of `value` to 32 bits.
pub fn sext(value: u32, width: u32) -> u32 {
    assert!(width > 0 && width <= 32);
    let shift = 32 - width;
    (((value << shift) as i32) >> shift) as u32
}
