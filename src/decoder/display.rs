use super::{InstType, Instruction, Op};
use crate::cpu::regs::abi_name;
use std::fmt;

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rd = abi_name(self.rd);
        let rs1 = abi_name(self.rs1);
        let rs2 = abi_name(self.rs2);
        let imm = self.imm as i32;
        let name = self.name;

        match self.ty {
            InstType::U => write!(f, "{name} {rd}, {:#x}", self.imm >> 12),
            InstType::J => write!(f, "{name} {rd}, {:#010x}", self.pc.wrapping_add(self.imm)),
            InstType::B => write!(
                f,
                "{name} {rs1}, {rs2}, {:#010x}",
                self.pc.wrapping_add(self.imm)
            ),
            InstType::S => write!(f, "{name} {rs2}, {imm}({rs1})"),
            InstType::R => write!(f, "{name} {rd}, {rs1}, {rs2}"),
            InstType::N => f.write_str(name),
            InstType::I => match self.op {
                Op::Lb | Op::Lh | Op::Lw | Op::Lbu | Op::Lhu | Op::Jalr => {
                    write!(f, "{name} {rd}, {imm}({rs1})")
                }
                Op::Slli | Op::Srli | Op::Srai => {
                    write!(f, "{name} {rd}, {rs1}, {}", self.imm & 0x1f)
                }
                _ => write!(f, "{name} {rd}, {rs1}, {imm}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::decoder::decode;

    fn disasm(pc: u32, word: u32) -> String {
        decode(pc, word).unwrap().to_string()
    }

    #[test]
    fn formats_each_class() {
        insta::assert_snapshot!(disasm(0, 0xfff0_0513), @"addi a0, $0, -1");
        insta::assert_snapshot!(disasm(0, 0x8000_02b7), @"lui t0, 0x80000");
        insta::assert_snapshot!(disasm(0, 0xfeb1_2e23), @"sw a1, -4(sp)");
        insta::assert_snapshot!(disasm(0x8000_0010, 0xfeb5_0ce3), @"beq a0, a1, 0x80000008");
        insta::assert_snapshot!(disasm(0x8000_0000, 0x0080_00ef), @"jal ra, 0x80000008");
        insta::assert_snapshot!(disasm(0, 0x0053_0333), @"add t1, t1, t0");
        insta::assert_snapshot!(disasm(0, 0x4035_5513), @"srai a0, a0, 3");
        insta::assert_snapshot!(disasm(0, 0x0003_2703), @"lw a4, 0(t1)");
        insta::assert_snapshot!(disasm(0, 0x0010_0073), @"ebreak");
    }
}
