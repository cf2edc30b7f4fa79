use std::fmt;

use crate::encoding::{BType, Format, FormatKind, IType, JType, RType, SType, UType};
use crate::reg;

macro_rules! instruction_set {
    ($($name:ident($format:ident) => $mnemonic:literal,)*) => {
        /// Name of an instruction, as produced by the decision table.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum InstructionTag {
            $($name,)*
            /// No row of the decision table matched. Carries the raw word.
            Undefined(u32),
        }

        /// A fully decoded instruction: the tag plus the fields of its format.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Instruction {
            $($name($format),)*
            Undefined(u32),
        }

        impl InstructionTag {
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(InstructionTag::$name => $mnemonic,)*
                    InstructionTag::Undefined(_) => "undefined",
                }
            }

            /// Layout of the operand fields. `None` for `Undefined`.
            pub fn format(self) -> Option<FormatKind> {
                match self {
                    $(InstructionTag::$name => Some(<$format as Format>::KIND),)*
                    InstructionTag::Undefined(_) => None,
                }
            }
        }

        impl Instruction {
            /// Extract the fields `tag` calls for from `word`.
            pub(crate) fn from_tag(tag: InstructionTag, word: u32) -> Self {
                match tag {
                    $(InstructionTag::$name => Instruction::$name(<$format as Format>::from_word(word)),)*
                    InstructionTag::Undefined(raw) => Instruction::Undefined(raw),
                }
            }

            pub fn tag(&self) -> InstructionTag {
                match self {
                    $(Instruction::$name(_) => InstructionTag::$name,)*
                    Instruction::Undefined(raw) => InstructionTag::Undefined(*raw),
                }
            }

            /// Pack the instruction back into its 32-bit word.
            pub fn encode(&self) -> u32 {
                match self {
                    $(Instruction::$name(fields) => fields.encode(),)*
                    Instruction::Undefined(raw) => *raw,
                }
            }
        }
    };
}

instruction_set! {
    Lui(UType) => "lui",
    Auipc(UType) => "auipc",
    Jal(JType) => "jal",
    Jalr(IType) => "jalr",
    Beq(BType) => "beq",
    Bne(BType) => "bne",
    Blt(BType) => "blt",
    Bge(BType) => "bge",
    Bltu(BType) => "bltu",
    Bgeu(BType) => "bgeu",
    Lb(IType) => "lb",
    Lh(IType) => "lh",
    Lw(IType) => "lw",
    Lbu(IType) => "lbu",
    Lhu(IType) => "lhu",
    Sb(SType) => "sb",
    Sh(SType) => "sh",
    Sw(SType) => "sw",
    Addi(IType) => "addi",
    Slti(IType) => "slti",
    Sltiu(IType) => "sltiu",
    Xori(IType) => "xori",
    Ori(IType) => "ori",
    Andi(IType) => "andi",
    Slli(IType) => "slli",
    Srli(IType) => "srli",
    Srai(IType) => "srai",
    Add(RType) => "add",
    Sub(RType) => "sub",
    Sll(RType) => "sll",
    Slt(RType) => "slt",
    Sltu(RType) => "sltu",
    Xor(RType) => "xor",
    Srl(RType) => "srl",
    Sra(RType) => "sra",
    Or(RType) => "or",
    And(RType) => "and",
    Mul(RType) => "mul",
    Mulh(RType) => "mulh",
    Mulhsu(RType) => "mulhsu",
    Mulhu(RType) => "mulhu",
    Div(RType) => "div",
    Divu(RType) => "divu",
    Rem(RType) => "rem",
    Remu(RType) => "remu",
    Fence(IType) => "fence",
    Ecall(IType) => "ecall",
    Ebreak(IType) => "ebreak",
}

impl fmt::Display for InstructionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;

        let m = self.tag().mnemonic();
        match self {
            Lui(u) | Auipc(u) => write!(f, "{m} {}, {:#x}", reg::name(u.rd), u.imm & 0xF_FFFF),
            Jal(j) => write!(f, "{m} {}, {}", reg::name(j.rd), j.imm),
            Jalr(i) | Lb(i) | Lh(i) | Lw(i) | Lbu(i) | Lhu(i) => {
                write!(f, "{m} {}, {}({})", reg::name(i.rd), i.imm, reg::name(i.rs1))
            }
            Beq(b) | Bne(b) | Blt(b) | Bge(b) | Bltu(b) | Bgeu(b) => write!(
                f,
                "{m} {}, {}, {}",
                reg::name(b.rs1),
                reg::name(b.rs2),
                b.imm
            ),
            Sb(s) | Sh(s) | Sw(s) => {
                write!(f, "{m} {}, {}({})", reg::name(s.rs2), s.imm, reg::name(s.rs1))
            }
            Slli(i) | Srli(i) | Srai(i) => write!(
                f,
                "{m} {}, {}, {}",
                reg::name(i.rd),
                reg::name(i.rs1),
                i.shamt()
            ),
            Addi(i) | Slti(i) | Sltiu(i) | Xori(i) | Ori(i) | Andi(i) => write!(
                f,
                "{m} {}, {}, {}",
                reg::name(i.rd),
                reg::name(i.rs1),
                i.imm
            ),
            Add(r) | Sub(r) | Sll(r) | Slt(r) | Sltu(r) | Xor(r) | Srl(r) | Sra(r) | Or(r)
            | And(r) | Mul(r) | Mulh(r) | Mulhsu(r) | Mulhu(r) | Div(r) | Divu(r) | Rem(r)
            | Remu(r) => write!(
                f,
                "{m} {}, {}, {}",
                reg::name(r.rd),
                reg::name(r.rs1),
                reg::name(r.rs2)
            ),
            Fence(_) | Ecall(_) | Ebreak(_) => f.write_str(m),
            Undefined(word) => write!(f, ".word {word:#010x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;

    #[test]
    fn disassembles_common_shapes() {
        assert_eq!(decode(0x00A0_0093).to_string(), "addi ra, zero, 10");
        assert_eq!(decode(0x0081_2503).to_string(), "lw a0, 8(sp)");
        assert_eq!(decode(0x00A1_2423).to_string(), "sw a0, 8(sp)");
        assert_eq!(decode(0x00C5_8533).to_string(), "add a0, a1, a2");
        assert_eq!(decode(0x1234_50B7).to_string(), "lui ra, 0x12345");
        assert_eq!(decode(0x0000_0073).to_string(), "ecall");
        assert_eq!(decode(0xFFFF_FFFF).to_string(), ".word 0xffffffff");
    }

    #[test]
    fn tag_and_format_agree() {
        let i = decode(0x4010_5093); // srai ra, zero, 1
        assert_eq!(i.tag(), InstructionTag::Srai);
        assert_eq!(i.tag().format(), Some(FormatKind::I));
        assert_eq!(i.to_string(), "srai ra, zero, 1");
        assert_eq!(InstructionTag::Undefined(0).format(), None);
    }

    #[test]
    fn encode_inverts_decode() {
        for word in [0x00A0_0093, 0xFFF0_0093, 0xFE00_0EE3, 0x8000_006F, 0x4010_5093] {
            assert_eq!(decode(word).encode(), word, "{word:#010x}");
        }
    }
}
