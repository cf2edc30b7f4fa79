//! Bit layouts of the six base instruction formats.
//!
//! ```text
//!         31        25 24   20 19   15 14  12 11        7 6      0
//! R-type  | funct7    | rs2   | rs1   |funct3| rd        | opcode |
//! I-type  | imm[11:0]         | rs1   |funct3| rd        | opcode |
//! S-type  | imm[11:5] | rs2   | rs1   |funct3| imm[4:0]  | opcode |
//! B-type  |12| [10:5] | rs2   | rs1   |funct3|[4:1] |11  | opcode |
//! U-type  | imm[31:12]                       | rd        | opcode |
//! J-type  |20| imm[10:1]    |11| imm[19:12]  | rd        | opcode |
//! ```

use crate::instruction::InstructionTag;

/// Major opcodes (bits 0..=6).
pub mod opcode {
    pub const LUI: u8 = 0b011_0111;
    pub const AUIPC: u8 = 0b001_0111;
    pub const JAL: u8 = 0b110_1111;
    pub const JALR: u8 = 0b110_0111;
    pub const BRANCH: u8 = 0b110_0011;
    pub const LOAD: u8 = 0b000_0011;
    pub const STORE: u8 = 0b010_0011;
    pub const OP_IMM: u8 = 0b001_0011;
    pub const OP: u8 = 0b011_0011;
    pub const MISC_MEM: u8 = 0b000_1111;
    pub const SYSTEM: u8 = 0b111_0011;
}

#[inline]
pub(crate) fn bits(word: u32, hi: u32, lo: u32) -> u32 {
    (word >> lo) & ((1u32 << (hi - lo + 1)) - 1)
}

/// Sign-extend the low `width` bits of `value`.
#[inline]
pub(crate) fn sext(value: u32, width: u32) -> i32 {
    let shift = 32 - width;
    ((value << shift) as i32) >> shift
}

#[inline]
fn field(value: u32, width: u32, lo: u32) -> u32 {
    (value & ((1u32 << width) - 1)) << lo
}

/// Which of the six layouts a word uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    R,
    I,
    S,
    B,
    U,
    J,
}

/// A format's field set: extracted from a word, packed back into one.
pub trait Format: Copy + Sized {
    const KIND: FormatKind;

    /// Extract every field this format defines.
    fn from_word(word: u32) -> Self;

    /// Pack the fields into a word. Out-of-range values are truncated to their width.
    fn encode(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RType {
    pub opcode: u8,
    pub rd: u8,
    pub funct3: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub funct7: u8,
}

impl Format for RType {
    const KIND: FormatKind = FormatKind::R;

    fn from_word(word: u32) -> Self {
        Self {
            opcode: bits(word, 6, 0) as u8,
            rd: bits(word, 11, 7) as u8,
            funct3: bits(word, 14, 12) as u8,
            rs1: bits(word, 19, 15) as u8,
            rs2: bits(word, 24, 20) as u8,
            funct7: bits(word, 31, 25) as u8,
        }
    }

    fn encode(&self) -> u32 {
        field(self.opcode.into(), 7, 0)
            | field(self.rd.into(), 5, 7)
            | field(self.funct3.into(), 3, 12)
            | field(self.rs1.into(), 5, 15)
            | field(self.rs2.into(), 5, 20)
            | field(self.funct7.into(), 7, 25)
    }
}

/// I-type. `imm` is the sign-extended 12-bit immediate; for shifts its low
/// five bits are the shift amount and bits 5..=11 the function selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IType {
    pub opcode: u8,
    pub rd: u8,
    pub funct3: u8,
    pub rs1: u8,
    pub imm: i32,
}

impl IType {
    pub fn shamt(&self) -> u32 {
        (self.imm as u32) & 0x1F
    }
}

impl Format for IType {
    const KIND: FormatKind = FormatKind::I;

    fn from_word(word: u32) -> Self {
        Self {
            opcode: bits(word, 6, 0) as u8,
            rd: bits(word, 11, 7) as u8,
            funct3: bits(word, 14, 12) as u8,
            rs1: bits(word, 19, 15) as u8,
            imm: sext(bits(word, 31, 20), 12),
        }
    }

    fn encode(&self) -> u32 {
        field(self.opcode.into(), 7, 0)
            | field(self.rd.into(), 5, 7)
            | field(self.funct3.into(), 3, 12)
            | field(self.rs1.into(), 5, 15)
            | field(self.imm as u32, 12, 20)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SType {
    pub opcode: u8,
    pub funct3: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub imm: i32,
}

impl Format for SType {
    const KIND: FormatKind = FormatKind::S;

    fn from_word(word: u32) -> Self {
        let raw = (bits(word, 31, 25) << 5) | bits(word, 11, 7);
        Self {
            opcode: bits(word, 6, 0) as u8,
            funct3: bits(word, 14, 12) as u8,
            rs1: bits(word, 19, 15) as u8,
            rs2: bits(word, 24, 20) as u8,
            imm: sext(raw, 12),
        }
    }

    fn encode(&self) -> u32 {
        let imm = self.imm as u32;
        field(self.opcode.into(), 7, 0)
            | field(imm, 5, 7)
            | field(self.funct3.into(), 3, 12)
            | field(self.rs1.into(), 5, 15)
            | field(self.rs2.into(), 5, 20)
            | field(imm >> 5, 7, 25)
    }
}

/// B-type. `imm` is the signed byte offset; bit 0 is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BType {
    pub opcode: u8,
    pub funct3: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub imm: i32,
}

impl Format for BType {
    const KIND: FormatKind = FormatKind::B;

    fn from_word(word: u32) -> Self {
        let raw = (bits(word, 31, 31) << 12)
            | (bits(word, 7, 7) << 11)
            | (bits(word, 30, 25) << 5)
            | (bits(word, 11, 8) << 1);
        Self {
            opcode: bits(word, 6, 0) as u8,
            funct3: bits(word, 14, 12) as u8,
            rs1: bits(word, 19, 15) as u8,
            rs2: bits(word, 24, 20) as u8,
            imm: sext(raw, 13),
        }
    }

    fn encode(&self) -> u32 {
        let imm = self.imm as u32;
        field(self.opcode.into(), 7, 0)
            | field(imm >> 11, 1, 7)
            | field(imm >> 1, 4, 8)
            | field(self.funct3.into(), 3, 12)
            | field(self.rs1.into(), 5, 15)
            | field(self.rs2.into(), 5, 20)
            | field(imm >> 5, 6, 25)
            | field(imm >> 12, 1, 31)
    }
}

/// U-type. `imm` is the signed 20-bit upper immediate, not yet shifted into
/// bits 12..=31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UType {
    pub opcode: u8,
    pub rd: u8,
    pub imm: i32,
}

impl UType {
    /// The immediate as it lands in a register: `imm << 12`.
    pub fn value(&self) -> u32 {
        (self.imm as u32) << 12
    }
}

impl Format for UType {
    const KIND: FormatKind = FormatKind::U;

    fn from_word(word: u32) -> Self {
        Self {
            opcode: bits(word, 6, 0) as u8,
            rd: bits(word, 11, 7) as u8,
            imm: sext(bits(word, 31, 12), 20),
        }
    }

    fn encode(&self) -> u32 {
        field(self.opcode.into(), 7, 0)
            | field(self.rd.into(), 5, 7)
            | field(self.imm as u32, 20, 12)
    }
}

/// J-type. `imm` is the signed byte offset; bit 0 is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JType {
    pub opcode: u8,
    pub rd: u8,
    pub imm: i32,
}

impl Format for JType {
    const KIND: FormatKind = FormatKind::J;

    fn from_word(word: u32) -> Self {
        let raw = (bits(word, 31, 31) << 20)
            | (bits(word, 19, 12) << 12)
            | (bits(word, 20, 20) << 11)
            | (bits(word, 30, 21) << 1);
        Self {
            opcode: bits(word, 6, 0) as u8,
            rd: bits(word, 11, 7) as u8,
            imm: sext(raw, 21),
        }
    }

    fn encode(&self) -> u32 {
        let imm = self.imm as u32;
        field(self.opcode.into(), 7, 0)
            | field(self.rd.into(), 5, 7)
            | field(imm >> 12, 8, 12)
            | field(imm >> 11, 1, 20)
            | field(imm >> 1, 10, 21)
            | field(imm >> 20, 1, 31)
    }
}

/// One row of the decision table: the selector bits that name an instruction.
///
/// `None` means the field is not part of the selector (it holds operand or
/// immediate bits). `rs2` only participates for ECALL/EBREAK, whose immediate
/// distinguishes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    pub tag: InstructionTag,
    pub opcode: u8,
    pub funct3: Option<u8>,
    pub funct7: Option<u8>,
    pub rs2: Option<u8>,
}

impl Encoding {
    const fn new(tag: InstructionTag, opcode: u8, funct3: Option<u8>, funct7: Option<u8>) -> Self {
        Self {
            tag,
            opcode,
            funct3,
            funct7,
            rs2: None,
        }
    }

    /// Whether a word's selector bits match this row.
    pub fn matches(&self, word: u32) -> bool {
        bits(word, 6, 0) as u8 == self.opcode
            && self.funct3.is_none_or(|f| bits(word, 14, 12) as u8 == f)
            && self.funct7.is_none_or(|f| bits(word, 31, 25) as u8 == f)
            && self.rs2.is_none_or(|r| bits(word, 24, 20) as u8 == r)
    }

    /// The smallest word carrying this row's selector bits; all operands zero.
    pub fn template(&self) -> u32 {
        field(self.opcode.into(), 7, 0)
            | field(self.funct3.unwrap_or(0).into(), 3, 12)
            | field(self.rs2.unwrap_or(0).into(), 5, 20)
            | field(self.funct7.unwrap_or(0).into(), 7, 25)
    }

    /// Row for `tag`, if the tag is defined.
    pub fn of(tag: InstructionTag) -> Option<&'static Encoding> {
        ENCODINGS.iter().find(|e| e.tag == tag)
    }
}

use InstructionTag as T;
use opcode as op;

/// Every defined RV32IM encoding.
pub const ENCODINGS: &[Encoding] = &[
    Encoding::new(T::Lui, op::LUI, None, None),
    Encoding::new(T::Auipc, op::AUIPC, None, None),
    Encoding::new(T::Jal, op::JAL, None, None),
    Encoding::new(T::Jalr, op::JALR, Some(0), None),
    Encoding::new(T::Beq, op::BRANCH, Some(0), None),
    Encoding::new(T::Bne, op::BRANCH, Some(1), None),
    Encoding::new(T::Blt, op::BRANCH, Some(4), None),
    Encoding::new(T::Bge, op::BRANCH, Some(5), None),
    Encoding::new(T::Bltu, op::BRANCH, Some(6), None),
    Encoding::new(T::Bgeu, op::BRANCH, Some(7), None),
    Encoding::new(T::Lb, op::LOAD, Some(0), None),
    Encoding::new(T::Lh, op::LOAD, Some(1), None),
    Encoding::new(T::Lw, op::LOAD, Some(2), None),
    Encoding::new(T::Lbu, op::LOAD, Some(4), None),
    Encoding::new(T::Lhu, op::LOAD, Some(5), None),
    Encoding::new(T::Sb, op::STORE, Some(0), None),
    Encoding::new(T::Sh, op::STORE, Some(1), None),
    Encoding::new(T::Sw, op::STORE, Some(2), None),
    Encoding::new(T::Addi, op::OP_IMM, Some(0), None),
    Encoding::new(T::Slti, op::OP_IMM, Some(2), None),
    Encoding::new(T::Sltiu, op::OP_IMM, Some(3), None),
    Encoding::new(T::Xori, op::OP_IMM, Some(4), None),
    Encoding::new(T::Ori, op::OP_IMM, Some(6), None),
    Encoding::new(T::Andi, op::OP_IMM, Some(7), None),
    Encoding::new(T::Slli, op::OP_IMM, Some(1), Some(0x00)),
    Encoding::new(T::Srli, op::OP_IMM, Some(5), Some(0x00)),
    Encoding::new(T::Srai, op::OP_IMM, Some(5), Some(0x20)),
    Encoding::new(T::Add, op::OP, Some(0), Some(0x00)),
    Encoding::new(T::Sub, op::OP, Some(0), Some(0x20)),
    Encoding::new(T::Sll, op::OP, Some(1), Some(0x00)),
    Encoding::new(T::Slt, op::OP, Some(2), Some(0x00)),
    Encoding::new(T::Sltu, op::OP, Some(3), Some(0x00)),
    Encoding::new(T::Xor, op::OP, Some(4), Some(0x00)),
    Encoding::new(T::Srl, op::OP, Some(5), Some(0x00)),
    Encoding::new(T::Sra, op::OP, Some(5), Some(0x20)),
    Encoding::new(T::Or, op::OP, Some(6), Some(0x00)),
    Encoding::new(T::And, op::OP, Some(7), Some(0x00)),
    Encoding::new(T::Mul, op::OP, Some(0), Some(0x01)),
    Encoding::new(T::Mulh, op::OP, Some(1), Some(0x01)),
    Encoding::new(T::Mulhsu, op::OP, Some(2), Some(0x01)),
    Encoding::new(T::Mulhu, op::OP, Some(3), Some(0x01)),
    Encoding::new(T::Div, op::OP, Some(4), Some(0x01)),
    Encoding::new(T::Divu, op::OP, Some(5), Some(0x01)),
    Encoding::new(T::Rem, op::OP, Some(6), Some(0x01)),
    Encoding::new(T::Remu, op::OP, Some(7), Some(0x01)),
    Encoding::new(T::Fence, op::MISC_MEM, None, None),
    Encoding {
        tag: T::Ecall,
        opcode: op::SYSTEM,
        funct3: Some(0),
        funct7: Some(0),
        rs2: Some(0),
    },
    Encoding {
        tag: T::Ebreak,
        opcode: op::SYSTEM,
        funct3: Some(0),
        funct7: Some(0),
        rs2: Some(1),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{any, prop_assert_eq, proptest};

    #[test]
    fn sext_propagates_sign() {
        assert_eq!(sext(0xFFF, 12), -1);
        assert_eq!(sext(0x7FF, 12), 2047);
        assert_eq!(sext(0x800, 12), -2048);
        assert_eq!(sext(0x1000, 13), -4096);
    }

    #[test]
    fn rtype_fields_round_trip() {
        proptest!(|(
            opcode in 0..128_u8,
            rd in 0..32_u8,
            funct3 in 0..8_u8,
            rs1 in 0..32_u8,
            rs2 in 0..32_u8,
            funct7 in 0..128_u8,
        )| {
            let r = RType { opcode, rd, funct3, rs1, rs2, funct7 };
            prop_assert_eq!(RType::from_word(r.encode()), r);
        });
    }

    #[test]
    fn every_format_repacks_any_word() {
        proptest!(|(word in any::<u32>())| {
            prop_assert_eq!(RType::from_word(word).encode(), word);
            prop_assert_eq!(IType::from_word(word).encode(), word);
            prop_assert_eq!(SType::from_word(word).encode(), word);
            prop_assert_eq!(UType::from_word(word).encode(), word);
            // Bit 0 of a B or J offset is implicit, so every word bit still has a field.
            prop_assert_eq!(BType::from_word(word).encode(), word);
            prop_assert_eq!(JType::from_word(word).encode(), word);
        });
    }

    #[test]
    fn itype_immediate_full_range() {
        for imm in -2048..=2047 {
            let i = IType {
                opcode: opcode::OP_IMM,
                rd: 3,
                funct3: 0,
                rs1: 4,
                imm,
            };
            assert_eq!(IType::from_word(i.encode()), i, "imm {imm}");
        }
    }

    #[test]
    fn stype_immediate_full_range() {
        for imm in -2048..=2047 {
            let s = SType {
                opcode: opcode::STORE,
                funct3: 2,
                rs1: 2,
                rs2: 31,
                imm,
            };
            assert_eq!(SType::from_word(s.encode()), s, "imm {imm}");
        }
    }

    #[test]
    fn btype_immediate_full_range() {
        for imm in (-4096..=4094).step_by(2) {
            let b = BType {
                opcode: opcode::BRANCH,
                funct3: 1,
                rs1: 10,
                rs2: 11,
                imm,
            };
            let back = BType::from_word(b.encode());
            assert_eq!(back, b, "imm {imm}");
            assert_eq!(back.imm & 1, 0);
        }
    }

    #[test]
    fn utype_immediate_full_range() {
        proptest!(|(rd in 0..32_u8, imm in -(1 << 19)..(1 << 19))| {
            let u = UType { opcode: opcode::LUI, rd, imm };
            prop_assert_eq!(UType::from_word(u.encode()), u);
        });
        for imm in [-(1 << 19), -1, 0, (1 << 19) - 1] {
            let u = UType {
                opcode: opcode::LUI,
                rd: 7,
                imm,
            };
            assert_eq!(UType::from_word(u.encode()), u, "imm {imm}");
        }
    }

    #[test]
    fn jtype_immediate_full_range() {
        proptest!(|(rd in 0..32_u8, half in -(1 << 19)..(1 << 19))| {
            let j = JType { opcode: opcode::JAL, rd, imm: half * 2 };
            let back = JType::from_word(j.encode());
            prop_assert_eq!(back, j);
            prop_assert_eq!(back.imm & 1, 0);
        });
        for imm in [-(1 << 20), (1 << 20) - 2, -2, 0, 2, 2046, 2048] {
            let j = JType {
                opcode: opcode::JAL,
                rd: 1,
                imm,
            };
            assert_eq!(JType::from_word(j.encode()), j, "imm {imm}");
        }
    }

    #[test]
    fn utype_value_places_bits_high() {
        let u = UType::from_word(0x1234_5037);
        assert_eq!(u.imm, 0x12345);
        assert_eq!(u.value(), 0x1234_5000);
        let neg = UType::from_word(0xFFFF_F037);
        assert_eq!(neg.imm, -1);
        assert_eq!(neg.value(), 0xFFFF_F000);
    }

    #[test]
    fn templates_match_their_rows() {
        for e in ENCODINGS {
            assert!(e.matches(e.template()), "{:?}", e.tag);
        }
    }
}
