use crate::encoding::{bits, opcode};
use crate::instruction::{Instruction, InstructionTag};

/// Name the instruction in `word` from its opcode, funct3 and funct7 bits.
///
/// Total over all 32-bit words. Anything the decision table does not list
/// comes back as [`InstructionTag::Undefined`] with the word attached.
pub fn classify(word: u32) -> InstructionTag {
    use InstructionTag::*;

    let op = bits(word, 6, 0) as u8;
    let funct3 = bits(word, 14, 12);
    let funct7 = bits(word, 31, 25);

    match op {
        opcode::LUI => Lui,
        opcode::AUIPC => Auipc,
        opcode::JAL => Jal,
        opcode::JALR if funct3 == 0 => Jalr,
        opcode::BRANCH => match funct3 {
            0 => Beq,
            1 => Bne,
            4 => Blt,
            5 => Bge,
            6 => Bltu,
            7 => Bgeu,
            _ => Undefined(word),
        },
        opcode::LOAD => match funct3 {
            0 => Lb,
            1 => Lh,
            2 => Lw,
            4 => Lbu,
            5 => Lhu,
            _ => Undefined(word),
        },
        opcode::STORE => match funct3 {
            0 => Sb,
            1 => Sh,
            2 => Sw,
            _ => Undefined(word),
        },
        opcode::OP_IMM => match (funct3, funct7) {
            (0, _) => Addi,
            (2, _) => Slti,
            (3, _) => Sltiu,
            (4, _) => Xori,
            (6, _) => Ori,
            (7, _) => Andi,
            (1, 0x00) => Slli,
            (5, 0x00) => Srli,
            (5, 0x20) => Srai,
            _ => Undefined(word),
        },
        opcode::OP => match (funct7, funct3) {
            (0x00, 0) => Add,
            (0x00, 1) => Sll,
            (0x00, 2) => Slt,
            (0x00, 3) => Sltu,
            (0x00, 4) => Xor,
            (0x00, 5) => Srl,
            (0x00, 6) => Or,
            (0x00, 7) => And,
            (0x20, 0) => Sub,
            (0x20, 5) => Sra,
            (0x01, 0) => Mul,
            (0x01, 1) => Mulh,
            (0x01, 2) => Mulhsu,
            (0x01, 3) => Mulhu,
            (0x01, 4) => Div,
            (0x01, 5) => Divu,
            (0x01, 6) => Rem,
            (0x01, 7) => Remu,
            _ => Undefined(word),
        },
        opcode::MISC_MEM => Fence,
        opcode::SYSTEM => match (funct3, bits(word, 31, 20)) {
            (0, 0) => Ecall,
            (0, 1) => Ebreak,
            _ => Undefined(word),
        },
        _ => Undefined(word),
    }
}

/// Classify `word` and extract every field of its format.
pub fn decode(word: u32) -> Instruction {
    Instruction::from_tag(classify(word), word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{ENCODINGS, IType, RType};

    #[test]
    fn addi_literal_examples() {
        match decode(0x00A0_0093) {
            Instruction::Addi(IType {
                rd: 1,
                rs1: 0,
                imm: 10,
                ..
            }) => {}
            other => panic!("unexpected decode {other:?}"),
        }
        match decode(0xFFF0_0093) {
            Instruction::Addi(IType {
                rd: 1,
                rs1: 0,
                imm: -1,
                ..
            }) => {}
            other => panic!("unexpected decode {other:?}"),
        }
    }

    /// Every selector triple in the table classifies to its own row, whatever
    /// the free bits hold.
    #[test]
    fn table_sweep_classifies_every_row() {
        let noise = [0u32, 0xFFFF_FFFF, 0xA5A5_A5A5, 0x5A5A_5A5A];
        for e in ENCODINGS {
            let funct3s: Vec<u8> = e.funct3.map_or((0..8).collect(), |f| vec![f]);
            let funct7s: Vec<u8> = e.funct7.map_or((0..128).collect(), |f| vec![f]);
            for &f3 in &funct3s {
                for &f7 in &funct7s {
                    for n in noise {
                        let mut word = u32::from(e.opcode)
                            | u32::from(f3) << 12
                            | u32::from(f7) << 25;
                        // rd, rs1 and rs2 carry noise unless rs2 is a selector.
                        match e.rs2 {
                            Some(r) => word |= (n & 0x000F_8F80) | u32::from(r) << 20,
                            None => word |= n & 0x01FF_8F80,
                        }
                        assert_eq!(classify(word), e.tag, "{word:#010x}");
                        assert_eq!(decode(word).tag(), e.tag, "{word:#010x}");
                    }
                }
            }
        }
    }

    /// No triple is claimed by two rows, and classify returns `Undefined`
    /// exactly when no row claims it.
    #[test]
    fn table_is_unambiguous_and_total() {
        for op in 0..128u32 {
            for f3 in 0..8u32 {
                for f7 in 0..128u32 {
                    for rs2 in [0u32, 1, 2] {
                        let word = op | f3 << 12 | rs2 << 20 | f7 << 25;
                        let rows: Vec<_> = ENCODINGS.iter().filter(|e| e.matches(word)).collect();
                        assert!(rows.len() <= 1, "{word:#010x} matches {rows:?}");
                        match rows.first() {
                            Some(row) => assert_eq!(classify(word), row.tag),
                            None => assert_eq!(classify(word), InstructionTag::Undefined(word)),
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn unrecognized_triples_are_undefined() {
        // OP with funct7 = 0x20 and funct3 = 1 is not SLL, SUB or SRA.
        let word = RType {
            opcode: opcode::OP,
            rd: 1,
            funct3: 1,
            rs1: 2,
            rs2: 3,
            funct7: 0x20,
        };
        let w = crate::Format::encode(&word);
        assert_eq!(classify(w), InstructionTag::Undefined(w));
        assert_eq!(decode(w), Instruction::Undefined(w));

        // Load funct3 = 3 is LD in RV64 only.
        assert_eq!(classify(0x0000_3003), InstructionTag::Undefined(0x0000_3003));
        // CSR instructions are outside the supported set.
        assert_eq!(classify(0x3000_2073), InstructionTag::Undefined(0x3000_2073));
        assert_eq!(classify(0), InstructionTag::Undefined(0));
    }

    #[test]
    fn branch_offset_keeps_low_bit_zero() {
        // beq x0, x0, -2 is not encodable; -4 is.
        let b = crate::BType {
            opcode: opcode::BRANCH,
            funct3: 0,
            rs1: 0,
            rs2: 0,
            imm: -4,
        };
        match decode(crate::Format::encode(&b)) {
            Instruction::Beq(d) => assert_eq!(d.imm, -4),
            other => panic!("unexpected decode {other:?}"),
        }
    }
}
