//! Word builders for hand-assembled guest code.
//!
//! Each function looks its selector bits up in [`ENCODINGS`] and packs the
//! operands, so the builders and the decoder share one table. An
//! `InstructionTag::Undefined` tag has no row; builders hand back its raw
//! word unchanged, the same way `Instruction::encode` does.

use crate::encoding::{BType, Encoding, Format, IType, JType, RType, SType, UType};
use crate::instruction::{Instruction, InstructionTag};

fn pack(tag: InstructionTag, operands: impl FnOnce(&Encoding) -> u32) -> u32 {
    match Encoding::of(tag) {
        Some(e) => operands(e),
        None => Instruction::from_tag(tag, 0).encode(),
    }
}

pub fn lui(rd: u8, imm20: i32) -> u32 {
    pack(InstructionTag::Lui, |e| {
        UType {
            opcode: e.opcode,
            rd,
            imm: imm20,
        }
        .encode()
    })
}

pub fn auipc(rd: u8, imm20: i32) -> u32 {
    pack(InstructionTag::Auipc, |e| {
        UType {
            opcode: e.opcode,
            rd,
            imm: imm20,
        }
        .encode()
    })
}

pub fn jal(rd: u8, offset: i32) -> u32 {
    debug_assert!(offset % 2 == 0);
    pack(InstructionTag::Jal, |e| {
        JType {
            opcode: e.opcode,
            rd,
            imm: offset,
        }
        .encode()
    })
}

/// I-type instruction: JALR, loads, OP-IMM (shifts take the shift amount as `imm`).
pub fn itype(tag: InstructionTag, rd: u8, rs1: u8, imm: i32) -> u32 {
    pack(tag, |e| {
        let selector = i32::from(e.funct7.unwrap_or(0)) << 5;
        IType {
            opcode: e.opcode,
            rd,
            funct3: e.funct3.unwrap_or(0),
            rs1,
            imm: imm | selector,
        }
        .encode()
    })
}

pub fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    itype(InstructionTag::Addi, rd, rs1, imm)
}

pub fn rtype(tag: InstructionTag, rd: u8, rs1: u8, rs2: u8) -> u32 {
    pack(tag, |e| {
        RType {
            opcode: e.opcode,
            rd,
            funct3: e.funct3.unwrap_or(0),
            rs1,
            rs2,
            funct7: e.funct7.unwrap_or(0),
        }
        .encode()
    })
}

/// Store `rs2` to `offset(rs1)`.
pub fn store(tag: InstructionTag, rs2: u8, rs1: u8, offset: i32) -> u32 {
    pack(tag, |e| {
        SType {
            opcode: e.opcode,
            funct3: e.funct3.unwrap_or(0),
            rs1,
            rs2,
            imm: offset,
        }
        .encode()
    })
}

pub fn branch(tag: InstructionTag, rs1: u8, rs2: u8, offset: i32) -> u32 {
    debug_assert!(offset % 2 == 0);
    pack(tag, |e| {
        BType {
            opcode: e.opcode,
            funct3: e.funct3.unwrap_or(0),
            rs1,
            rs2,
            imm: offset,
        }
        .encode()
    })
}

pub fn ecall() -> u32 {
    pack(InstructionTag::Ecall, Encoding::template)
}

pub fn ebreak() -> u32 {
    pack(InstructionTag::Ebreak, Encoding::template)
}

pub fn fence() -> u32 {
    pack(InstructionTag::Fence, Encoding::template)
}

/// Load a full 32-bit constant: `lui` + `addi`, with the carry from a
/// negative low half folded into the upper part.
pub fn li(rd: u8, value: u32) -> [u32; 2] {
    let low = ((value & 0xFFF) as i32) << 20 >> 20;
    let high = (value.wrapping_sub(low as u32) >> 12) as i32;
    [lui(rd, high), addi(rd, rd, low)]
}
