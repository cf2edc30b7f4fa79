use rvfleet_isa::{IType, Instruction, RType};
use rvfleet_memory::Width;

use crate::processor::{Processor, StepOutcome};
use crate::trap::Trap;

fn div(a: u32, b: u32) -> u32 {
    let (a, b) = (a as i32, b as i32);
    if b == 0 { u32::MAX } else { a.wrapping_div(b) as u32 }
}

fn divu(a: u32, b: u32) -> u32 {
    a.checked_div(b).unwrap_or(u32::MAX)
}

fn rem(a: u32, b: u32) -> u32 {
    let (sa, sb) = (a as i32, b as i32);
    if sb == 0 { a } else { sa.wrapping_rem(sb) as u32 }
}

fn remu(a: u32, b: u32) -> u32 {
    a.checked_rem(b).unwrap_or(a)
}

fn mulh(a: u32, b: u32) -> u32 {
    ((i64::from(a as i32) * i64::from(b as i32)) >> 32) as u32
}

fn mulhsu(a: u32, b: u32) -> u32 {
    ((i64::from(a as i32) * i64::from(b)) >> 32) as u32
}

fn mulhu(a: u32, b: u32) -> u32 {
    ((u64::from(a) * u64::from(b)) >> 32) as u32
}

impl Processor {
    fn op(&mut self, r: RType, f: impl FnOnce(u32, u32) -> u32) {
        let value = f(self.regs.get(r.rs1), self.regs.get(r.rs2));
        self.regs.set(r.rd, value);
    }

    fn op_imm(&mut self, i: IType, f: impl FnOnce(u32, u32) -> u32) {
        let value = f(self.regs.get(i.rs1), i.imm as u32);
        self.regs.set(i.rd, value);
    }

    fn load(&mut self, i: IType, pc: u32, width: Width, signed: bool) -> Result<(), Trap> {
        let address = self.regs.get(i.rs1).wrapping_add(i.imm as u32);
        let raw = self
            .bus
            .load(address, width)
            .map_err(|fault| Trap::Bus { pc, fault })?;
        let value = match (width, signed) {
            (Width::Byte, true) => raw as u8 as i8 as i32 as u32,
            (Width::Half, true) => raw as u16 as i16 as i32 as u32,
            _ => raw,
        };
        self.regs.set(i.rd, value);
        Ok(())
    }

    fn store(&mut self, rs1: u8, rs2: u8, imm: i32, pc: u32, width: Width) -> Result<(), Trap> {
        let address = self.regs.get(rs1).wrapping_add(imm as u32);
        let value = self.regs.get(rs2);
        self.bus
            .store(address, width, value)
            .map_err(|fault| Trap::Bus { pc, fault })
    }

    /// Execute a decoded instruction fetched from `pc`.
    pub(crate) fn execute(&mut self, instruction: Instruction, pc: u32) -> Result<StepOutcome, Trap> {
        use Instruction::*;

        let mut next = pc.wrapping_add(4);
        let mut outcome = StepOutcome::Continue;

        let branch = |taken: bool, offset: i32| {
            if taken {
                pc.wrapping_add(offset as u32)
            } else {
                pc.wrapping_add(4)
            }
        };

        match instruction {
            Lui(u) => self.regs.set(u.rd, u.value()),
            Auipc(u) => self.regs.set(u.rd, pc.wrapping_add(u.value())),
            Jal(j) => {
                self.regs.set(j.rd, next);
                next = pc.wrapping_add(j.imm as u32);
            }
            Jalr(i) => {
                let target = self.regs.get(i.rs1).wrapping_add(i.imm as u32) & !1;
                self.regs.set(i.rd, next);
                next = target;
            }

            Beq(b) => next = branch(self.regs.get(b.rs1) == self.regs.get(b.rs2), b.imm),
            Bne(b) => next = branch(self.regs.get(b.rs1) != self.regs.get(b.rs2), b.imm),
            Blt(b) => {
                let taken = (self.regs.get(b.rs1) as i32) < (self.regs.get(b.rs2) as i32);
                next = branch(taken, b.imm);
            }
            Bge(b) => {
                let taken = (self.regs.get(b.rs1) as i32) >= (self.regs.get(b.rs2) as i32);
                next = branch(taken, b.imm);
            }
            Bltu(b) => next = branch(self.regs.get(b.rs1) < self.regs.get(b.rs2), b.imm),
            Bgeu(b) => next = branch(self.regs.get(b.rs1) >= self.regs.get(b.rs2), b.imm),

            Lb(i) => self.load(i, pc, Width::Byte, true)?,
            Lh(i) => self.load(i, pc, Width::Half, true)?,
            Lw(i) => self.load(i, pc, Width::Word, false)?,
            Lbu(i) => self.load(i, pc, Width::Byte, false)?,
            Lhu(i) => self.load(i, pc, Width::Half, false)?,

            Sb(s) => self.store(s.rs1, s.rs2, s.imm, pc, Width::Byte)?,
            Sh(s) => self.store(s.rs1, s.rs2, s.imm, pc, Width::Half)?,
            Sw(s) => self.store(s.rs1, s.rs2, s.imm, pc, Width::Word)?,

            Addi(i) => self.op_imm(i, u32::wrapping_add),
            Slti(i) => self.op_imm(i, |a, b| u32::from((a as i32) < (b as i32))),
            Sltiu(i) => self.op_imm(i, |a, b| u32::from(a < b)),
            Xori(i) => self.op_imm(i, |a, b| a ^ b),
            Ori(i) => self.op_imm(i, |a, b| a | b),
            Andi(i) => self.op_imm(i, |a, b| a & b),
            Slli(i) => self.op_imm(i, |a, _| a << i.shamt()),
            Srli(i) => self.op_imm(i, |a, _| a >> i.shamt()),
            Srai(i) => self.op_imm(i, |a, _| ((a as i32) >> i.shamt()) as u32),

            Add(r) => self.op(r, u32::wrapping_add),
            Sub(r) => self.op(r, u32::wrapping_sub),
            Sll(r) => self.op(r, |a, b| a << (b & 0x1F)),
            Slt(r) => self.op(r, |a, b| u32::from((a as i32) < (b as i32))),
            Sltu(r) => self.op(r, |a, b| u32::from(a < b)),
            Xor(r) => self.op(r, |a, b| a ^ b),
            Srl(r) => self.op(r, |a, b| a >> (b & 0x1F)),
            Sra(r) => self.op(r, |a, b| ((a as i32) >> (b & 0x1F)) as u32),
            Or(r) => self.op(r, |a, b| a | b),
            And(r) => self.op(r, |a, b| a & b),

            Mul(r) => self.op(r, u32::wrapping_mul),
            Mulh(r) => self.op(r, mulh),
            Mulhsu(r) => self.op(r, mulhsu),
            Mulhu(r) => self.op(r, mulhu),
            Div(r) => self.op(r, div),
            Divu(r) => self.op(r, divu),
            Rem(r) => self.op(r, rem),
            Remu(r) => self.op(r, remu),

            // Single hart, in-order memory: nothing to order.
            Fence(_) => {}
            Ecall(_) => outcome = self.ecall(pc)?,
            Ebreak(_) => outcome = StepOutcome::Breakpoint,
            Undefined(word) => return Err(Trap::UndefinedInstruction { pc, word }),
        }

        self.pc = next;
        Ok(outcome)
    }
}
