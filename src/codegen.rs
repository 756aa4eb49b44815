//! Translation of single x86 instructions into sequences of PPT micro-operations.
//!
//! Operand values travel through the bus registers: the primary (destination) operand is read
//! into M1, the secondary (source) operand into M2 and results come out of M3. Effective
//! addresses that need arithmetic are computed into the scratch pair M4 before any operand is
//! touched, and M5 holds temporaries that have to survive a memory access.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::compiler::CompileErrorKind;
use crate::instruction::{Bus, Half, Instruction, Operation, Register, RegisterPair, Source};
use crate::symbolic::operand::{Immediate, MemoryOperand, Operand, OperandRegister, Width};

/// A micro-operation whose constant may still refer to a label.
pub type AssemblyInstruction = Instruction<Immediate>;

/// An ordered run of micro-operations produced for one source instruction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    instructions: Vec<AssemblyInstruction>,
}

/// A word constant that was emitted before its value was known. Created by
/// [Sequence::reserve_word] and filled in with [Sequence::patch].
#[derive(Debug)]
#[must_use]
pub struct Reservation {
    index: usize,
}

impl Sequence {
    pub fn new() -> Sequence {
        Sequence::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[AssemblyInstruction] {
        &self.instructions
    }

    pub fn into_instructions(self) -> Vec<AssemblyInstruction> {
        self.instructions
    }

    pub fn push(&mut self, instruction: AssemblyInstruction) {
        self.instructions.push(instruction);
    }

    pub fn exec(&mut self, op: Operation) {
        self.push(Instruction::Exec(op));
    }

    pub fn load<S: Into<Source>>(&mut self, bus: Bus, half: Half, source: S) {
        self.push(Instruction::Load {
            bus,
            half,
            source: source.into(),
        });
    }

    /// Loads both halves of a register pair into a bus register.
    pub fn load_pair(&mut self, bus: Bus, pair: RegisterPair) {
        self.load(bus, Half::High, pair.high());
        self.load(bus, Half::Low, pair.low());
    }

    /// Copies M3 into M1 or M2.
    pub fn load_m3(&mut self, bus: Bus) {
        self.load(bus, Half::High, Source::M3(Half::High));
        self.load(bus, Half::Low, Source::M3(Half::Low));
    }

    /// Copies M1 into M3.
    pub fn copy(&mut self) {
        self.push(Instruction::Copy(Half::High));
        self.push(Instruction::Copy(Half::Low));
    }

    pub fn store(&mut self, pair: RegisterPair) {
        self.store_half(Half::High, pair.high());
        self.store_half(Half::Low, pair.low());
    }

    pub fn store_half(&mut self, half: Half, register: Register) {
        self.push(Instruction::Store { half, register });
    }

    /// Loads a word constant into M3.
    pub fn constant(&mut self, value: Immediate) {
        self.push(Instruction::Const {
            half: Half::High,
            value: value.clone(),
        });
        self.constant_low(value);
    }

    /// Loads a byte constant into the low half of M3.
    pub fn constant_low(&mut self, value: Immediate) {
        self.push(Instruction::Const {
            half: Half::Low,
            value,
        });
    }

    /// Emits a word constant load into M3 whose value is supplied later with
    /// [patch](Sequence::patch).
    pub fn reserve_word(&mut self) -> Reservation {
        let index = self.len();
        self.constant(Immediate::number(0, Width::Word));
        Reservation { index }
    }

    pub fn patch(&mut self, reservation: Reservation, value: Immediate) {
        for ins in &mut self.instructions[reservation.index..reservation.index + 2] {
            if let Instruction::Const { value: slot, .. } = ins {
                *slot = value.clone();
            }
        }
    }
}

/// Symbols whose calls are replaced by a single system call operation.
pub fn builtin(label: &str) -> Option<Operation> {
    match label {
        "ppt_puts_" => Some(Operation::PutString),
        "ppt_putint_" => Some(Operation::PutInt),
        "ppt_putc_" => Some(Operation::PutChar),
        "ppt_gets_" => Some(Operation::GetString),
        "ppt_getint_" => Some(Operation::GetInt),
        "ppt_rand_" => Some(Operation::Random),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mnemonic {
    /// Two operand ALU instruction. Compares and tests do not write the result back.
    Binary { op: Operation, width: Width, write_back: bool },
    /// Shift by an immediate count, or by one if the count is omitted.
    Shift { op: Operation, width: Width },
    Unary { op: Operation, width: Width },
    Move(Width),
    /// Multiplication or division of the accumulator by the operand.
    Accumulator { op: Operation, width: Width },
    LoadAddress,
    Jump,
    ConditionalJump { verdict: Operation, negated: bool },
    Call,
    Return,
    Push,
    Pop,
    Nullary(Operation),
    Nop,
}

lazy_static! {
    static ref MNEMONICS: HashMap<String, Mnemonic> = {
        use Operation::*;

        let mut table = HashMap::new();

        let binary = [
            ("add", AddB, AddW, true),
            ("adc", AdcB, AdcW, true),
            ("sub", SubB, SubW, true),
            ("sbb", SbbB, SbbW, true),
            ("and", AndB, AndW, true),
            ("or", OrB, OrW, true),
            ("xor", XorB, XorW, true),
            ("cmp", CmpB, CmpW, false),
            ("test", TestB, TestW, false),
        ];

        for &(name, byte, word, write_back) in binary.iter() {
            table.insert(format!("{}b", name), Mnemonic::Binary { op: byte, width: Width::Byte, write_back });
            table.insert(format!("{}w", name), Mnemonic::Binary { op: word, width: Width::Word, write_back });
        }

        for &(name, byte, word) in [("shl", ShlB, ShlW), ("sal", ShlB, ShlW), ("shr", ShrB, ShrW), ("sar", SarB, SarW)].iter() {
            table.insert(format!("{}b", name), Mnemonic::Shift { op: byte, width: Width::Byte });
            table.insert(format!("{}w", name), Mnemonic::Shift { op: word, width: Width::Word });
        }

        for &(name, byte, word) in [("inc", IncB, IncW), ("dec", DecB, DecW), ("not", NotB, NotW), ("neg", NegB, NegW)].iter() {
            table.insert(format!("{}b", name), Mnemonic::Unary { op: byte, width: Width::Byte });
            table.insert(format!("{}w", name), Mnemonic::Unary { op: word, width: Width::Word });
        }

        for &(name, byte, word) in [("mul", MulB, MulW), ("imul", ImulB, ImulW), ("div", DivB, DivW), ("idiv", IdivB, IdivW)].iter() {
            table.insert(format!("{}b", name), Mnemonic::Accumulator { op: byte, width: Width::Byte });
            table.insert(format!("{}w", name), Mnemonic::Accumulator { op: word, width: Width::Word });
        }

        table.insert("movb".into(), Mnemonic::Move(Width::Byte));
        table.insert("movw".into(), Mnemonic::Move(Width::Word));

        for name in ["leaw", "lea"].iter() {
            table.insert(name.to_string(), Mnemonic::LoadAddress);
        }

        for name in ["pushw", "push"].iter() {
            table.insert(name.to_string(), Mnemonic::Push);
        }

        for name in ["popw", "pop"].iter() {
            table.insert(name.to_string(), Mnemonic::Pop);
        }

        for name in ["ret", "retw"].iter() {
            table.insert(name.to_string(), Mnemonic::Return);
        }

        table.insert("jmp".into(), Mnemonic::Jump);
        table.insert("call".into(), Mnemonic::Call);
        table.insert("nop".into(), Mnemonic::Nop);

        let nullary = [
            ("cbw", Cbw),
            ("cbtw", Cbw),
            ("cwd", Cwd),
            ("cwtd", Cwd),
            ("ctwd", Cwd),
            ("clc", Clc),
            ("cmc", Cmc),
            ("stc", Stc),
            ("hlt", Halt),
        ];

        for &(name, op) in nullary.iter() {
            table.insert(name.to_string(), Mnemonic::Nullary(op));
        }

        table
    };
}

/// Conditional jumps listed as candidates when suggesting a replacement for an unknown mnemonic.
const CONDITIONAL_JUMPS: &[&str] = &[
    "ja", "jae", "jb", "jbe", "jc", "je", "jg", "jge", "jl", "jle", "jna", "jnc", "jne", "jng",
    "jnl", "jno", "jns", "jnz", "jo", "js", "jz",
];

fn verdict(suffix: &str) -> Option<Operation> {
    match suffix {
        "A" => Some(Operation::VerdictAbove),
        "C" => Some(Operation::VerdictCarry),
        "Z" => Some(Operation::VerdictZero),
        "O" => Some(Operation::VerdictOverflow),
        "S" => Some(Operation::VerdictSign),
        "G" => Some(Operation::VerdictGreater),
        "L" => Some(Operation::VerdictLess),
        _ => None,
    }
}

fn condition_alias(suffix: &str) -> Option<&'static str> {
    match suffix {
        "AE" => Some("NC"),
        "B" => Some("C"),
        "BE" => Some("NA"),
        "E" => Some("Z"),
        "GE" => Some("NL"),
        "LE" => Some("NG"),
        _ => None,
    }
}

/// Maps a jump condition suffix to a verdict operation and whether the verdict is negated.
fn condition(suffix: &str) -> Option<(Operation, bool)> {
    if let Some(op) = verdict(suffix) {
        return Some((op, false));
    }

    if let Some(alias) = condition_alias(suffix) {
        return condition(alias);
    }

    if suffix.starts_with('N') {
        return condition(&suffix[1..]).map(|(op, negated)| (op, !negated));
    }

    None
}

fn suggestion(name: &str) -> Option<String> {
    MNEMONICS
        .keys()
        .map(String::as_str)
        .chain(CONDITIONAL_JUMPS.iter().copied())
        .map(|candidate| (edit_distance::edit_distance(name, candidate), candidate))
        .filter(|(distance, _)| *distance <= 2)
        .min()
        .map(|(_, candidate)| candidate.to_string())
}

impl Mnemonic {
    fn lookup(name: &str) -> Result<Mnemonic, CompileErrorKind> {
        let lower = name.to_lowercase();

        if let Some(mnemonic) = MNEMONICS.get(&lower) {
            return Ok(*mnemonic);
        }

        let upper = name.to_uppercase();

        if upper.starts_with('J') {
            if let Some((verdict, negated)) = condition(&upper[1..]) {
                return Ok(Mnemonic::ConditionalJump { verdict, negated });
            }
        }

        Err(CompileErrorKind::UnknownMnemonic {
            name: name.to_string(),
            suggestion: suggestion(&lower),
        })
    }

    /// Accepted operand counts.
    fn arity(&self) -> (usize, usize) {
        match self {
            Mnemonic::Binary { .. } | Mnemonic::Move(_) | Mnemonic::LoadAddress => (2, 2),
            Mnemonic::Shift { .. } => (1, 2),
            Mnemonic::Return => (0, 1),
            Mnemonic::Nullary(_) | Mnemonic::Nop => (0, 0),
            _ => (1, 1),
        }
    }

    fn width(&self) -> Width {
        match self {
            Mnemonic::Binary { width, .. }
            | Mnemonic::Shift { width, .. }
            | Mnemonic::Unary { width, .. }
            | Mnemonic::Accumulator { width, .. }
            | Mnemonic::Move(width) => *width,
            _ => Width::Word,
        }
    }

    fn is_branch(&self) -> bool {
        match self {
            Mnemonic::Jump | Mnemonic::ConditionalJump { .. } | Mnemonic::Call => true,
            _ => false,
        }
    }
}

fn invalid(operand: &Operand, reason: &'static str) -> CompileErrorKind {
    CompileErrorKind::InvalidOperand {
        operand: operand.to_string(),
        reason,
    }
}

fn word_register(operand: &Operand, register: OperandRegister) -> Result<RegisterPair, CompileErrorKind> {
    match register {
        OperandRegister::Word(pair) => Ok(pair),
        OperandRegister::Byte(_) => Err(invalid(operand, "expected a 16-bit register")),
    }
}

fn byte_register(operand: &Operand, register: OperandRegister) -> Result<Register, CompileErrorKind> {
    match register {
        OperandRegister::Byte(reg) => Ok(reg),
        OperandRegister::Word(_) => Err(invalid(operand, "expected an 8-bit register")),
    }
}

/// Where the address of a memory operand comes from.
enum Address {
    /// Computed into M4 in advance.
    Scratch,
    Register(RegisterPair),
    Direct(Immediate),
}

/// Emits the code for a single instruction.
struct Generator {
    seq: Sequence,

    /// The memory operand whose effective address is currently held in M4.
    calculated: Option<MemoryOperand>,
}

impl Generator {
    /// Computes the effective address of the operands that need it into M4.
    ///
    /// `write_last` tells if the last operand is going to be written to.
    fn prepare(&mut self, operands: &[&Operand], write_last: bool) -> Result<(), CompileErrorKind> {
        for (i, operand) in operands.iter().enumerate() {
            let memory = match operand {
                Operand::Memory(memory) => memory,
                _ => continue,
            };

            let for_write = write_last && i + 1 == operands.len();

            if !memory.requires_calculation(for_write) || self.calculated.as_ref() == Some(memory) {
                continue;
            }

            if self.calculated.is_some() {
                return Err(CompileErrorKind::MultipleAddressCalculations);
            }

            self.calculate_address(memory, RegisterPair::M4);
            self.calculated = Some(memory.clone());
        }

        Ok(())
    }

    /// Emits `dst = base + index * scale + displacement`.
    fn calculate_address(&mut self, memory: &MemoryOperand, dst: RegisterPair) {
        #[derive(PartialEq)]
        enum Partial {
            Nothing,
            InM1,
            InM3,
        }

        let seq = &mut self.seq;
        let mut partial = Partial::Nothing;

        if let Some(index) = memory.index {
            seq.load_pair(Bus::M1, index);
            partial = Partial::InM1;

            let shift = match memory.scale {
                2 => Some(Operation::ShiftAddr1),
                4 => Some(Operation::ShiftAddr2),
                8 => Some(Operation::ShiftAddr3),
                _ => None,
            };

            if let Some(shift) = shift {
                seq.exec(shift);
                partial = Partial::InM3;
            }
        }

        if let Some(base) = memory.base {
            match partial {
                Partial::Nothing => {
                    seq.load_pair(Bus::M1, base);
                    partial = Partial::InM1;
                }
                Partial::InM1 => {
                    seq.load_pair(Bus::M2, base);
                    seq.exec(Operation::AddAddr);
                    partial = Partial::InM3;
                }
                Partial::InM3 => {
                    seq.load_m3(Bus::M1);
                    seq.load_pair(Bus::M2, base);
                    seq.exec(Operation::AddAddr);
                }
            }
        }

        if !memory.displacement.is_zero() || partial == Partial::Nothing {
            if partial == Partial::InM3 {
                seq.load_m3(Bus::M1);
            }

            seq.constant(memory.displacement.clone());

            if partial != Partial::Nothing {
                seq.load_m3(Bus::M2);
                seq.exec(Operation::AddAddr);
            }

            partial = Partial::InM3;
        }

        if partial == Partial::InM1 {
            seq.copy();
        }

        seq.store(dst);
    }

    fn locate(&self, memory: &MemoryOperand, for_write: bool) -> Address {
        if memory.requires_calculation(for_write) || self.calculated.as_ref() == Some(memory) {
            return Address::Scratch;
        }

        match memory.base {
            Some(base) => Address::Register(base),
            None => Address::Direct(memory.displacement.clone()),
        }
    }

    /// Loads the effective address of a memory operand into M1.
    fn load_address(&mut self, memory: &MemoryOperand, for_write: bool) {
        match self.locate(memory, for_write) {
            Address::Scratch => self.seq.load_pair(Bus::M1, RegisterPair::M4),
            Address::Register(base) => self.seq.load_pair(Bus::M1, base),
            Address::Direct(address) => {
                self.seq.constant(address);
                self.seq.load_m3(Bus::M1);
            }
        }
    }

    fn read(&mut self, operand: &Operand, width: Width, target: Bus) -> Result<(), CompileErrorKind> {
        match width {
            Width::Word => self.read_word(operand, target),
            Width::Byte => self.read_byte(operand, target),
        }
    }

    fn read_word(&mut self, operand: &Operand, target: Bus) -> Result<(), CompileErrorKind> {
        match operand {
            Operand::Memory(memory) => {
                self.load_address(memory, false);

                let seq = &mut self.seq;
                seq.exec(Operation::SetMemoryPointer);
                seq.exec(Operation::ReadMemory);
                seq.store_half(Half::Low, Register::M5L);
                seq.exec(Operation::IncrementMemoryPointer);
                seq.exec(Operation::ReadMemory);

                if target == Bus::M3 {
                    seq.store_half(Half::Low, Register::M5H);
                    seq.load_pair(Bus::M1, RegisterPair::M5);
                    seq.copy();
                } else {
                    seq.load(target, Half::High, Source::M3(Half::Low));
                    seq.load(target, Half::Low, Register::M5L);
                }
            }
            Operand::Register(register) => {
                let pair = word_register(operand, *register)?;

                if target == Bus::M3 {
                    self.seq.load_pair(Bus::M1, pair);
                    self.seq.copy();
                } else {
                    self.seq.load_pair(target, pair);
                }
            }
            Operand::Immediate(value) => {
                self.seq.constant(value.clone());

                if target != Bus::M3 {
                    self.seq.load_m3(target);
                }
            }
        }

        Ok(())
    }

    fn read_byte(&mut self, operand: &Operand, target: Bus) -> Result<(), CompileErrorKind> {
        match operand {
            Operand::Memory(memory) => {
                self.load_address(memory, false);
                self.seq.exec(Operation::SetMemoryPointer);
                self.seq.exec(Operation::ReadMemory);

                if target != Bus::M3 {
                    self.seq.load(target, Half::Low, Source::M3(Half::Low));
                }
            }
            Operand::Register(register) => {
                let reg = byte_register(operand, *register)?;

                if target == Bus::M3 {
                    self.seq.load(Bus::M1, Half::Low, reg);
                    self.seq.push(Instruction::Copy(Half::Low));
                } else {
                    self.seq.load(target, Half::Low, reg);
                }
            }
            Operand::Immediate(value) => {
                self.seq.constant_low(value.clone());

                if target != Bus::M3 {
                    self.seq.load(target, Half::Low, Source::M3(Half::Low));
                }
            }
        }

        Ok(())
    }

    /// Writes M3 to the operand.
    fn write(&mut self, operand: &Operand, width: Width) -> Result<(), CompileErrorKind> {
        match (operand, width) {
            (Operand::Memory(memory), Width::Word) => {
                self.load_address(memory, true);

                let seq = &mut self.seq;
                seq.load(Bus::M2, Half::Low, Source::M3(Half::Low));
                seq.exec(Operation::SetMemoryPointer);
                seq.exec(Operation::WriteMemory);
                seq.exec(Operation::IncrementMemoryPointer);
                seq.load(Bus::M2, Half::Low, Source::M3(Half::High));
                seq.exec(Operation::WriteMemory);
            }
            (Operand::Memory(memory), Width::Byte) => {
                self.load_address(memory, true);
                self.seq.load(Bus::M2, Half::Low, Source::M3(Half::Low));
                self.seq.exec(Operation::SetMemoryPointer);
                self.seq.exec(Operation::WriteMemory);
            }
            (Operand::Register(register), Width::Word) => {
                let pair = word_register(operand, *register)?;
                self.seq.store(pair);
            }
            (Operand::Register(register), Width::Byte) => {
                let reg = byte_register(operand, *register)?;
                self.seq.store_half(Half::Low, reg);
            }
            (Operand::Immediate(_), _) => return Err(invalid(operand, "cannot write to an immediate")),
        }

        Ok(())
    }

    /// Pushes a register pair to the stack.
    fn push_pair(&mut self, pair: RegisterPair) {
        let seq = &mut self.seq;
        seq.load_pair(Bus::M1, RegisterPair::SP);
        seq.exec(Operation::Dec2W);
        seq.store(RegisterPair::SP);
        seq.load_pair(Bus::M1, RegisterPair::SP);
        seq.exec(Operation::SetMemoryPointer);
        seq.load(Bus::M2, Half::Low, pair.low());
        seq.exec(Operation::WriteMemory);
        seq.exec(Operation::IncrementMemoryPointer);
        seq.load(Bus::M2, Half::Low, pair.high());
        seq.exec(Operation::WriteMemory);
    }

    /// Pops the top of the stack into a register pair.
    fn pop_pair(&mut self, pair: RegisterPair) {
        let seq = &mut self.seq;
        seq.load_pair(Bus::M1, RegisterPair::SP);
        seq.exec(Operation::Inc2W);
        seq.store(RegisterPair::SP);
        seq.exec(Operation::SetMemoryPointer);
        seq.exec(Operation::ReadMemory);
        seq.store_half(Half::Low, pair.low());
        seq.exec(Operation::IncrementMemoryPointer);
        seq.exec(Operation::ReadMemory);
        seq.store_half(Half::Low, pair.high());
    }

    fn binary(&mut self, op: Operation, width: Width, write_back: bool, src: &Operand, dst: &Operand) -> Result<(), CompileErrorKind> {
        self.prepare(&[src, dst], write_back)?;

        // Memory reads clobber M1 and M3, so they go first.
        if src.is_memory() {
            self.read(src, width, Bus::M2)?;
        }

        if dst.is_memory() {
            self.read(dst, width, Bus::M1)?;
        }

        if !src.is_memory() {
            self.read(src, width, Bus::M2)?;
        }

        if !dst.is_memory() {
            self.read(dst, width, Bus::M1)?;
        }

        self.seq.exec(op);

        if write_back {
            self.write(dst, width)?;
        }

        Ok(())
    }

    fn shift(&mut self, op: Operation, width: Width, count: Option<&Operand>, dst: &Operand) -> Result<(), CompileErrorKind> {
        let count = match count {
            None => 1,
            Some(Operand::Immediate(Immediate { offset, label: None, .. })) if (0..=16).contains(offset) => *offset,
            Some(other) => return Err(invalid(other, "shift count must be a number between 0 and 16")),
        };

        if count == 0 {
            return Ok(());
        }

        self.prepare(&[dst], true)?;
        self.read(dst, width, Bus::M1)?;

        for i in 0..count {
            if i > 0 {
                match width {
                    Width::Word => self.seq.load_m3(Bus::M1),
                    Width::Byte => self.seq.load(Bus::M1, Half::Low, Source::M3(Half::Low)),
                }
            }

            self.seq.exec(op);
        }

        self.write(dst, width)
    }

    fn call(&mut self, target: &Operand, offset: usize) -> Result<(), CompileErrorKind> {
        if let Operand::Immediate(Immediate { label: Some(label), offset: 0, .. }) = target {
            if let Some(op) = builtin(label) {
                self.seq.exec(op);
                return Ok(());
            }
        }

        self.prepare(&[target], false)?;

        // The target address is read before the push, which moves the stack pointer.
        if target.is_memory() {
            self.read_word(target, Bus::M3)?;
            self.seq.store(RegisterPair::M5);
        }

        let seq = &mut self.seq;
        seq.load_pair(Bus::M1, RegisterPair::SP);
        seq.exec(Operation::Dec2W);
        seq.store(RegisterPair::SP);
        seq.load_pair(Bus::M1, RegisterPair::SP);
        seq.exec(Operation::SetMemoryPointer);
        let return_address = seq.reserve_word();
        seq.load(Bus::M2, Half::Low, Source::M3(Half::Low));
        seq.exec(Operation::WriteMemory);
        seq.exec(Operation::IncrementMemoryPointer);
        seq.load(Bus::M2, Half::Low, Source::M3(Half::High));
        seq.exec(Operation::WriteMemory);

        if target.is_memory() {
            self.seq.load_pair(Bus::M1, RegisterPair::M5);
        } else {
            self.read_word(target, Bus::M1)?;
        }

        self.seq.exec(Operation::Jump);

        let end = offset + self.seq.len();
        self.seq.patch(return_address, Immediate::number(end as i64, Width::Word));

        Ok(())
    }

    fn ret(&mut self, pop: Option<&Operand>) -> Result<(), CompileErrorKind> {
        let seq = &mut self.seq;
        seq.load_pair(Bus::M1, RegisterPair::SP);

        match pop {
            None => seq.exec(Operation::Inc2W),
            Some(Operand::Immediate(imm)) => {
                let mut amount = imm.clone();
                amount.offset += 2;
                amount.width = Width::Word;

                seq.constant(amount);
                seq.load_m3(Bus::M2);
                seq.exec(Operation::AddAddr);
            }
            Some(other) => return Err(invalid(other, "expected an immediate")),
        }

        // M1 still holds the old stack pointer, which points to the return address.
        seq.store(RegisterPair::SP);
        seq.exec(Operation::SetMemoryPointer);
        seq.exec(Operation::ReadMemory);
        seq.load(Bus::M1, Half::Low, Source::M3(Half::Low));
        seq.exec(Operation::IncrementMemoryPointer);
        seq.exec(Operation::ReadMemory);
        seq.load(Bus::M1, Half::High, Source::M3(Half::Low));
        seq.exec(Operation::Jump);

        Ok(())
    }

    fn push(&mut self, operand: &Operand) -> Result<(), CompileErrorKind> {
        if let Operand::Register(register) = operand {
            let pair = word_register(operand, *register)?;
            self.push_pair(pair);
            return Ok(());
        }

        self.prepare(&[operand], false)?;
        self.read_word(operand, Bus::M3)?;
        self.seq.store(RegisterPair::M4);
        self.push_pair(RegisterPair::M4);

        Ok(())
    }

    fn pop(&mut self, operand: &Operand) -> Result<(), CompileErrorKind> {
        match operand {
            Operand::Register(register) => {
                let pair = word_register(operand, *register)?;
                self.pop_pair(pair);
            }
            Operand::Memory(memory) => {
                self.prepare(&[operand], true)?;
                self.pop_pair(RegisterPair::M5);
                self.load_address(memory, true);

                let seq = &mut self.seq;
                seq.load(Bus::M2, Half::Low, Register::M5L);
                seq.exec(Operation::SetMemoryPointer);
                seq.exec(Operation::WriteMemory);
                seq.exec(Operation::IncrementMemoryPointer);
                seq.load(Bus::M2, Half::Low, Register::M5H);
                seq.exec(Operation::WriteMemory);
            }
            Operand::Immediate(_) => return Err(invalid(operand, "cannot pop into an immediate")),
        }

        Ok(())
    }

    fn conditional_jump(&mut self, verdict: Operation, negated: bool, target: &Operand) -> Result<(), CompileErrorKind> {
        self.prepare(&[target], false)?;
        self.seq.exec(verdict);

        if negated {
            self.seq.exec(Operation::NegateVerdict);
        }

        self.read_word(target, Bus::M1)?;
        self.seq.exec(Operation::JumpVerdict);

        Ok(())
    }
}

/// Translates one source instruction into micro-operations.
///
/// # Parameters
/// - `mnemonic`: The instruction mnemonic, eg. `movw` or `jne`.
/// - `arguments`: The operand texts in source order.
/// - `offset`: Address at which the first micro-operation of the sequence will be placed. Needed
///   for computing return addresses of calls.
pub fn translate(mnemonic: &str, arguments: &[&str], offset: usize) -> Result<Sequence, CompileErrorKind> {
    let kind = Mnemonic::lookup(mnemonic)?;

    let (min, max) = kind.arity();

    if arguments.len() < min || arguments.len() > max {
        return Err(CompileErrorKind::WrongOperandCount {
            mnemonic: mnemonic.to_string(),
            expected: if min == max { format!("{}", min) } else { format!("{} to {}", min, max) },
            got: arguments.len(),
        });
    }

    let width = kind.width();
    let branch = kind.is_branch();

    let operands = arguments
        .iter()
        .map(|arg| Operand::parse(arg, width, branch).map_err(CompileErrorKind::Operand))
        .collect::<Result<Vec<_>, _>>()?;

    let mut gen = Generator {
        seq: Sequence::new(),
        calculated: None,
    };

    match (kind, operands.as_slice()) {
        (Mnemonic::Binary { op, width, write_back }, [src, dst]) => {
            gen.binary(op, width, write_back, src, dst)?
        }
        (Mnemonic::Shift { op, width }, [dst]) => gen.shift(op, width, None, dst)?,
        (Mnemonic::Shift { op, width }, [count, dst]) => gen.shift(op, width, Some(count), dst)?,
        (Mnemonic::Unary { op, width }, [dst]) => {
            gen.prepare(&[dst], true)?;
            gen.read(dst, width, Bus::M1)?;
            gen.seq.exec(op);
            gen.write(dst, width)?;
        }
        (Mnemonic::Move(width), [src, dst]) => {
            gen.prepare(&[src, dst], true)?;
            gen.read(src, width, Bus::M3)?;
            gen.write(dst, width)?;
        }
        (Mnemonic::Accumulator { op, width }, [src]) => {
            gen.prepare(&[src], false)?;
            gen.read(src, width, Bus::M1)?;
            gen.seq.exec(op);
        }
        (Mnemonic::LoadAddress, [src, dst]) => {
            let memory = match src {
                Operand::Memory(memory) => memory,
                other => return Err(invalid(other, "expected a memory operand")),
            };

            let pair = match dst {
                Operand::Register(register) => word_register(dst, *register)?,
                other => return Err(invalid(other, "expected a 16-bit register")),
            };

            gen.calculate_address(memory, pair);
        }
        (Mnemonic::Jump, [target]) => {
            gen.prepare(&[target], false)?;
            gen.read_word(target, Bus::M1)?;
            gen.seq.exec(Operation::Jump);
        }
        (Mnemonic::ConditionalJump { verdict, negated }, [target]) => {
            gen.conditional_jump(verdict, negated, target)?
        }
        (Mnemonic::Call, [target]) => gen.call(target, offset)?,
        (Mnemonic::Return, []) => gen.ret(None)?,
        (Mnemonic::Return, [pop]) => gen.ret(Some(pop))?,
        (Mnemonic::Push, [operand]) => gen.push(operand)?,
        (Mnemonic::Pop, [operand]) => gen.pop(operand)?,
        (Mnemonic::Nullary(op), []) => gen.seq.exec(op),
        (Mnemonic::Nop, []) => (),
        (_, operands) => {
            return Err(CompileErrorKind::WrongOperandCount {
                mnemonic: mnemonic.to_string(),
                expected: format!("{}", min),
                got: operands.len(),
            })
        }
    }

    Ok(gen.seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol_table::SymbolTable;

    /// Translates and renders the sequence in the object format notation.
    fn listing(mnemonic: &str, arguments: &[&str], offset: usize) -> Vec<String> {
        let mut symbols = SymbolTable::new();
        symbols.define("L$1", 42).unwrap();

        translate(mnemonic, arguments, offset)
            .unwrap()
            .into_instructions()
            .into_iter()
            .map(|ins| {
                ins.map_constant(|half, imm| {
                    imm.resolve(&symbols).map(|word| match half {
                        Half::High => word.high(),
                        Half::Low => word.low(),
                    })
                })
                .unwrap()
                .to_string()
            })
            .collect()
    }

    #[test]
    fn test_move_immediate_to_register() {
        assert_eq!(listing("movw", &["$5", "%ax"], 0), vec![
            "CONSTH 00000000",
            "CONSTL 00000101",
            "STOREH AH",
            "STOREL AL",
        ]);
    }

    #[test]
    fn test_add_immediate_to_register() {
        assert_eq!(listing("addw", &["$3", "%ax"], 0), vec![
            "CONSTH 00000000",
            "CONSTL 00000011",
            "LOAD2H M3H",
            "LOAD2L M3L",
            "LOAD1H AH",
            "LOAD1L AL",
            "EXEC ADDW",
            "STOREH AH",
            "STOREL AL",
        ]);
    }

    #[test]
    fn test_compare_does_not_write_back() {
        assert_eq!(listing("cmpb", &["$0x10", "%al"], 0), vec![
            "CONSTL 00010000",
            "LOAD2L M3L",
            "LOAD1L AL",
            "EXEC CMPB",
        ]);
    }

    #[test]
    fn test_memory_destination_reuses_address() {
        let code = listing("addw", &["%ax", "4(%bx)"], 0);

        // The address is computed into M4 exactly once and used for both the read and the write.
        assert_eq!(&code[..8], &[
            "LOAD1H BH",
            "LOAD1L BL",
            "CONSTH 00000000",
            "CONSTL 00000100",
            "LOAD2H M3H",
            "LOAD2L M3L",
            "EXEC ADDADDR",
            "STOREH M4H",
        ]);
        assert_eq!(code.iter().filter(|ins| *ins == "EXEC ADDADDR").count(), 1);
        assert_eq!(code.iter().filter(|ins| *ins == "LOAD1H M4H").count(), 2);
        assert_eq!(code.last().map(String::as_str), Some("EXEC WMEM"));
    }

    #[test]
    fn test_indexed_address() {
        assert_eq!(listing("leaw", &["2(%bx,%si,4)", "%di"], 0), vec![
            "LOAD1H SIH",
            "LOAD1L SIL",
            "EXEC SHIFTADDR2",
            "LOAD1H M3H",
            "LOAD1L M3L",
            "LOAD2H BH",
            "LOAD2L BL",
            "EXEC ADDADDR",
            "LOAD1H M3H",
            "LOAD1L M3L",
            "CONSTH 00000000",
            "CONSTL 00000010",
            "LOAD2H M3H",
            "LOAD2L M3L",
            "EXEC ADDADDR",
            "STOREH DIH",
            "STOREL DIL",
        ]);

        assert_eq!(listing("leaw", &["(%bx)", "%ax"], 0), vec![
            "LOAD1H BH",
            "LOAD1L BL",
            "COPYH",
            "COPYL",
            "STOREH AH",
            "STOREL AL",
        ]);
    }

    #[test]
    fn test_conditional_jumps() {
        let je = listing("je", &["L$1"], 0);
        assert_eq!(je[0], "EXEC VZ");
        assert_eq!(je.last().map(String::as_str), Some("EXEC JV"));

        assert_eq!(listing("jne", &["L$1"], 0)[..2], ["EXEC VZ", "EXEC NV"]);
        assert_eq!(listing("jbe", &["L$1"], 0)[..2], ["EXEC VA", "EXEC NV"]);
        assert_eq!(listing("jnbe", &["L$1"], 0)[..2], ["EXEC VA", "CONSTH 00000000"]);
        assert_eq!(listing("jge", &["L$1"], 0)[..2], ["EXEC VL", "EXEC NV"]);
        assert_eq!(listing("jb", &["L$1"], 0)[0], "EXEC VC");
    }

    #[test]
    fn test_builtin_call() {
        assert_eq!(listing("call", &["ppt_putint_"], 0), vec!["EXEC PUTINT"]);
    }

    #[test]
    fn test_call_return_address() {
        let seq = translate("call", &["%ax"], 100).unwrap();
        let len = seq.len();

        let constants: Vec<_> = seq
            .into_instructions()
            .into_iter()
            .filter_map(|ins| match ins {
                Instruction::Const { value, .. } => Some(value),
                _ => None,
            })
            .collect();

        assert_eq!(constants, vec![
            Immediate::number(100 + len as i64, Width::Word),
            Immediate::number(100 + len as i64, Width::Word),
        ]);
    }

    #[test]
    fn test_return_with_pop() {
        let code = listing("ret", &["$4"], 0);
        assert_eq!(&code[..6], &[
            "LOAD1H SPH",
            "LOAD1L SPL",
            "CONSTH 00000000",
            "CONSTL 00000110",
            "LOAD2H M3H",
            "LOAD2L M3L",
        ]);
    }

    #[test]
    fn test_errors() {
        match translate("movx", &["%ax", "%bx"], 0) {
            Err(CompileErrorKind::UnknownMnemonic { suggestion, .. }) => {
                assert!(suggestion.is_some());
            }
            other => panic!("unexpected result {:?}", other),
        }

        assert!(matches!(
            translate("movw", &["%ax"], 0),
            Err(CompileErrorKind::WrongOperandCount { got: 1, .. })
        ));
        assert!(matches!(
            translate("movw", &["%al", "%bx"], 0),
            Err(CompileErrorKind::InvalidOperand { .. })
        ));
        assert!(matches!(
            translate("movw", &["%ax", "$5"], 0),
            Err(CompileErrorKind::InvalidOperand { .. })
        ));
        assert!(matches!(
            translate("movw", &["2(%bx)", "4(%si)"], 0),
            Err(CompileErrorKind::MultipleAddressCalculations)
        ));
        assert!(matches!(
            translate("pushw", &["%ds"], 0),
            Err(CompileErrorKind::Operand(crate::symbolic::OperandError::SegmentRegister(_)))
        ));
    }

    #[test]
    fn test_reserve_and_patch() {
        let mut seq = Sequence::new();
        seq.exec(Operation::Halt);
        let reservation = seq.reserve_word();
        seq.exec(Operation::Halt);
        seq.patch(reservation, Immediate::label("end", Width::Word));

        assert_eq!(seq.instructions()[1], Instruction::Const {
            half: Half::High,
            value: Immediate::label("end", Width::Word),
        });
        assert_eq!(seq.instructions()[2], Instruction::Const {
            half: Half::Low,
            value: Immediate::label("end", Width::Word),
        });
        assert_eq!(seq.len(), 4);
    }
}
