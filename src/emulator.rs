//! [Emulator] for executing assembled [object programs](crate::bytecode::ObjectProgram).

use std::collections::VecDeque;
use std::fmt;
use std::io::{BufRead, Write};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slog::{info, o, trace, Discard, Logger};

use crate::alu::{self, ArithmeticFlags, Output};
use crate::bits::{BitWord, Byte, DWord, Word};
use crate::bytecode::{ObjectProgram, Segment};
use crate::event::{Event, EventDispatcher, EventListener};
use crate::instruction::{Bus, Half, Instruction, Operation, Register, RegisterPair, Source};

/// Address of the first byte of the DATA segment.
pub const DATA_START: u16 = 0x8000;

/// Number of bytes in the DATA segment.
pub const DATA_SIZE: usize = 0x8000;

/// The condition flags of the PPT machine.
///
/// The arithmetic flags are written by the ALU operations. The verdict is written by the `Vx`
/// operations and read by `JV`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub carry: bool,
    pub zero: bool,
    pub sign: bool,
    pub overflow: bool,
    pub verdict: bool,
}

impl Flags {
    fn set(&mut self, flags: ArithmeticFlags) {
        self.carry = flags.carry;
        self.zero = flags.zero;
        self.sign = flags.sign;
        self.overflow = flags.overflow;
    }
}

/// Contains the execution environment of the PPT processor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineState {
    /// The named 8-bit registers, indexed by [Register::index].
    pub registers: [Byte; 20],

    pub m1: Word,
    pub m2: Word,
    pub m3: Word,

    pub flags: Flags,

    /// Address of the next micro-operation.
    pub ip: u16,

    /// Memory pointer used by `RMEM` and `WMEM`.
    pub mp: u16,
}

fn half_of(word: Word, half: Half) -> Byte {
    match half {
        Half::High => word.high(),
        Half::Low => word.low(),
    }
}

fn with_half(word: Word, half: Half, value: Byte) -> Word {
    match half {
        Half::High => Word::from_halves(value, word.low()),
        Half::Low => Word::from_halves(word.high(), value),
    }
}

impl MachineState {
    pub fn register(&self, register: Register) -> Byte {
        self.registers[register.index()]
    }

    pub fn set_register(&mut self, register: Register, value: Byte) {
        self.registers[register.index()] = value;
    }

    pub fn pair(&self, pair: RegisterPair) -> Word {
        Word::from_halves(self.register(pair.high()), self.register(pair.low()))
    }

    pub fn set_pair(&mut self, pair: RegisterPair, value: Word) {
        self.set_register(pair.high(), value.high());
        self.set_register(pair.low(), value.low());
    }

    pub fn bus(&self, bus: Bus) -> Word {
        match bus {
            Bus::M1 => self.m1,
            Bus::M2 => self.m2,
            Bus::M3 => self.m3,
        }
    }

    fn bus_mut(&mut self, bus: Bus) -> &mut Word {
        match bus {
            Bus::M1 => &mut self.m1,
            Bus::M2 => &mut self.m2,
            Bus::M3 => &mut self.m3,
        }
    }

    fn source(&self, source: Source) -> Byte {
        match source {
            Source::Register(register) => self.register(register),
            Source::M3(half) => half_of(self.m3, half),
        }
    }

    fn set_m3_low(&mut self, value: Byte) {
        self.m3 = with_half(self.m3, Half::Low, value);
    }
}

/// Trait for implementing the memory of a PPT processor.
pub trait Memory {
    /// Error type returned by all methods of this trait.
    type Error;

    /// Fetch the micro-operation from the specified TEXT address.
    fn get_instruction(&mut self, address: u16) -> Result<Instruction, Self::Error>;

    /// Read a byte from DATA or CONST. The most significant bit of the address selects DATA.
    fn read(&mut self, address: u16) -> Result<Byte, Self::Error>;

    /// Overwrite a byte of DATA.
    fn write(&mut self, address: u16, value: Byte) -> Result<(), Self::Error>;

    /// Returns the error `write` would fail with at `address`, without writing anything.
    fn check_write(&self, address: u16) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryError {
    pub address: u16,
    pub kind: MemoryErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemoryErrorKind {
    /// There is no micro-operation at the address.
    InstructionOutOfRange,

    /// CONST is read-only.
    WriteToConst,

    /// The CONST address was not loaded from the program.
    UnmappedConst,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let address = Word(self.address);

        match self.kind {
            MemoryErrorKind::InstructionOutOfRange => {
                write!(f, "instruction pointer {} out of range", address)
            }
            MemoryErrorKind::WriteToConst => write!(f, "write to read-only address {}", address),
            MemoryErrorKind::UnmappedConst => write!(f, "read from unmapped address {}", address),
        }
    }
}

/// The memory layout of an assembled program: the TEXT micro-operations, a zero-filled
/// read-write DATA segment at `0x8000..=0xFFFF` and the read-only CONST bytes below it.
#[derive(Debug, Clone)]
pub struct SegmentedMemory {
    text: Segment<Instruction>,
    data: Vec<Byte>,
    constants: Segment<Byte>,
}

impl SegmentedMemory {
    pub fn new(program: &ObjectProgram) -> SegmentedMemory {
        let mut data = vec![Byte(0); DATA_SIZE];

        // Addresses below DATA_START wrap past the end and are skipped.
        for (address, value) in program.data.iter() {
            if let Some(slot) = data.get_mut(address.wrapping_sub(DATA_START) as usize) {
                *slot = *value;
            }
        }

        SegmentedMemory {
            text: program
                .text
                .iter()
                .map(|(address, entry)| (address, entry.instruction.clone()))
                .collect(),
            data,
            constants: program.constants.clone(),
        }
    }
}

impl From<&ObjectProgram> for SegmentedMemory {
    fn from(program: &ObjectProgram) -> SegmentedMemory {
        SegmentedMemory::new(program)
    }
}

impl Memory for SegmentedMemory {
    type Error = MemoryError;

    fn get_instruction(&mut self, address: u16) -> Result<Instruction, MemoryError> {
        self.text
            .get(address)
            .cloned()
            .ok_or(MemoryError { address, kind: MemoryErrorKind::InstructionOutOfRange })
    }

    fn read(&mut self, address: u16) -> Result<Byte, MemoryError> {
        if address >= DATA_START {
            Ok(self.data[(address - DATA_START) as usize])
        } else {
            self.constants
                .get(address)
                .copied()
                .ok_or(MemoryError { address, kind: MemoryErrorKind::UnmappedConst })
        }
    }

    fn write(&mut self, address: u16, value: Byte) -> Result<(), MemoryError> {
        self.check_write(address)?;
        self.data[(address - DATA_START) as usize] = value;

        Ok(())
    }

    fn check_write(&self, address: u16) -> Result<(), MemoryError> {
        if address < DATA_START {
            return Err(MemoryError { address, kind: MemoryErrorKind::WriteToConst });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputError {
    EndOfInput,
    Io(String),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InputError::EndOfInput => write!(f, "end of input"),
            InputError::Io(err) => write!(f, "could not read input: {}", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputError(pub String);

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "could not write output: {}", self.0)
    }
}

/// Interface to the host operations of the PPT machine.
pub trait InputOutput {
    /// Called by `GETS` and `GETINT`. Returns a line of input without the line terminator.
    fn read_line(&mut self) -> Result<String, InputError>;

    /// Called by `PUTS`, `PUTINT` and `PUTC`.
    fn write(&mut self, text: &str) -> Result<(), OutputError>;

    /// Called by `RAND`. Returns a value in `0..0x8000`.
    fn random(&mut self) -> u16;
}

/// An IO handler that uses the standard input and output of the process and the thread-local
/// random number generator.
pub struct StdIo;

impl InputOutput for StdIo {
    fn read_line(&mut self) -> Result<String, InputError> {
        let mut line = String::new();

        let read = std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|err| InputError::Io(err.to_string()))?;

        if read == 0 {
            return Err(InputError::EndOfInput);
        }

        Ok(line.trim_end_matches(|c| c == '\n' || c == '\r').to_string())
    }

    fn write(&mut self, text: &str) -> Result<(), OutputError> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();

        handle
            .write_all(text.as_bytes())
            .and_then(|_| handle.flush())
            .map_err(|err| OutputError(err.to_string()))
    }

    fn random(&mut self) -> u16 {
        rand::thread_rng().gen_range(0, 0x8000)
    }
}

/// An IO handler for testing purposes.
///
/// Reads lines from a pre-determined input buffer, appends printed text to an output buffer and
/// draws random numbers from a fixed seed.
pub struct TestIo {
    input_buffer: VecDeque<String>,
    output_buffer: String,
    rng: StdRng,
}

impl TestIo {
    pub fn new() -> TestIo {
        TestIo::with_input(Vec::<String>::new())
    }

    pub fn with_input<I, S>(input: I) -> TestIo
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TestIo {
            input_buffer: input.into_iter().map(Into::into).collect(),
            output_buffer: String::new(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn input<S: Into<String>>(&mut self, line: S) {
        self.input_buffer.push_back(line.into());
    }

    pub fn output(&self) -> &str {
        &self.output_buffer
    }

    pub fn into_output(self) -> String {
        self.output_buffer
    }
}

impl Default for TestIo {
    fn default() -> TestIo {
        TestIo::new()
    }
}

impl InputOutput for TestIo {
    fn read_line(&mut self) -> Result<String, InputError> {
        self.input_buffer.pop_front().ok_or(InputError::EndOfInput)
    }

    fn write(&mut self, text: &str) -> Result<(), OutputError> {
        self.output_buffer.push_str(text);
        Ok(())
    }

    fn random(&mut self) -> u16 {
        self.rng.gen_range(0, 0x8000)
    }
}

impl InputOutput for &mut TestIo {
    fn read_line(&mut self) -> Result<String, InputError> {
        (**self).read_line()
    }

    fn write(&mut self, text: &str) -> Result<(), OutputError> {
        (**self).write(text)
    }

    fn random(&mut self) -> u16 {
        (**self).random()
    }
}

/// Error returned when the emulated program fails.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionError<E> {
    /// Address of the micro-operation that failed. The instruction pointer is left pointing at it.
    pub address: u16,
    pub kind: ExecutionErrorKind<E>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionErrorKind<E> {
    Memory(E),

    /// The stack pointer has its lowest bit set.
    MisalignedStack(u16),

    /// `JMP` was executed while the stack pointer points outside of DATA.
    StackOutsideData(u16),

    /// The operation is recognized but has no implementation.
    Unimplemented(Operation),

    DivideByZero,
    Input(InputError),
    Output(OutputError),
    InvalidInteger(String),

    /// The program did not halt within the given number of steps.
    StepLimit(usize),
}

impl<E: fmt::Display> fmt::Display for ExecutionErrorKind<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionErrorKind::Memory(err) => write!(f, "{}", err),
            ExecutionErrorKind::MisalignedStack(sp) => {
                write!(f, "stack pointer {} is not word aligned", Word(*sp))
            }
            ExecutionErrorKind::StackOutsideData(sp) => {
                write!(f, "stack pointer {} is outside of the data segment", Word(*sp))
            }
            ExecutionErrorKind::Unimplemented(op) => write!(f, "operation {} is not implemented", op),
            ExecutionErrorKind::DivideByZero => write!(f, "division by zero"),
            ExecutionErrorKind::Input(err) => write!(f, "{}", err),
            ExecutionErrorKind::Output(err) => write!(f, "{}", err),
            ExecutionErrorKind::InvalidInteger(input) => write!(f, "invalid integer '{}'", input),
            ExecutionErrorKind::StepLimit(steps) => write!(f, "program did not halt in {} steps", steps),
        }
    }
}

impl<E: fmt::Display> fmt::Display for ExecutionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "at address {}: {}", Word(self.address), self.kind)
    }
}

type ExecResult<E> = Result<(), ExecutionErrorKind<E>>;

/// The emulator contains all neccessary context for executing a PPT program
/// and interfaces for doing IO.
pub struct Emulator<Mem, IO> {
    /// The memory of the emulated machine.
    /// Contains all the micro-operations and data required by the program.
    /// Implements [Memory].
    pub memory: Mem,

    /// The registers and flags of the processor.
    pub state: MachineState,

    /// Interface for the host operations.
    pub io: IO,

    /// True if the execution has been halted.
    pub halted: bool,

    dispatcher: EventDispatcher,
    logger: Logger,
}

impl<Mem, IO> Emulator<Mem, IO> where Mem: Memory, IO: InputOutput {
    /// Create a new emulator. Execution starts from address 0 with every register cleared.
    pub fn new(memory: Mem, io: IO) -> Emulator<Mem, IO> {
        Emulator::with_logger(memory, io, None)
    }

    pub fn with_logger<L>(memory: Mem, io: IO, logger: L) -> Emulator<Mem, IO>
    where
        L: Into<Option<Logger>>,
    {
        let logger = logger
            .into()
            .unwrap_or_else(|| Logger::root(Discard, o!()))
            .new(o!("stage" => "emulation"));

        Emulator {
            memory,
            state: MachineState::default(),
            io,
            halted: false,
            dispatcher: EventDispatcher::new(),
            logger,
        }
    }

    pub fn add_listener<L: EventListener + 'static>(&mut self, listener: L) {
        self.dispatcher.add_listener(listener);
    }

    /// Fetches the micro-operation at the instruction pointer, increments the instruction
    /// pointer and executes the micro-operation.
    ///
    /// # Errors
    /// On failure the instruction pointer is reset to the address of the failed micro-operation.
    pub fn step(&mut self) -> Result<(), ExecutionError<Mem::Error>> {
        if self.halted {
            return Ok(());
        }

        let address = self.state.ip;

        self.execute(address).map_err(|kind| {
            self.state.ip = address;
            ExecutionError { address, kind }
        })
    }

    /// Executes the program until it halts.
    pub fn run(&mut self) -> Result<(), ExecutionError<Mem::Error>> {
        while !self.halted {
            self.step()?;
        }

        Ok(())
    }

    /// Executes the program until it halts or `max_steps` micro-operations have been executed.
    /// Returns the number of executed micro-operations.
    pub fn run_with_limit(&mut self, max_steps: usize) -> Result<usize, ExecutionError<Mem::Error>> {
        let mut steps = 0;

        while !self.halted {
            if steps == max_steps {
                return Err(ExecutionError {
                    address: self.state.ip,
                    kind: ExecutionErrorKind::StepLimit(max_steps),
                });
            }

            self.step()?;
            steps += 1;
        }

        Ok(steps)
    }

    fn execute(&mut self, address: u16) -> ExecResult<Mem::Error> {
        let instruction = self
            .memory
            .get_instruction(address)
            .map_err(ExecutionErrorKind::Memory)?;

        let sp = self.state.pair(RegisterPair::SP);

        if sp.low().bit(0) {
            return Err(ExecutionErrorKind::MisalignedStack(sp.0));
        }

        trace!(self.logger, "step"; "address" => %Word(address), "instruction" => %instruction);

        self.state.ip = address.wrapping_add(1);

        match instruction {
            Instruction::Load { bus, half, source } => {
                let value = self.state.source(source);
                let target = self.state.bus_mut(bus);
                *target = with_half(*target, half, value);
            }
            Instruction::Copy(half) => {
                let value = half_of(self.state.m1, half);
                self.state.m3 = with_half(self.state.m3, half, value);
            }
            Instruction::Store { half, register } => {
                let value = half_of(self.state.m3, half);
                self.state.set_register(register, value);
            }
            Instruction::Clear { bus, half } => {
                let target = self.state.bus_mut(bus);
                *target = with_half(*target, half, Byte(0));
            }
            Instruction::Const { half, value } => {
                self.state.m3 = with_half(self.state.m3, half, value);
            }
            Instruction::Exec(operation) => self.exec(operation, address)?,
        }

        Ok(())
    }

    fn byte_operation<F>(&mut self, write_back: bool, f: F)
    where
        F: FnOnce(Byte, Byte, bool) -> Output<Byte>,
    {
        let out = f(self.state.m1.low(), self.state.m2.low(), self.state.flags.carry);

        if write_back {
            self.state.set_m3_low(out.value);
        }

        self.state.flags.set(out.flags);
    }

    fn word_operation<F>(&mut self, write_back: bool, f: F)
    where
        F: FnOnce(Word, Word, bool) -> Output<Word>,
    {
        let out = f(self.state.m1, self.state.m2, self.state.flags.carry);

        if write_back {
            self.state.m3 = out.value;
        }

        self.state.flags.set(out.flags);
    }

    fn set_wide_flags(&mut self, fits: bool) {
        self.state.flags.carry = !fits;
        self.state.flags.overflow = !fits;
    }

    fn jump(&mut self, from: u16) {
        let to = self.state.m1.0;
        self.state.ip = to;
        self.dispatcher.dispatch(Event::Jump { from, to });
    }

    fn write_memory(&mut self, address: u16, value: Byte) -> ExecResult<Mem::Error> {
        self.memory
            .write(address, value)
            .map_err(ExecutionErrorKind::Memory)?;

        self.dispatcher.dispatch(Event::MemoryWrite { address, value });

        Ok(())
    }

    fn read_line(&mut self) -> Result<String, ExecutionErrorKind<Mem::Error>> {
        self.io.read_line().map_err(ExecutionErrorKind::Input)
    }

    fn write_output(&mut self, text: &str) -> ExecResult<Mem::Error> {
        self.io.write(text).map_err(ExecutionErrorKind::Output)
    }

    fn syscall(&mut self, operation: Operation) -> ExecResult<Mem::Error> {
        let ax = self.state.pair(RegisterPair::A);

        match operation {
            Operation::PutString => {
                let mut text = String::new();
                let mut address = ax.0;

                loop {
                    let byte = self.memory.read(address).map_err(ExecutionErrorKind::Memory)?;

                    if byte.is_zero() {
                        break;
                    }

                    text.push(byte.0 as char);
                    address = address.wrapping_add(1);
                }

                self.write_output(&text)?;
            }
            Operation::PutInt => self.write_output(&ax.signed().to_string())?,
            Operation::PutChar => {
                let c = self.state.register(Register::AL).0 as char;
                self.write_output(&c.to_string())?;
            }
            Operation::GetString => {
                let line = self.read_line()?;

                let bytes: Vec<(u16, Byte)> = line
                    .chars()
                    .map(|c| Byte::from_int(c as i64))
                    .chain(std::iter::once(Byte(0)))
                    .enumerate()
                    .map(|(i, byte)| (ax.0.wrapping_add(i as u16), byte))
                    .collect();

                // The whole buffer is checked before the first byte is stored.
                for (address, _) in &bytes {
                    self.memory.check_write(*address).map_err(ExecutionErrorKind::Memory)?;
                }

                for (address, byte) in bytes {
                    self.write_memory(address, byte)?;
                }
            }
            Operation::GetInt => {
                let line = self.read_line()?;

                let value: i64 = line
                    .trim()
                    .parse()
                    .map_err(|_| ExecutionErrorKind::InvalidInteger(line.clone()))?;

                self.state.set_pair(RegisterPair::A, Word::from_int(value));
            }
            Operation::Random => {
                let value = self.io.random() & 0x7FFF;
                self.state.set_pair(RegisterPair::A, Word(value));
            }
            _ => return Err(ExecutionErrorKind::Unimplemented(operation)),
        }

        self.dispatcher.dispatch(Event::Syscall { operation });

        Ok(())
    }

    fn exec(&mut self, operation: Operation, address: u16) -> ExecResult<Mem::Error> {
        use Operation::*;

        let state = &mut self.state;

        match operation {
            AddB => self.byte_operation(true, |a, b, _| alu::add(a, b, false)),
            AddW => self.word_operation(true, |a, b, _| alu::add(a, b, false)),
            AdcB => self.byte_operation(true, alu::add),
            AdcW => self.word_operation(true, alu::add),
            SubB => self.byte_operation(true, |a, b, _| alu::sub(a, b, false)),
            SubW => self.word_operation(true, |a, b, _| alu::sub(a, b, false)),
            SbbB => self.byte_operation(true, alu::sub),
            SbbW => self.word_operation(true, alu::sub),
            CmpB => self.byte_operation(false, |a, b, _| alu::sub(a, b, false)),
            CmpW => self.word_operation(false, |a, b, _| alu::sub(a, b, false)),
            AndB => self.byte_operation(true, |a, b, _| alu::and(a, b)),
            AndW => self.word_operation(true, |a, b, _| alu::and(a, b)),
            OrB => self.byte_operation(true, |a, b, _| alu::or(a, b)),
            OrW => self.word_operation(true, |a, b, _| alu::or(a, b)),
            XorB => self.byte_operation(true, |a, b, _| alu::xor(a, b)),
            XorW => self.word_operation(true, |a, b, _| alu::xor(a, b)),
            TestB => self.byte_operation(false, |a, b, _| alu::and(a, b)),
            TestW => self.word_operation(false, |a, b, _| alu::and(a, b)),
            IncB => self.byte_operation(true, |a, _, _| alu::increment(a)),
            IncW => self.word_operation(true, |a, _, _| alu::increment(a)),
            DecB => self.byte_operation(true, |a, _, _| alu::decrement(a)),
            DecW => self.word_operation(true, |a, _, _| alu::decrement(a)),
            NegB => self.byte_operation(true, |a, _, _| alu::negate(a)),
            NegW => self.word_operation(true, |a, _, _| alu::negate(a)),
            ShlB => self.byte_operation(true, |a, _, _| alu::shift_left(a)),
            ShlW => self.word_operation(true, |a, _, _| alu::shift_left(a)),
            ShrB => self.byte_operation(true, |a, _, _| alu::shift_right(a)),
            ShrW => self.word_operation(true, |a, _, _| alu::shift_right(a)),
            SarB => self.byte_operation(true, |a, _, _| alu::shift_right_arithmetic(a)),
            SarW => self.word_operation(true, |a, _, _| alu::shift_right_arithmetic(a)),
            NotB => {
                let value = alu::not(state.m1.low());
                state.set_m3_low(value);
            }
            NotW => state.m3 = alu::not(state.m1),

            MulB => {
                let product = state.register(Register::AL).unsigned() * state.m1.low().unsigned();
                let result = Word::from_int(product);
                state.set_pair(RegisterPair::A, result);
                self.set_wide_flags(result.high().is_zero());
            }
            MulW => {
                let product = state.pair(RegisterPair::A).unsigned() * state.m1.unsigned();
                let result = DWord::from_int(product);
                state.set_pair(RegisterPair::D, result.high());
                state.set_pair(RegisterPair::A, result.low());
                self.set_wide_flags(result.high().is_zero());
            }
            ImulB => {
                let product = state.register(Register::AL).signed() * state.m1.low().signed();
                state.set_pair(RegisterPair::A, Word::from_int(product));
                self.set_wide_flags(Byte::from_int(product).signed() == product);
            }
            ImulW => {
                let product = state.pair(RegisterPair::A).signed() * state.m1.signed();
                let result = DWord::from_int(product);
                state.set_pair(RegisterPair::D, result.high());
                state.set_pair(RegisterPair::A, result.low());
                self.set_wide_flags(result.low().signed() == product);
            }
            DivB | IdivB => {
                let signed = operation == IdivB;
                let dividend = state.pair(RegisterPair::A);
                let divisor = state.m1.low();

                if divisor.is_zero() {
                    return Err(ExecutionErrorKind::DivideByZero);
                }

                let (quotient, remainder) = divide(dividend, divisor, signed);
                let fits = fits::<Byte>(quotient, signed);

                state.set_register(Register::AL, Byte::from_int(quotient));
                state.set_register(Register::AH, Byte::from_int(remainder));
                self.set_wide_flags(fits);
            }
            DivW | IdivW => {
                let signed = operation == IdivW;
                let dividend = DWord::from_words(state.pair(RegisterPair::D), state.pair(RegisterPair::A));
                let divisor = state.m1;

                if divisor.is_zero() {
                    return Err(ExecutionErrorKind::DivideByZero);
                }

                let (quotient, remainder) = divide(dividend, divisor, signed);
                let fits = fits::<Word>(quotient, signed);

                state.set_pair(RegisterPair::A, Word::from_int(quotient));
                state.set_pair(RegisterPair::D, Word::from_int(remainder));
                self.set_wide_flags(fits);
            }
            Cbw => {
                let extension = if state.register(Register::AL).msb() { 0xFF } else { 0 };
                state.set_register(Register::AH, Byte(extension));
            }
            Cwd => {
                let extension = if state.pair(RegisterPair::A).msb() { 0xFFFF } else { 0 };
                state.set_pair(RegisterPair::D, Word(extension));
            }
            Clc => state.flags.carry = false,
            Cmc => state.flags.carry = !state.flags.carry,
            Stc => state.flags.carry = true,

            AddAddr => state.m3 = Word(state.m1.0.wrapping_add(state.m2.0)),
            ShiftAddr1 => state.m3 = Word(state.m1.0 << 1),
            ShiftAddr2 => state.m3 = Word(state.m1.0 << 2),
            ShiftAddr3 => state.m3 = Word(state.m1.0 << 3),
            Inc2W => state.m3 = Word(state.m1.0.wrapping_add(2)),
            Dec2W => state.m3 = Word(state.m1.0.wrapping_sub(2)),

            VerdictAbove | VerdictNotAbove
            | VerdictCarry | VerdictNotCarry
            | VerdictZero | VerdictNotZero
            | VerdictOverflow | VerdictNotOverflow
            | VerdictSign | VerdictNotSign
            | VerdictGreater | VerdictNotGreater
            | VerdictLess | VerdictNotLess => state.flags.verdict = verdict(operation, state.flags),
            NegateVerdict => state.flags.verdict = !state.flags.verdict,

            Jump => {
                let sp = state.pair(RegisterPair::SP);

                if !sp.msb() {
                    return Err(ExecutionErrorKind::StackOutsideData(sp.0));
                }

                self.jump(address);
            }
            JumpVerdict => {
                if state.flags.verdict {
                    self.jump(address);
                }
            }

            SetMemoryPointer => state.mp = state.m1.0,
            IncrementMemoryPointer => state.mp = state.mp.wrapping_add(1),
            DecrementMemoryPointer => state.mp = state.mp.wrapping_sub(1),
            ReadMemory => {
                let mp = state.mp;
                let value = self.memory.read(mp).map_err(ExecutionErrorKind::Memory)?;
                self.state.set_m3_low(value);
            }
            WriteMemory => {
                let (mp, value) = (state.mp, state.m2.low());
                self.write_memory(mp, value)?;
            }

            PutString | PutInt | PutChar | GetString | GetInt | Random => self.syscall(operation)?,

            Halt => {
                self.halted = true;
                info!(self.logger, "halted"; "address" => %Word(address));
                self.dispatcher.dispatch(Event::Halt { address });
            }
            InterruptReturn => return Err(ExecutionErrorKind::Unimplemented(operation)),
        }

        Ok(())
    }
}

/// Sign-magnitude division: the quotient is truncated towards zero and the remainder has the
/// sign of the dividend.
fn divide<N: BitWord, D: BitWord>(dividend: N, divisor: D, signed: bool) -> (i64, i64) {
    let (x, y) = match signed {
        true => (dividend.signed(), divisor.signed()),
        false => (dividend.unsigned(), divisor.unsigned()),
    };

    (x / y, x % y)
}

fn fits<W: BitWord>(value: i64, signed: bool) -> bool {
    let word = W::from_int(value);

    match signed {
        true => word.signed() == value,
        false => word.unsigned() == value,
    }
}

fn verdict(operation: Operation, flags: Flags) -> bool {
    use Operation::*;

    let Flags { carry, zero, sign, overflow, .. } = flags;

    match operation {
        VerdictAbove => !carry && !zero,
        VerdictCarry => carry,
        VerdictZero => zero,
        VerdictOverflow => overflow,
        VerdictSign => sign,
        VerdictGreater => !zero && sign == overflow,
        VerdictLess => sign != overflow,
        VerdictNotAbove => !verdict(VerdictAbove, flags),
        VerdictNotCarry => !carry,
        VerdictNotZero => !zero,
        VerdictNotOverflow => !overflow,
        VerdictNotSign => !sign,
        VerdictNotGreater => !verdict(VerdictGreater, flags),
        VerdictNotLess => !verdict(VerdictLess, flags),
        _ => flags.verdict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::TextEntry;

    use std::cell::RefCell;
    use std::rc::Rc;

    fn machine(instructions: Vec<Instruction>, io: TestIo) -> Emulator<SegmentedMemory, TestIo> {
        let program = ObjectProgram {
            text: Segment::from_values(0, instructions.into_iter().map(TextEntry::new)),
            data: Segment::from_values(DATA_START, b"hi\0".iter().map(|b| Byte(*b))),
            constants: Segment::from_values(0x10, vec![Byte(b'-'), Byte(0)]),
        };

        Emulator::new(SegmentedMemory::new(&program), io)
    }

    fn exec(operation: Operation) -> Emulator<SegmentedMemory, TestIo> {
        machine(vec![Instruction::Exec(operation)], TestIo::new())
    }

    #[test]
    fn test_micro_operations() {
        let mut emulator = machine(vec![
            Instruction::Const { half: Half::High, value: Byte(0x12) },
            Instruction::Const { half: Half::Low, value: Byte(0x34) },
            Instruction::Store { half: Half::High, register: Register::BH },
            Instruction::Load { bus: Bus::M1, half: Half::Low, source: Source::M3(Half::Low) },
            Instruction::Load { bus: Bus::M2, half: Half::High, source: Source::Register(Register::BH) },
            Instruction::Clear { bus: Bus::M3, half: Half::Low },
            Instruction::Copy(Half::Low),
            Instruction::Exec(Operation::Halt),
        ], TestIo::new());

        emulator.run().unwrap();

        assert_eq!(emulator.state.register(Register::BH), Byte(0x12));
        assert_eq!(emulator.state.m1, Word(0x0034));
        assert_eq!(emulator.state.m2, Word(0x1200));
        assert_eq!(emulator.state.m3, Word(0x1234));
        assert_eq!(emulator.state.ip, 8);
    }

    #[test]
    fn test_arithmetic_flags() {
        let mut emulator = exec(Operation::AddB);
        emulator.state.m1 = Word(0xAA7F);
        emulator.state.m2 = Word(0x0001);
        emulator.state.m3 = Word(0x5500);
        emulator.step().unwrap();

        assert_eq!(emulator.state.m3, Word(0x5580));
        assert!(emulator.state.flags.overflow);
        assert!(emulator.state.flags.sign);
        assert!(!emulator.state.flags.carry);

        let mut emulator = exec(Operation::SbbW);
        emulator.state.m1 = Word(0);
        emulator.state.m2 = Word(0);
        emulator.state.flags.carry = true;
        emulator.step().unwrap();

        assert_eq!(emulator.state.m3, Word(0xFFFF));
        assert!(emulator.state.flags.carry);
        assert!(!emulator.state.flags.overflow);
    }

    #[test]
    fn test_compare_keeps_m3() {
        let mut emulator = exec(Operation::CmpW);
        emulator.state.m1 = Word(5);
        emulator.state.m2 = Word(5);
        emulator.state.m3 = Word(0x1234);
        emulator.step().unwrap();

        assert_eq!(emulator.state.m3, Word(0x1234));
        assert!(emulator.state.flags.zero);

        let mut emulator = exec(Operation::TestB);
        emulator.state.m1 = Word(0x0F);
        emulator.state.m2 = Word(0xF0);
        emulator.state.flags.carry = true;
        emulator.step().unwrap();

        assert_eq!(emulator.state.m3, Word(0));
        assert!(emulator.state.flags.zero);
        assert!(!emulator.state.flags.carry);
    }

    #[test]
    fn test_address_operations_keep_flags() {
        let mut emulator = exec(Operation::AddAddr);
        emulator.state.m1 = Word(0xFFFF);
        emulator.state.m2 = Word(0x0002);
        emulator.step().unwrap();

        assert_eq!(emulator.state.m3, Word(1));
        assert_eq!(emulator.state.flags, Flags::default());

        let mut emulator = exec(Operation::ShiftAddr3);
        emulator.state.m1 = Word(0x2001);
        emulator.step().unwrap();
        assert_eq!(emulator.state.m3, Word(0x0008));

        let mut emulator = exec(Operation::Dec2W);
        emulator.state.m1 = Word(0xFFFC);
        emulator.step().unwrap();
        assert_eq!(emulator.state.m3, Word(0xFFFA));
    }

    #[test]
    fn test_multiply() {
        let mut emulator = exec(Operation::MulB);
        emulator.state.set_register(Register::AL, Byte(200));
        emulator.state.m1 = Word(2);
        emulator.step().unwrap();

        assert_eq!(emulator.state.pair(RegisterPair::A), Word(400));
        assert!(emulator.state.flags.carry && emulator.state.flags.overflow);

        let mut emulator = exec(Operation::ImulW);
        emulator.state.set_pair(RegisterPair::A, Word::from_int(-300));
        emulator.state.m1 = Word(300);
        emulator.step().unwrap();

        let product = DWord::from_words(emulator.state.pair(RegisterPair::D), emulator.state.pair(RegisterPair::A));
        assert_eq!(product.signed(), -90000);
        assert!(emulator.state.flags.carry);

        let mut emulator = exec(Operation::ImulB);
        emulator.state.set_register(Register::AL, Byte::from_int(-3));
        emulator.state.m1 = Word(5);
        emulator.step().unwrap();

        assert_eq!(emulator.state.pair(RegisterPair::A).signed(), -15);
        assert!(!emulator.state.flags.carry);
    }

    #[test]
    fn test_divide() {
        let mut emulator = exec(Operation::DivB);
        emulator.state.set_pair(RegisterPair::A, Word(400));
        emulator.state.m1 = Word(7);
        emulator.step().unwrap();

        assert_eq!(emulator.state.register(Register::AL), Byte(57));
        assert_eq!(emulator.state.register(Register::AH), Byte(1));

        let mut emulator = exec(Operation::IdivB);
        emulator.state.set_pair(RegisterPair::A, Word::from_int(-7));
        emulator.state.m1 = Word(2);
        emulator.step().unwrap();

        assert_eq!(emulator.state.register(Register::AL).signed(), -3);
        assert_eq!(emulator.state.register(Register::AH).signed(), -1);

        let mut emulator = exec(Operation::DivW);
        emulator.state.set_pair(RegisterPair::D, Word(1));
        emulator.state.set_pair(RegisterPair::A, Word(0));
        emulator.state.m1 = Word(3);
        emulator.step().unwrap();

        assert_eq!(emulator.state.pair(RegisterPair::A), Word(21845));
        assert_eq!(emulator.state.pair(RegisterPair::D), Word(1));
        assert!(!emulator.state.flags.overflow);
    }

    #[test]
    fn test_divide_by_zero() {
        let mut emulator = exec(Operation::IdivW);
        emulator.state.set_pair(RegisterPair::A, Word(10));

        let err = emulator.step().unwrap_err();

        assert_eq!(err, ExecutionError { address: 0, kind: ExecutionErrorKind::DivideByZero });
        assert_eq!(emulator.state.ip, 0);
        assert_eq!(emulator.state.pair(RegisterPair::A), Word(10));
    }

    #[test]
    fn test_sign_extension() {
        let mut emulator = machine(vec![Instruction::Exec(Operation::Cbw), Instruction::Exec(Operation::Cwd)], TestIo::new());
        emulator.state.set_pair(RegisterPair::A, Word(0x0080));
        emulator.state.set_pair(RegisterPair::D, Word(0x1234));
        emulator.step().unwrap();
        emulator.step().unwrap();

        assert_eq!(emulator.state.pair(RegisterPair::A), Word(0xFF80));
        assert_eq!(emulator.state.pair(RegisterPair::D), Word(0xFFFF));
    }

    #[test]
    fn test_verdicts() {
        let flags = Flags { carry: false, zero: false, sign: true, overflow: true, verdict: false };

        assert!(verdict(Operation::VerdictAbove, flags));
        assert!(verdict(Operation::VerdictGreater, flags));
        assert!(!verdict(Operation::VerdictLess, flags));
        assert!(verdict(Operation::VerdictNotLess, flags));
        assert!(!verdict(Operation::VerdictNotSign, flags));

        let flags = Flags { zero: true, ..flags };
        assert!(!verdict(Operation::VerdictAbove, flags));
        assert!(verdict(Operation::VerdictNotGreater, flags));

        let mut emulator = machine(vec![
            Instruction::Exec(Operation::VerdictZero),
            Instruction::Exec(Operation::NegateVerdict),
        ], TestIo::new());
        emulator.state.flags.zero = true;
        emulator.step().unwrap();
        assert!(emulator.state.flags.verdict);
        emulator.step().unwrap();
        assert!(!emulator.state.flags.verdict);
    }

    #[test]
    fn test_jumps() {
        let mut emulator = exec(Operation::Jump);
        emulator.state.m1 = Word(0x40);

        let err = emulator.step().unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::StackOutsideData(0));

        let jumps = Rc::new(RefCell::new(Vec::new()));
        let sink = jumps.clone();
        emulator.add_listener(move |event: &Event| sink.borrow_mut().push(event.clone()));

        emulator.state.set_pair(RegisterPair::SP, Word(0xFFFC));
        emulator.step().unwrap();

        assert_eq!(emulator.state.ip, 0x40);
        assert_eq!(*jumps.borrow(), vec![Event::Jump { from: 0, to: 0x40 }]);

        let mut emulator = exec(Operation::JumpVerdict);
        emulator.state.m1 = Word(0x40);
        emulator.step().unwrap();
        assert_eq!(emulator.state.ip, 1);
    }

    #[test]
    fn test_misaligned_stack() {
        let mut emulator = exec(Operation::Halt);
        emulator.state.set_pair(RegisterPair::SP, Word(0xFFFD));

        let err = emulator.step().unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::MisalignedStack(0xFFFD));
        assert!(!emulator.halted);
    }

    #[test]
    fn test_instruction_pointer_out_of_range() {
        let mut emulator = exec(Operation::Clc);
        emulator.step().unwrap();

        let err = emulator.step().unwrap_err();
        assert_eq!(err.address, 1);
        assert_eq!(err.kind, ExecutionErrorKind::Memory(MemoryError {
            address: 1,
            kind: MemoryErrorKind::InstructionOutOfRange,
        }));
    }

    #[test]
    fn test_memory_access() {
        let mut emulator = machine(vec![
            Instruction::Exec(Operation::SetMemoryPointer),
            Instruction::Exec(Operation::WriteMemory),
            Instruction::Exec(Operation::IncrementMemoryPointer),
            Instruction::Exec(Operation::ReadMemory),
            Instruction::Exec(Operation::DecrementMemoryPointer),
            Instruction::Exec(Operation::ReadMemory),
        ], TestIo::new());
        emulator.state.m1 = Word(0x8000);
        emulator.state.m2 = Word(0x00AB);
        emulator.run_with_limit(6).unwrap_err();

        assert_eq!(emulator.memory.read(0x8000), Ok(Byte(0xAB)));
        assert_eq!(emulator.state.m3, Word(0x00AB));
        assert_eq!(emulator.state.mp, 0x8000);

        let mut emulator = exec(Operation::WriteMemory);
        emulator.state.mp = 0x10;
        let err = emulator.step().unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Memory(MemoryError {
            address: 0x10,
            kind: MemoryErrorKind::WriteToConst,
        }));

        let mut emulator = exec(Operation::ReadMemory);
        emulator.state.mp = 0x11;
        emulator.step().unwrap();
        assert_eq!(emulator.state.m3, Word(0));

        let mut emulator = exec(Operation::ReadMemory);
        emulator.state.mp = 0x12;
        let err = emulator.step().unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Memory(MemoryError {
            address: 0x12,
            kind: MemoryErrorKind::UnmappedConst,
        }));
        assert_eq!(emulator.state.m3, Word(0));
    }

    #[test]
    fn test_puts_past_loaded_constants() {
        let mut emulator = exec(Operation::PutString);
        emulator.state.set_pair(RegisterPair::A, Word(0x0F));

        let err = emulator.step().unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Memory(MemoryError {
            address: 0x0F,
            kind: MemoryErrorKind::UnmappedConst,
        }));
        assert_eq!(err.to_string(), format!("at address {}: read from unmapped address {}", Word(0), Word(0x0F)));

        let mut emulator = exec(Operation::PutString);
        emulator.state.set_pair(RegisterPair::A, Word(0x10));
        emulator.step().unwrap();
        assert_eq!(emulator.io.output(), "-");
    }

    #[test]
    fn test_output() {
        let mut emulator = machine(vec![
            Instruction::Exec(Operation::PutString),
            Instruction::Exec(Operation::PutInt),
            Instruction::Exec(Operation::PutChar),
            Instruction::Exec(Operation::Halt),
        ], TestIo::new());
        emulator.state.set_pair(RegisterPair::A, Word(0x8000));
        emulator.state.m1 = Word(0x1234);
        emulator.run().unwrap();

        assert_eq!(emulator.io.output(), "hi-32768\0");
        assert_eq!(emulator.state.m1, Word(0x1234));
        assert_eq!(emulator.state.mp, 0);
        assert!(emulator.halted);
    }

    #[test]
    fn test_input() {
        let mut emulator = machine(vec![
            Instruction::Exec(Operation::GetString),
            Instruction::Exec(Operation::GetInt),
            Instruction::Exec(Operation::GetInt),
        ], TestIo::with_input(vec!["abc", " -12 ", "x"]));
        emulator.state.set_pair(RegisterPair::A, Word(0x8100));

        emulator.step().unwrap();
        assert_eq!(emulator.memory.read(0x8100), Ok(Byte(b'a')));
        assert_eq!(emulator.memory.read(0x8102), Ok(Byte(b'c')));
        assert_eq!(emulator.memory.read(0x8103), Ok(Byte(0)));

        emulator.step().unwrap();
        assert_eq!(emulator.state.pair(RegisterPair::A).signed(), -12);

        let err = emulator.step().unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::InvalidInteger("x".into()));

        let mut emulator = exec(Operation::GetInt);
        let err = emulator.step().unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Input(InputError::EndOfInput));
    }

    #[test]
    fn test_gets_past_end_of_data() {
        let mut emulator = machine(vec![Instruction::Exec(Operation::GetString)], TestIo::with_input(vec!["abc"]));
        emulator.state.set_pair(RegisterPair::A, Word(0xFFFE));

        let writes = Rc::new(RefCell::new(Vec::new()));
        let sink = writes.clone();
        emulator.add_listener(move |event: &Event| sink.borrow_mut().push(event.clone()));

        let err = emulator.step().unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Memory(MemoryError {
            address: 0,
            kind: MemoryErrorKind::WriteToConst,
        }));
        assert_eq!(emulator.state.ip, 0);
        assert_eq!(emulator.memory.read(0xFFFE), Ok(Byte(0)));
        assert_eq!(emulator.memory.read(0xFFFF), Ok(Byte(0)));
        assert!(writes.borrow().is_empty());
    }

    struct ClosedOutput;

    impl InputOutput for ClosedOutput {
        fn read_line(&mut self) -> Result<String, InputError> {
            Err(InputError::EndOfInput)
        }

        fn write(&mut self, _text: &str) -> Result<(), OutputError> {
            Err(OutputError("broken pipe".into()))
        }

        fn random(&mut self) -> u16 {
            0
        }
    }

    #[test]
    fn test_output_error() {
        let program = ObjectProgram {
            text: Segment::from_values(0, vec![TextEntry::new(Instruction::Exec(Operation::PutInt))]),
            data: Segment::new(),
            constants: Segment::new(),
        };
        let mut emulator = Emulator::new(SegmentedMemory::new(&program), ClosedOutput);

        let err = emulator.step().unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Output(OutputError("broken pipe".into())));
        assert_eq!(err.to_string(), format!("at address {}: could not write output: broken pipe", Word(0)));
        assert_eq!(emulator.state.ip, 0);
    }

    #[test]
    fn test_random() {
        let mut first = TestIo::new();
        let mut second = TestIo::new();

        for _ in 0..100 {
            let value = first.random();
            assert!(value < 0x8000);
            assert_eq!(value, second.random());
        }

        let mut emulator = exec(Operation::Random);
        emulator.step().unwrap();
        assert!(!emulator.state.pair(RegisterPair::A).msb());
    }

    #[test]
    fn test_unimplemented_and_limit() {
        let mut emulator = exec(Operation::InterruptReturn);
        let err = emulator.step().unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Unimplemented(Operation::InterruptReturn));

        let mut emulator = exec(Operation::Jump);
        emulator.state.set_pair(RegisterPair::SP, Word(0xFFFC));
        let err = emulator.run_with_limit(50).unwrap_err();
        assert_eq!(err, ExecutionError { address: 0, kind: ExecutionErrorKind::StepLimit(50) });
    }
}
