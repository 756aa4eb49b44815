//! Types for representing PPT micro-operations and their parts.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;

use crate::bits::{BitStringError, Byte};

/// The named 8-bit registers of the PPT machine.
///
/// Every x86 register is split into a high and a low half. `M4` and `M5` are scratch pairs used
/// by the assembler for effective addresses and temporaries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    AH,
    AL,
    BH,
    BL,
    CH,
    CL,
    DH,
    DL,
    M4H,
    M4L,
    M5H,
    M5L,
    DIH,
    DIL,
    SIH,
    SIL,
    BPH,
    BPL,
    SPH,
    SPL,
}

impl Register {
    pub const ALL: [Register; 20] = [
        Register::AH,
        Register::AL,
        Register::BH,
        Register::BL,
        Register::CH,
        Register::CL,
        Register::DH,
        Register::DL,
        Register::M4H,
        Register::M4L,
        Register::M5H,
        Register::M5L,
        Register::DIH,
        Register::DIL,
        Register::SIH,
        Register::SIL,
        Register::BPH,
        Register::BPL,
        Register::SPH,
        Register::SPL,
    ];

    /// Position of the register in the register file.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Register::AH => "AH",
            Register::AL => "AL",
            Register::BH => "BH",
            Register::BL => "BL",
            Register::CH => "CH",
            Register::CL => "CL",
            Register::DH => "DH",
            Register::DL => "DL",
            Register::M4H => "M4H",
            Register::M4L => "M4L",
            Register::M5H => "M5H",
            Register::M5L => "M5L",
            Register::DIH => "DIH",
            Register::DIL => "DIL",
            Register::SIH => "SIH",
            Register::SIL => "SIL",
            Register::BPH => "BPH",
            Register::BPL => "BPL",
            Register::SPH => "SPH",
            Register::SPL => "SPL",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = InstructionError;

    fn from_str(input: &str) -> Result<Register, InstructionError> {
        Register::ALL
            .iter()
            .find(|register| register.name() == input)
            .copied()
            .ok_or_else(|| InstructionError::UnknownRegister(input.to_string()))
    }
}

/// A 16-bit register made of two [Registers](Register).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegisterPair {
    A,
    B,
    C,
    D,
    SI,
    DI,
    BP,
    SP,
    M4,
    M5,
}

impl RegisterPair {
    pub fn high(self) -> Register {
        match self {
            RegisterPair::A => Register::AH,
            RegisterPair::B => Register::BH,
            RegisterPair::C => Register::CH,
            RegisterPair::D => Register::DH,
            RegisterPair::SI => Register::SIH,
            RegisterPair::DI => Register::DIH,
            RegisterPair::BP => Register::BPH,
            RegisterPair::SP => Register::SPH,
            RegisterPair::M4 => Register::M4H,
            RegisterPair::M5 => Register::M5H,
        }
    }

    pub fn low(self) -> Register {
        match self {
            RegisterPair::A => Register::AL,
            RegisterPair::B => Register::BL,
            RegisterPair::C => Register::CL,
            RegisterPair::D => Register::DL,
            RegisterPair::SI => Register::SIL,
            RegisterPair::DI => Register::DIL,
            RegisterPair::BP => Register::BPL,
            RegisterPair::SP => Register::SPL,
            RegisterPair::M4 => Register::M4L,
            RegisterPair::M5 => Register::M5L,
        }
    }

    /// Returns the register holding the given half of the pair.
    pub fn half(self, half: Half) -> Register {
        match half {
            Half::High => self.high(),
            Half::Low => self.low(),
        }
    }
}

/// One of the three 16-bit bus registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Bus {
    M1,
    M2,
    M3,
}

impl Bus {
    fn digit(self) -> char {
        match self {
            Bus::M1 => '1',
            Bus::M2 => '2',
            Bus::M3 => '3',
        }
    }

    fn from_digit(digit: char) -> Option<Bus> {
        match digit {
            '1' => Some(Bus::M1),
            '2' => Some(Bus::M2),
            '3' => Some(Bus::M3),
            _ => None,
        }
    }
}

/// Selects the high or the low byte of a 16-bit register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Half {
    High,
    Low,
}

impl Half {
    fn letter(self) -> char {
        match self {
            Half::High => 'H',
            Half::Low => 'L',
        }
    }

    fn from_letter(letter: char) -> Option<Half> {
        match letter {
            'H' => Some(Half::High),
            'L' => Some(Half::Low),
            _ => None,
        }
    }
}

/// Where a `LOAD` micro-operation takes its byte from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    Register(Register),
    M3(Half),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Source::Register(register) => write!(f, "{}", register),
            Source::M3(half) => write!(f, "M3{}", half.letter()),
        }
    }
}

impl FromStr for Source {
    type Err = InstructionError;

    fn from_str(input: &str) -> Result<Source, InstructionError> {
        match input {
            "M3H" => Ok(Source::M3(Half::High)),
            "M3L" => Ok(Source::M3(Half::Low)),
            register => register.parse().map(Source::Register),
        }
    }
}

impl From<Register> for Source {
    fn from(register: Register) -> Source {
        Source::Register(register)
    }
}

macro_rules! operations {
    ( $( $(#[$doc:meta])* $variant:ident => $name:literal, )* ) => {
        /// Named operations executed by the `EXEC` micro-operation.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum Operation {
            $( $(#[$doc])* $variant, )*
        }

        impl Operation {
            pub const ALL: &'static [Operation] = &[ $( Operation::$variant, )* ];

            pub fn name(&self) -> &'static str {
                match self {
                    $( Operation::$variant => $name, )*
                }
            }
        }
    };
}

operations! {
    /// M3 = M1 + M2 (bytes).
    AddB => "ADDB",
    /// M3 = M1 + M2 (words).
    AddW => "ADDW",
    /// M3 = M1 + M2 + carry (bytes).
    AdcB => "ADCB",
    /// M3 = M1 + M2 + carry (words).
    AdcW => "ADCW",
    /// M3 = M1 - M2 (bytes).
    SubB => "SUBB",
    /// M3 = M1 - M2 (words).
    SubW => "SUBW",
    /// M3 = M1 - M2 - carry (bytes).
    SbbB => "SBBB",
    /// M3 = M1 - M2 - carry (words).
    SbbW => "SBBW",
    /// Like `SUBB` but leaves M3 untouched.
    CmpB => "CMPB",
    /// Like `SUBW` but leaves M3 untouched.
    CmpW => "CMPW",
    AndB => "ANDB",
    AndW => "ANDW",
    OrB => "ORB",
    OrW => "ORW",
    XorB => "XORB",
    XorW => "XORW",
    /// Like `ANDB` but leaves M3 untouched.
    TestB => "TESTB",
    /// Like `ANDW` but leaves M3 untouched.
    TestW => "TESTW",
    IncB => "INCB",
    IncW => "INCW",
    DecB => "DECB",
    DecW => "DECW",
    NotB => "NOTB",
    NotW => "NOTW",
    NegB => "NEGB",
    NegW => "NEGW",
    ShlB => "SHLB",
    ShlW => "SHLW",
    ShrB => "SHRB",
    ShrW => "SHRW",
    SarB => "SARB",
    SarW => "SARW",
    /// AX = AL * M1L.
    MulB => "MULB",
    /// DX:AX = AX * M1.
    MulW => "MULW",
    ImulB => "IMULB",
    ImulW => "IMULW",
    /// AL = AX / M1L, AH = AX % M1L.
    DivB => "DIVB",
    /// AX = DX:AX / M1, DX = DX:AX % M1.
    DivW => "DIVW",
    IdivB => "IDIVB",
    IdivW => "IDIVW",
    /// Sign-extends AL into AH.
    Cbw => "CBW",
    /// Sign-extends AX into DX.
    Cwd => "CWD",
    Clc => "CLC",
    Cmc => "CMC",
    Stc => "STC",
    /// M3 = M1 + M2 without touching the flags.
    AddAddr => "ADDADDR",
    /// M3 = M1 << 1 without touching the flags.
    ShiftAddr1 => "SHIFTADDR1",
    ShiftAddr2 => "SHIFTADDR2",
    ShiftAddr3 => "SHIFTADDR3",
    /// M3 = M1 + 2, used to pop the stack.
    Inc2W => "INC2W",
    /// M3 = M1 - 2, used to push to the stack.
    Dec2W => "DEC2W",
    VerdictAbove => "VA",
    VerdictCarry => "VC",
    VerdictZero => "VZ",
    VerdictOverflow => "VO",
    VerdictSign => "VS",
    VerdictGreater => "VG",
    VerdictLess => "VL",
    VerdictNotAbove => "VNA",
    VerdictNotCarry => "VNC",
    VerdictNotZero => "VNZ",
    VerdictNotOverflow => "VNO",
    VerdictNotSign => "VNS",
    VerdictNotGreater => "VNG",
    VerdictNotLess => "VNL",
    /// Negates the verdict.
    NegateVerdict => "NV",
    /// IP = M1.
    Jump => "JMP",
    /// IP = M1 if the verdict is set.
    JumpVerdict => "JV",
    /// MP = M1.
    SetMemoryPointer => "SMP",
    IncrementMemoryPointer => "IMP",
    DecrementMemoryPointer => "DMP",
    /// M3L = memory[MP].
    ReadMemory => "RMEM",
    /// memory[MP] = M2L.
    WriteMemory => "WMEM",
    PutString => "PUTS",
    PutInt => "PUTINT",
    PutChar => "PUTC",
    GetString => "GETS",
    GetInt => "GETINT",
    Random => "RAND",
    Halt => "HLT",
    /// Interrupt return. Recognized but not implemented by the emulator.
    InterruptReturn => "IRET",
}

lazy_static! {
    static ref OPERATIONS_BY_NAME: HashMap<&'static str, Operation> = Operation::ALL
        .iter()
        .map(|op| (op.name(), *op))
        .collect();
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = InstructionError;

    fn from_str(input: &str) -> Result<Operation, InstructionError> {
        OPERATIONS_BY_NAME
            .get(input)
            .copied()
            .ok_or_else(|| InstructionError::UnknownOperation(input.to_string()))
    }
}

/// A single PPT micro-operation.
///
/// The type parameter is the type of the literal loaded by `CONSTH`/`CONSTL`. The emulator
/// executes instructions with resolved [Byte] constants, while the assembler works with
/// instructions whose constants may still refer to labels.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction<C = Byte> {
    /// Copies a byte into one half of a bus register. (`LOAD1H`, `LOAD2L`, ...)
    Load { bus: Bus, half: Half, source: Source },

    /// Copies one half of M1 into the same half of M3. (`COPYH`, `COPYL`)
    Copy(Half),

    /// Copies one half of M3 into a register. (`STOREH`, `STOREL`)
    Store { half: Half, register: Register },

    /// Zeroes one half of a bus register. (`CLEARH1`, `CLEARL3`, ...)
    Clear { bus: Bus, half: Half },

    /// Loads a literal byte into one half of M3. (`CONSTH`, `CONSTL`)
    Const { half: Half, value: C },

    /// Executes a named operation. (`EXEC`)
    Exec(Operation),
}

impl<C> Instruction<C> {
    /// The opcode as it is written in the object format.
    pub fn opcode(&self) -> String {
        match self {
            Instruction::Load { bus, half, .. } => format!("LOAD{}{}", bus.digit(), half.letter()),
            Instruction::Copy(half) => format!("COPY{}", half.letter()),
            Instruction::Store { half, .. } => format!("STORE{}", half.letter()),
            Instruction::Clear { bus, half } => format!("CLEAR{}{}", half.letter(), bus.digit()),
            Instruction::Const { half, .. } => format!("CONST{}", half.letter()),
            Instruction::Exec(_) => "EXEC".to_string(),
        }
    }

    /// Replaces the constant of a `CONSTH`/`CONSTL` instruction. Other instructions are
    /// returned unchanged.
    pub fn map_constant<D, E, F>(self, f: F) -> Result<Instruction<D>, E>
    where
        F: FnOnce(Half, C) -> Result<D, E>,
    {
        Ok(match self {
            Instruction::Const { half, value } => Instruction::Const {
                half,
                value: f(half, value)?,
            },
            Instruction::Load { bus, half, source } => Instruction::Load { bus, half, source },
            Instruction::Copy(half) => Instruction::Copy(half),
            Instruction::Store { half, register } => Instruction::Store { half, register },
            Instruction::Clear { bus, half } => Instruction::Clear { bus, half },
            Instruction::Exec(op) => Instruction::Exec(op),
        })
    }
}

impl<C: fmt::Display> Instruction<C> {
    /// The argument as it is written in the object format, if the instruction has one.
    pub fn argument(&self) -> Option<String> {
        match self {
            Instruction::Load { source, .. } => Some(source.to_string()),
            Instruction::Store { register, .. } => Some(register.to_string()),
            Instruction::Const { value, .. } => Some(value.to_string()),
            Instruction::Exec(op) => Some(op.to_string()),
            Instruction::Copy(_) | Instruction::Clear { .. } => None,
        }
    }
}

impl<C: fmt::Display> fmt::Display for Instruction<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.argument() {
            Some(argument) => write!(f, "{} {}", self.opcode(), argument),
            None => write!(f, "{}", self.opcode()),
        }
    }
}

impl Instruction {
    /// Reconstructs an instruction from the opcode and argument columns of the object format.
    pub fn from_parts(opcode: &str, argument: Option<&str>) -> Result<Instruction, InstructionError> {
        let chars: Vec<char> = opcode.chars().collect();

        let instruction = match (opcode, chars.as_slice()) {
            ("EXEC", _) => Instruction::Exec(required(opcode, argument)?.parse()?),
            ("CONSTH", _) | ("CONSTL", _) => Instruction::Const {
                half: half_from_suffix(opcode, chars[5])?,
                value: required(opcode, argument)?.parse()?,
            },
            ("STOREH", _) | ("STOREL", _) => Instruction::Store {
                half: half_from_suffix(opcode, chars[5])?,
                register: required(opcode, argument)?.parse()?,
            },
            ("COPYH", _) | ("COPYL", _) => {
                unexpected(opcode, argument)?;
                Instruction::Copy(half_from_suffix(opcode, chars[4])?)
            }
            (_, ['L', 'O', 'A', 'D', bus, half]) => Instruction::Load {
                bus: bus_from_digit(opcode, *bus)?,
                half: half_from_suffix(opcode, *half)?,
                source: required(opcode, argument)?.parse()?,
            },
            (_, ['C', 'L', 'E', 'A', 'R', half, bus]) => {
                unexpected(opcode, argument)?;
                Instruction::Clear {
                    bus: bus_from_digit(opcode, *bus)?,
                    half: half_from_suffix(opcode, *half)?,
                }
            }
            _ => return Err(InstructionError::UnknownOpcode(opcode.to_string())),
        };

        Ok(instruction)
    }
}

fn required<'a>(opcode: &str, argument: Option<&'a str>) -> Result<&'a str, InstructionError> {
    argument.ok_or_else(|| InstructionError::MissingArgument(opcode.to_string()))
}

fn unexpected(opcode: &str, argument: Option<&str>) -> Result<(), InstructionError> {
    match argument {
        None => Ok(()),
        Some(arg) => Err(InstructionError::UnexpectedArgument {
            opcode: opcode.to_string(),
            argument: arg.to_string(),
        }),
    }
}

fn half_from_suffix(opcode: &str, letter: char) -> Result<Half, InstructionError> {
    Half::from_letter(letter).ok_or_else(|| InstructionError::UnknownOpcode(opcode.to_string()))
}

fn bus_from_digit(opcode: &str, digit: char) -> Result<Bus, InstructionError> {
    Bus::from_digit(digit).ok_or_else(|| InstructionError::UnknownOpcode(opcode.to_string()))
}

/// Reasons why the textual form of an instruction could not be understood.
#[derive(Clone, Debug, PartialEq)]
pub enum InstructionError {
    UnknownOpcode(String),
    UnknownOperation(String),
    UnknownRegister(String),
    MissingArgument(String),
    UnexpectedArgument { opcode: String, argument: String },
    InvalidConstant(BitStringError),
}

impl From<BitStringError> for InstructionError {
    fn from(err: BitStringError) -> InstructionError {
        InstructionError::InvalidConstant(err)
    }
}

impl fmt::Display for InstructionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InstructionError::UnknownOpcode(op) => write!(f, "unknown opcode '{}'", op),
            InstructionError::UnknownOperation(op) => write!(f, "unknown operation '{}'", op),
            InstructionError::UnknownRegister(reg) => write!(f, "unknown register '{}'", reg),
            InstructionError::MissingArgument(op) => write!(f, "{} requires an argument", op),
            InstructionError::UnexpectedArgument { opcode, argument } => {
                write!(f, "{} takes no argument, got '{}'", opcode, argument)
            }
            InstructionError::InvalidConstant(err) => write!(f, "invalid constant: {}", err),
        }
    }
}

#[test]
fn test_instruction_text_round_trip() {
    let cases = [
        ("LOAD1H", Some("SPH")),
        ("LOAD2L", Some("M3L")),
        ("COPYH", None),
        ("STOREL", Some("M4L")),
        ("CLEARL3", None),
        ("CONSTH", Some("11111111")),
        ("EXEC", Some("SHIFTADDR2")),
        ("EXEC", Some("VNG")),
    ];

    for (opcode, argument) in cases.iter() {
        let ins = Instruction::from_parts(opcode, *argument).unwrap();
        assert_eq!(ins.opcode(), *opcode);
        assert_eq!(ins.argument().as_deref(), *argument);
    }
}

#[test]
fn test_instruction_errors() {
    assert_eq!(
        Instruction::from_parts("EXEC", Some("FROB")),
        Err(InstructionError::UnknownOperation("FROB".into())),
    );
    assert_eq!(
        Instruction::from_parts("LOAD4H", Some("AL")),
        Err(InstructionError::UnknownOpcode("LOAD4H".into())),
    );
    assert_eq!(
        Instruction::from_parts("STOREH", None),
        Err(InstructionError::MissingArgument("STOREH".into())),
    );
    assert!(Instruction::from_parts("STOREH", Some("XH")).is_err());
}

#[test]
fn test_register_pairs() {
    assert_eq!(RegisterPair::SP.high(), Register::SPH);
    assert_eq!(RegisterPair::M4.half(Half::Low), Register::M4L);
    assert_eq!(Register::SPL.index(), 19);
}
