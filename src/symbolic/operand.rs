//! Operands of AT&T syntax instructions and relocatable immediate values.

use std::fmt;
use std::iter::Peekable;

use logos::{Logos, SpannedIter};

use super::token::Token;
use crate::bits::{Byte, Word, BitWord};
use crate::instruction::{Register, RegisterPair};
use crate::symbol_table::SymbolTable;

/// Width of an operand, selected by the `b`/`w` suffix of the mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Word,
}

/// A numeric value that may be relative to a label.
///
/// The value of a label is not known before the whole program has been laid out, so immediates
/// are kept in this form until [resolved](Immediate::resolve).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Immediate {
    pub offset: i64,
    pub label: Option<String>,
    pub width: Width,
}

impl Immediate {
    pub fn number(offset: i64, width: Width) -> Immediate {
        Immediate {
            offset,
            label: None,
            width,
        }
    }

    pub fn label<S: Into<String>>(label: S, width: Width) -> Immediate {
        Immediate {
            offset: 0,
            label: Some(label.into()),
            width,
        }
    }

    /// Parses a bare immediate value such as `12`, `0x1F`, `-3` or `msg+2`.
    pub fn parse(input: &str, width: Width) -> Result<Immediate, OperandError> {
        let mut parser = OperandParser::new(input);
        let immediate = parser.immediate(width)?;
        parser.finish(immediate)
    }

    pub fn is_zero(&self) -> bool {
        self.offset == 0 && self.label.is_none()
    }

    /// Computes the concrete value of the immediate.
    ///
    /// Word immediates are wrapped into 16 bits. Byte immediates are wrapped into 8 bits and the
    /// byte is placed into both halves of the returned word, so that either half can be loaded
    /// with `CONSTH` or `CONSTL`.
    pub fn resolve(&self, symbols: &SymbolTable) -> Result<Word, UnresolvedLabel> {
        let mut value = self.offset;

        if let Some(label) = &self.label {
            value += symbols
                .offset(label)
                .ok_or_else(|| UnresolvedLabel(label.clone()))? as i64;
        }

        Ok(match self.width {
            Width::Word => Word::from_int(value),
            Width::Byte => {
                let byte = Byte::from_int(value);
                Word::from_halves(byte, byte)
            }
        })
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.label {
            None => write!(f, "{}", self.offset),
            Some(label) if self.offset < 0 => write!(f, "{}{}", label, self.offset),
            Some(label) if self.offset == 0 => write!(f, "{}", label),
            Some(label) => write!(f, "{}+{}", label, self.offset),
        }
    }
}

/// Returned when an immediate refers to a label that was never defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedLabel(pub String);

impl fmt::Display for UnresolvedLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unidentified label '{}'", self.0)
    }
}

/// A register operand, either an 8-bit half or a 16-bit pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandRegister {
    Byte(Register),
    Word(RegisterPair),
}

impl OperandRegister {
    pub fn width(&self) -> Width {
        match self {
            OperandRegister::Byte(_) => Width::Byte,
            OperandRegister::Word(_) => Width::Word,
        }
    }
}

impl std::str::FromStr for OperandRegister {
    type Err = OperandError;

    fn from_str(name: &str) -> Result<OperandRegister, OperandError> {
        use OperandRegister::*;

        let register = match name.to_lowercase().as_ref() {
            "al" => Byte(Register::AL),
            "ah" => Byte(Register::AH),
            "bl" => Byte(Register::BL),
            "bh" => Byte(Register::BH),
            "cl" => Byte(Register::CL),
            "ch" => Byte(Register::CH),
            "dl" => Byte(Register::DL),
            "dh" => Byte(Register::DH),
            "ax" => Word(RegisterPair::A),
            "bx" => Word(RegisterPair::B),
            "cx" => Word(RegisterPair::C),
            "dx" => Word(RegisterPair::D),
            "si" => Word(RegisterPair::SI),
            "di" => Word(RegisterPair::DI),
            "bp" => Word(RegisterPair::BP),
            "sp" => Word(RegisterPair::SP),
            "ds" | "es" | "ss" | "cs" => {
                return Err(OperandError::SegmentRegister(name.to_string()))
            }
            _ => return Err(OperandError::UnknownRegister(name.to_string())),
        };

        Ok(register)
    }
}

fn pair_name(pair: RegisterPair) -> &'static str {
    match pair {
        RegisterPair::A => "ax",
        RegisterPair::B => "bx",
        RegisterPair::C => "cx",
        RegisterPair::D => "dx",
        RegisterPair::SI => "si",
        RegisterPair::DI => "di",
        RegisterPair::BP => "bp",
        RegisterPair::SP => "sp",
        RegisterPair::M4 => "m4",
        RegisterPair::M5 => "m5",
    }
}

/// A memory reference of the form `displacement(base, index, scale)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryOperand {
    pub base: Option<RegisterPair>,
    pub index: Option<RegisterPair>,
    /// One of 1, 2, 4 or 8. Only meaningful together with an index register.
    pub scale: u8,
    /// Always word sized.
    pub displacement: Immediate,
}

impl MemoryOperand {
    /// Memory operand referring directly to the address given by the displacement.
    pub fn direct(displacement: Immediate) -> MemoryOperand {
        MemoryOperand {
            base: None,
            index: None,
            scale: 1,
            displacement,
        }
    }

    /// Returns true if the effective address has to be computed into a scratch register before
    /// the operand can be accessed.
    ///
    /// Reads can use a lone base register or a lone displacement as the address as is. Writes
    /// need the address in a register, so they can only skip the computation when a base
    /// register is used without a displacement.
    pub fn requires_calculation(&self, for_write: bool) -> bool {
        if self.index.is_some() {
            return true;
        }

        match (self.base, self.displacement.is_zero()) {
            (Some(_), zero) => !zero,
            (None, _) => for_write,
        }
    }
}

impl fmt::Display for MemoryOperand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.displacement.is_zero() {
            write!(f, "{}", self.displacement)?;
        }

        if self.base.is_none() && self.index.is_none() {
            return Ok(());
        }

        write!(f, "(")?;

        if let Some(base) = self.base {
            write!(f, "%{}", pair_name(base))?;
        }

        if let Some(index) = self.index {
            write!(f, ",%{},{}", pair_name(index), self.scale)?;
        }

        write!(f, ")")
    }
}

/// An instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Register(OperandRegister),
    Memory(MemoryOperand),
    Immediate(Immediate),
}

impl Operand {
    /// Parses a single operand.
    ///
    /// # Parameters
    /// - `input`: The operand text, eg. `-2(%bp)` or `$msg+1`.
    /// - `width`: Width of the operand implied by the mnemonic.
    /// - `branch`: True if the operand is the target of a jump or a call. A bare symbol in such a
    ///   position is an immediate address rather than a memory reference, unless it is preceded by
    ///   `*`.
    pub fn parse(input: &str, width: Width, branch: bool) -> Result<Operand, OperandError> {
        let mut parser = OperandParser::new(input);
        let operand = parser.operand(width, branch)?;
        parser.finish(operand)
    }

    pub fn requires_calculation(&self, for_write: bool) -> bool {
        match self {
            Operand::Memory(memory) => memory.requires_calculation(for_write),
            _ => false,
        }
    }

    pub fn is_memory(&self) -> bool {
        match self {
            Operand::Memory(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Register(OperandRegister::Byte(reg)) => {
                write!(f, "%{}", reg.name().to_lowercase())
            }
            Operand::Register(OperandRegister::Word(pair)) => write!(f, "%{}", pair_name(*pair)),
            Operand::Memory(memory) => write!(f, "{}", memory),
            Operand::Immediate(imm) => write!(f, "${}", imm),
        }
    }
}

struct OperandParser<'a> {
    input: &'a str,
    tokens: Peekable<SpannedIter<'a, Token<'a>>>,
}

impl<'a> OperandParser<'a> {
    fn new(input: &'a str) -> OperandParser<'a> {
        OperandParser {
            input,
            tokens: Token::lexer(input).spanned().peekable(),
        }
    }

    /// Fails if there are tokens left after `output`.
    fn finish<T>(&mut self, output: T) -> Result<T, OperandError> {
        match self.tokens.next() {
            None => Ok(output),
            Some(_) => Err(self.malformed()),
        }
    }

    fn malformed(&self) -> OperandError {
        OperandError::Malformed(self.input.to_string())
    }

    fn next(&mut self) -> Result<Token<'a>, OperandError> {
        match self.tokens.next() {
            Some((Token::Error, _)) | None => Err(self.malformed()),
            Some((token, _)) => Ok(token),
        }
    }

    fn peek(&mut self) -> Option<&Token<'a>> {
        self.tokens.peek().map(|(token, _)| token)
    }

    fn accept(&mut self, expected: Token<'a>) -> bool {
        if self.peek() == Some(&expected) {
            self.tokens.next();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token<'a>) -> Result<(), OperandError> {
        if self.accept(expected) {
            Ok(())
        } else {
            Err(self.malformed())
        }
    }

    fn operand(&mut self, width: Width, branch: bool) -> Result<Operand, OperandError> {
        let mut branch = branch;

        if self.accept(Token::Indirect) {
            if !branch {
                return Err(OperandError::IndirectOutsideBranch(self.input.to_string()));
            }

            branch = false;
        }

        match self.peek() {
            Some(Token::ImmediatePrefix) => {
                self.tokens.next();
                Ok(Operand::Immediate(self.immediate(width)?))
            }
            Some(Token::RegisterPrefix) => Ok(Operand::Register(self.register()?)),
            Some(Token::IndexBegin) => {
                Ok(Operand::Memory(self.memory(Immediate::number(0, Width::Word))?))
            }
            Some(_) if branch => Ok(Operand::Immediate(self.immediate(Width::Word)?)),
            Some(_) => {
                let displacement = self.immediate(Width::Word)?;

                if self.peek() == Some(&Token::IndexBegin) {
                    Ok(Operand::Memory(self.memory(displacement)?))
                } else {
                    Ok(Operand::Memory(MemoryOperand::direct(displacement)))
                }
            }
            None => Err(self.malformed()),
        }
    }

    /// `number`, `-number`, `symbol`, `symbol+number` or `symbol-number`.
    fn immediate(&mut self, width: Width) -> Result<Immediate, OperandError> {
        match self.next()? {
            Token::Number(value) => Ok(Immediate::number(value, width)),
            Token::Minus => match self.next()? {
                Token::Number(value) => Ok(Immediate::number(-value, width)),
                _ => Err(self.malformed()),
            },
            Token::Symbol(label) => {
                let mut imm = Immediate::label(label, width);

                let sign = if self.accept(Token::Plus) {
                    1
                } else if self.accept(Token::Minus) {
                    -1
                } else {
                    return Ok(imm);
                };

                match self.next()? {
                    Token::Number(value) => imm.offset = sign * value,
                    _ => return Err(self.malformed()),
                }

                Ok(imm)
            }
            _ => Err(self.malformed()),
        }
    }

    fn register(&mut self) -> Result<OperandRegister, OperandError> {
        self.expect(Token::RegisterPrefix)?;

        match self.next()? {
            Token::Symbol(name) => name.parse(),
            _ => Err(self.malformed()),
        }
    }

    fn address_register(&mut self) -> Result<RegisterPair, OperandError> {
        match self.register()? {
            OperandRegister::Word(pair) => Ok(pair),
            OperandRegister::Byte(reg) => Err(OperandError::ByteAddressRegister(reg)),
        }
    }

    /// The `(base, index, scale)` part of a memory operand.
    fn memory(&mut self, displacement: Immediate) -> Result<MemoryOperand, OperandError> {
        self.expect(Token::IndexBegin)?;

        let mut memory = MemoryOperand::direct(displacement);

        if self.peek() == Some(&Token::RegisterPrefix) {
            memory.base = Some(self.address_register()?);
        }

        if self.accept(Token::Separator) {
            memory.index = Some(self.address_register()?);

            if self.accept(Token::Separator) {
                memory.scale = match self.next()? {
                    Token::Number(scale) if [1, 2, 4, 8].contains(&scale) => scale as u8,
                    Token::Number(scale) => return Err(OperandError::InvalidScale(scale)),
                    _ => return Err(self.malformed()),
                };
            }
        }

        self.expect(Token::IndexEnd)?;

        Ok(memory)
    }
}

/// Reasons why an operand could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandError {
    /// The operand does not follow the AT&T operand syntax.
    Malformed(String),
    UnknownRegister(String),
    /// Segment registers are not supported. Lines using them are skipped.
    SegmentRegister(String),
    /// An 8-bit register was used as a base or an index register.
    ByteAddressRegister(Register),
    InvalidScale(i64),
    /// `*` was used with an operand that is not a jump or a call target.
    IndirectOutsideBranch(String),
}

impl fmt::Display for OperandError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OperandError::Malformed(input) => write!(f, "malformed operand '{}'", input),
            OperandError::UnknownRegister(name) => write!(f, "unknown register '%{}'", name),
            OperandError::SegmentRegister(name) => {
                write!(f, "unsupported segment register '%{}'", name)
            }
            OperandError::ByteAddressRegister(reg) => {
                write!(f, "register {} cannot be used in an address", reg)
            }
            OperandError::InvalidScale(scale) => {
                write!(f, "invalid scale {}, expected 1, 2, 4 or 8", scale)
            }
            OperandError::IndirectOutsideBranch(input) => {
                write!(f, "'*' is only allowed on jump and call targets: '{}'", input)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(input: &str) -> Operand {
        Operand::parse(input, Width::Word, false).unwrap()
    }

    #[test]
    fn test_parse_registers() {
        assert_eq!(word("%ax"), Operand::Register(OperandRegister::Word(RegisterPair::A)));
        assert_eq!(word("%bh"), Operand::Register(OperandRegister::Byte(Register::BH)));
        assert_eq!(word("%sp"), Operand::Register(OperandRegister::Word(RegisterPair::SP)));
        assert_eq!(
            Operand::parse("%ds", Width::Word, false),
            Err(OperandError::SegmentRegister("ds".into())),
        );
        assert_eq!(
            Operand::parse("%xx", Width::Word, false),
            Err(OperandError::UnknownRegister("xx".into())),
        );
    }

    #[test]
    fn test_parse_immediates() {
        assert_eq!(word("$5"), Operand::Immediate(Immediate::number(5, Width::Word)));
        assert_eq!(word("$-0x10"), Operand::Immediate(Immediate::number(-16, Width::Word)));

        let imm = Immediate {
            offset: 2,
            label: Some("L$3".into()),
            width: Width::Byte,
        };
        assert_eq!(Operand::parse("$L$3+2", Width::Byte, false), Ok(Operand::Immediate(imm)));
    }

    #[test]
    fn test_parse_bare_immediates() {
        assert_eq!(Immediate::parse("0x1F", Width::Byte), Ok(Immediate::number(31, Width::Byte)));
        assert_eq!(Immediate::parse("-3", Width::Word), Ok(Immediate::number(-3, Width::Word)));
        assert_eq!(
            Immediate::parse("msg-1", Width::Word),
            Ok(Immediate { offset: -1, label: Some("msg".into()), width: Width::Word }),
        );
        assert!(Immediate::parse("msg+", Width::Word).is_err());
        assert!(Immediate::parse("1 2", Width::Word).is_err());
    }

    #[test]
    fn test_parse_memory() {
        let expected = MemoryOperand {
            base: Some(RegisterPair::BP),
            index: Some(RegisterPair::SI),
            scale: 2,
            displacement: Immediate::number(-4, Width::Word),
        };
        assert_eq!(word("-4(%bp,%si,2)"), Operand::Memory(expected));

        let expected = MemoryOperand {
            base: None,
            index: Some(RegisterPair::DI),
            scale: 1,
            displacement: Immediate::label("table", Width::Word),
        };
        assert_eq!(word("table(,%di)"), Operand::Memory(expected));

        assert_eq!(word("counter"), Operand::Memory(MemoryOperand::direct(Immediate::label("counter", Width::Word))));
        assert_eq!(
            Operand::parse("(%bx,%si,3)", Width::Word, false),
            Err(OperandError::InvalidScale(3)),
        );
        assert_eq!(
            Operand::parse("(%bl)", Width::Word, false),
            Err(OperandError::ByteAddressRegister(Register::BL)),
        );
    }

    #[test]
    fn test_parse_branch_targets() {
        assert_eq!(
            Operand::parse("L$1", Width::Word, true),
            Ok(Operand::Immediate(Immediate::label("L$1", Width::Word))),
        );
        assert_eq!(
            Operand::parse("*L$1", Width::Word, true),
            Ok(Operand::Memory(MemoryOperand::direct(Immediate::label("L$1", Width::Word)))),
        );
        assert_eq!(
            Operand::parse("*%ax", Width::Word, true),
            Ok(Operand::Register(OperandRegister::Word(RegisterPair::A))),
        );
        assert_eq!(
            Operand::parse("*%ax", Width::Word, false),
            Err(OperandError::IndirectOutsideBranch("*%ax".into())),
        );
    }

    #[test]
    fn test_requires_calculation() {
        let direct = MemoryOperand::direct(Immediate::label("x", Width::Word));
        assert!(!direct.requires_calculation(false));
        assert!(direct.requires_calculation(true));

        let based = MemoryOperand { base: Some(RegisterPair::B), ..direct.clone() };
        assert!(based.requires_calculation(false));

        let plain_base = MemoryOperand {
            base: Some(RegisterPair::B),
            displacement: Immediate::number(0, Width::Word),
            ..direct.clone()
        };
        assert!(!plain_base.requires_calculation(false));
        assert!(!plain_base.requires_calculation(true));

        let indexed = MemoryOperand { index: Some(RegisterPair::SI), ..plain_base.clone() };
        assert!(indexed.requires_calculation(false));

        assert!(!word("%ax").requires_calculation(true));
    }

    #[test]
    fn test_resolve() {
        let mut symbols = SymbolTable::new();
        symbols.define("msg", 0x8004).unwrap();

        let imm = Immediate { offset: -1, label: Some("msg".into()), width: Width::Word };
        assert_eq!(imm.resolve(&symbols), Ok(Word(0x8003)));

        let imm = Immediate::number(-1, Width::Byte);
        assert_eq!(imm.resolve(&symbols), Ok(Word(0xFFFF)));

        let imm = Immediate::number(0x12, Width::Byte);
        assert_eq!(imm.resolve(&symbols), Ok(Word(0x1212)));

        let imm = Immediate::label("missing", Width::Word);
        assert_eq!(imm.resolve(&symbols), Err(UnresolvedLabel("missing".into())));
    }
}
