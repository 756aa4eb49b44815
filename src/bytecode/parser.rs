use std::fmt;

use nom::{
    IResult,
    bytes::complete::{take_while1, take_while_m_n},
    character::complete::{char, space0, space1},
    combinator::{map, map_res, opt, rest},
    sequence::{preceded, tuple},
};

use super::program::{ObjectProgram, Segment, TextEntry};
use crate::bits::{Byte, Word};
use crate::error::complete;
use crate::instruction::{Instruction, InstructionError};

/// The object format has no custom parse errors, only the generic ones from nom.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {}

impl fmt::Display for ErrorKind {
    fn fmt(&self, _f: &mut fmt::Formatter) -> fmt::Result {
        match *self {}
    }
}

pub type ParseError = crate::error::ParseError<ErrorKind>;
type Result<'a, T> = IResult<&'a str, T, ParseError>;

fn is_bit(c: char) -> bool {
    c == '0' || c == '1'
}

fn address(input: &str) -> Result<u16> {
    map_res(
        take_while_m_n(16, 16, is_bit),
        |bits: &str| bits.parse::<Word>().map(|word| word.0),
    )(input)
}

fn byte(input: &str) -> Result<Byte> {
    map_res(take_while_m_n(8, 8, is_bit), str::parse::<Byte>)(input)
}

fn comment(input: &str) -> Result<&str> {
    map(preceded(tuple((space0, char('#'))), rest), str::trim)(input)
}

/// `<address> <opcode> [argument] [# comment]`
fn text_line(input: &str) -> Result<(u16, &str, Option<&str>, Option<&str>)> {
    tuple((
        address,
        preceded(space1, take_while1(|c: char| c.is_ascii_alphanumeric())),
        opt(preceded(space1, take_while1(|c: char| !c.is_whitespace() && c != '#'))),
        opt(comment),
    ))(input)
}

/// `<address> <byte>`
fn data_line(input: &str) -> Result<(u16, Byte)> {
    tuple((address, preceded(space1, byte)))(input)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Block {
    Text,
    Data,
    Const,
}

impl Block {
    fn header(&self) -> &'static str {
        match self {
            Block::Text => "text:",
            Block::Data => "data:",
            Block::Const => "const:",
        }
    }

    fn next(&self) -> Option<Block> {
        match self {
            Block::Text => Some(Block::Data),
            Block::Data => Some(Block::Const),
            Block::Const => None,
        }
    }
}

pub(crate) fn parse_object_file(input: &str) -> std::result::Result<ObjectProgram, LoadError> {
    let mut program = ObjectProgram::default();
    let mut block: Option<Block> = None;

    for (index, raw) in input.lines().enumerate() {
        let line = raw.trim();
        let number = index + 1;
        let error = |kind| LoadError { line: number, kind };

        if line.is_empty() {
            continue;
        }

        let expected = match block {
            None => Some(Block::Text),
            Some(current) => current.next(),
        };

        if let Some(expected) = expected {
            if line == expected.header() {
                block = Some(expected);
                continue;
            }
        }

        match block {
            None => return Err(error(LoadErrorKind::MissingHeader(Block::Text.header()))),
            Some(Block::Text) => {
                let (addr, opcode, argument, comment) =
                    complete(text_line, line).map_err(|err| error(LoadErrorKind::Malformed(err)))?;

                let instruction = Instruction::from_parts(opcode, argument)
                    .map_err(|err| error(LoadErrorKind::Instruction(err)))?;

                let entry = TextEntry {
                    instruction,
                    comment: comment.filter(|c| !c.is_empty()).map(String::from),
                };

                if program.text.insert(addr, entry).is_some() {
                    return Err(error(LoadErrorKind::DuplicateAddress(addr)));
                }
            }
            Some(kind) => {
                let (addr, value) =
                    complete(data_line, line).map_err(|err| error(LoadErrorKind::Malformed(err)))?;

                let (segment, in_data): (&mut Segment<Byte>, bool) = match kind {
                    Block::Data => (&mut program.data, true),
                    _ => (&mut program.constants, false),
                };

                if (addr & 0x8000 != 0) != in_data {
                    return Err(error(LoadErrorKind::AddressOutOfSegment {
                        segment: kind.header(),
                        address: addr,
                    }));
                }

                if segment.insert(addr, value).is_some() {
                    return Err(error(LoadErrorKind::DuplicateAddress(addr)));
                }
            }
        }
    }

    let last = input.lines().count();

    match block {
        Some(Block::Const) => Ok(program),
        None => Err(LoadError { line: last, kind: LoadErrorKind::MissingHeader(Block::Text.header()) }),
        Some(current) => {
            let missing = current.next().unwrap_or(Block::Const);

            Err(LoadError { line: last, kind: LoadErrorKind::MissingHeader(missing.header()) })
        }
    }
}

/// Error returned when an object file cannot be loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadError {
    /// The line of the object file, starting from 1.
    pub line: usize,
    pub kind: LoadErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadErrorKind {
    /// The segment headers are missing or out of order. Contains the header that was expected.
    MissingHeader(&'static str),
    Malformed(ParseError),
    Instruction(InstructionError),
    DuplicateAddress(u16),

    /// A DATA address without the most significant bit or a CONST address with it.
    AddressOutOfSegment { segment: &'static str, address: u16 },
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadErrorKind::MissingHeader(header) => write!(f, "expected '{}'", header),
            LoadErrorKind::Malformed(err) => write!(f, "malformed line: {}", err),
            LoadErrorKind::Instruction(err) => write!(f, "{}", err),
            LoadErrorKind::DuplicateAddress(addr) => {
                write!(f, "address {} defined twice", Word(*addr))
            }
            LoadErrorKind::AddressOutOfSegment { segment, address } => {
                write!(f, "address {} does not belong in '{}'", Word(*address), segment)
            }
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.kind)
    }
}
