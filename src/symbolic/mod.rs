//! Parsing AT&T syntax assembly source files.

pub mod operand;
pub mod parser;
pub mod program;
pub mod token;

pub use self::operand::{Immediate, MemoryOperand, Operand, OperandError, OperandRegister, Width};
pub use self::program::{
    DataDirective, DataLine, LabeledRegion, Program, Section, SectionKind, SourceLine, SyntaxError,
    SyntaxErrorKind,
};
