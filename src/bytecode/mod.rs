//! Storing, serializing and loading assembled PPT object programs.

mod parser;
mod program;

pub use self::parser::{LoadError, LoadErrorKind};
pub use self::program::{
    ObjectProgram,
    Segment,
    TextEntry,
};
