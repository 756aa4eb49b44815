use std::collections::BTreeMap;
use std::fmt;
use std::iter::FromIterator;

use super::parser::{parse_object_file, LoadError};
use crate::bits::{Byte, Word};
use crate::instruction::Instruction;
use crate::source_map::SourceMap;

/// A micro-operation in the text segment together with the comment written next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct TextEntry {
    pub instruction: Instruction,

    /// The source line the micro-operation starts, if any.
    pub comment: Option<String>,
}

impl TextEntry {
    pub fn new(instruction: Instruction) -> TextEntry {
        TextEntry {
            instruction,
            comment: None,
        }
    }
}

impl fmt::Display for TextEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:<8}", self.instruction.opcode())?;

        if let Some(argument) = self.instruction.argument() {
            write!(f, "{:<10}", argument)?;
        }

        if let Some(comment) = &self.comment {
            write!(f, "# {}", comment)?;
        }

        Ok(())
    }
}

/// Address-keyed contents of one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment<T> {
    entries: BTreeMap<u16, T>,
}

impl<T> Default for Segment<T> {
    fn default() -> Self {
        Segment {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> FromIterator<(u16, T)> for Segment<T> {
    fn from_iter<I: IntoIterator<Item = (u16, T)>>(iter: I) -> Self {
        Segment {
            entries: BTreeMap::from_iter(iter),
        }
    }
}

impl<T> Segment<T> {
    pub fn new() -> Segment<T> {
        Segment::default()
    }

    /// Builds a segment from consecutive values starting at `start`.
    pub fn from_values<I: IntoIterator<Item = T>>(start: u16, values: I) -> Segment<T> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| (start.wrapping_add(i as u16), value))
            .collect()
    }

    pub fn get(&self, address: u16) -> Option<&T> {
        self.entries.get(&address)
    }

    /// Stores a value, returning the previous value at the same address.
    pub fn insert(&mut self, address: u16, value: T) -> Option<T> {
        self.entries.insert(address, value)
    }

    pub fn contains(&self, address: u16) -> bool {
        self.entries.contains_key(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &T)> {
        self.entries.iter().map(|(addr, value)| (*addr, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An assembled program, as stored in an object file.
///
/// TEXT addresses are instruction indices. DATA addresses have the most significant bit set and
/// CONST addresses have it cleared, so the two byte segments never overlap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectProgram {
    pub text: Segment<TextEntry>,
    pub data: Segment<Byte>,
    pub constants: Segment<Byte>,
}

impl ObjectProgram {
    /// Loads a program from the textual object format.
    pub fn parse(input: &str) -> Result<ObjectProgram, LoadError> {
        parse_object_file(input)
    }

    /// Recovers the source lines of the program from the comments of the text segment.
    pub fn source_map(&self) -> SourceMap<String> {
        self.text
            .iter()
            .filter_map(|(addr, entry)| entry.comment.clone().map(|comment| (addr, comment)))
            .collect()
    }
}

/// Serializes the program into the object format read by [ObjectProgram::parse].
impl fmt::Display for ObjectProgram {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "text:")?;

        for (addr, entry) in self.text.iter() {
            writeln!(f, "    {}    {}", Word(addr), entry)?;
        }

        write!(f, "\ndata:")?;

        for (addr, byte) in self.data.iter() {
            write!(f, "\n    {}    {}", Word(addr), byte)?;
        }

        write!(f, "\n\nconst:")?;

        for (addr, byte) in self.constants.iter() {
            write!(f, "\n    {}    {}", Word(addr), byte)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Half, Operation, Register};

    fn sample() -> ObjectProgram {
        let mut text = Segment::new();
        text.insert(0, TextEntry {
            instruction: Instruction::Const { half: Half::Low, value: Byte(5) },
            comment: Some("movw $5,%ax".into()),
        });
        text.insert(1, TextEntry::new(Instruction::Store { half: Half::Low, register: Register::AL }));
        text.insert(2, TextEntry::new(Instruction::Copy(Half::High)));
        text.insert(3, TextEntry {
            instruction: Instruction::Exec(Operation::Halt),
            comment: Some("hlt".into()),
        });

        ObjectProgram {
            text,
            data: Segment::from_values(0x8000, vec![Byte(1), Byte(0)]),
            constants: Segment::from_values(0, vec![Byte(b'a')]),
        }
    }

    #[test]
    fn test_serialize() {
        let expected = [
            "text:",
            "    0000000000000000    CONSTL  00000101  # movw $5,%ax",
            "    0000000000000001    STOREL  AL        ",
            "    0000000000000010    COPYH   ",
            "    0000000000000011    EXEC    HLT       # hlt",
            "",
            "data:",
            "    1000000000000000    00000001",
            "    1000000000000001    00000000",
            "",
            "const:",
            "    0000000000000000    01100001",
        ]
        .join("\n");

        assert_eq!(sample().to_string(), expected);
    }

    #[test]
    fn test_round_trip() {
        let program = sample();
        let loaded = ObjectProgram::parse(&program.to_string()).unwrap();

        assert_eq!(loaded, program);
        assert_eq!(loaded.source_map().find(2), Some((0, &"movw $5,%ax".to_string())));
    }
}
