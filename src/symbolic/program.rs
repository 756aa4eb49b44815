use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;
use slog::Logger;

use super::operand::{Immediate, OperandError, Width};
use super::parser::{statement, string_literal, ParseError, Statement};
use crate::compiler::{Assembly, CompileError, Options};
use crate::error::complete;

/// The sections of a source file that the assembler cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    /// Executable code. (`_TEXT`)
    Text,

    /// Mutable memory, mapped at `0x8000`. (`_DATA`)
    Data,

    /// Read-only memory, mapped at `0`. (`CONST`)
    Const,
}

impl SectionKind {
    /// The section name, which is also the label of the section's first region.
    pub fn name(&self) -> &'static str {
        match self {
            SectionKind::Text => "_TEXT",
            SectionKind::Data => "_DATA",
            SectionKind::Const => "CONST",
        }
    }

    /// Offset of the first item of the section.
    pub fn base_address(&self) -> u16 {
        match self {
            SectionKind::Text | SectionKind::Const => 0,
            SectionKind::Data => 0x8000,
        }
    }
}

/// A non-empty line of the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLine {
    /// Line number in the source file, starting from 1.
    pub number: usize,

    /// The line without leading and trailing whitespace.
    pub text: String,
}

impl SourceLine {
    /// The line with every run of whitespace replaced by a single space.
    pub fn condensed(&self) -> String {
        self.text.split_whitespace().join(" ")
    }
}

/// Contents of a line in a `_DATA` or `CONST` section.
#[derive(Debug, Clone, PartialEq)]
pub enum DataDirective {
    /// `.byte`: one byte per value.
    Bytes(Vec<Immediate>),

    /// `.word`: two bytes per value, low byte first.
    Words(Vec<Immediate>),

    /// `.ascii` (`terminated == false`), `.asciiz` or `.string` (`terminated == true`).
    Strings { strings: Vec<Vec<u8>>, terminated: bool },
}

impl DataDirective {
    fn parse(stmt: &Statement) -> Result<DataDirective, SyntaxErrorKind> {
        let values = |width: Width| -> Result<Vec<Immediate>, SyntaxErrorKind> {
            stmt.arguments
                .iter()
                .map(|arg| Immediate::parse(*arg, width).map_err(SyntaxErrorKind::InvalidValue))
                .collect()
        };

        let strings = || -> Result<Vec<Vec<u8>>, SyntaxErrorKind> {
            stmt.arguments
                .iter()
                .map(|arg| complete(string_literal, *arg).map_err(SyntaxErrorKind::InvalidString))
                .collect()
        };

        match stmt.name {
            ".byte" => Ok(DataDirective::Bytes(values(Width::Byte)?)),
            ".word" => Ok(DataDirective::Words(values(Width::Word)?)),
            ".ascii" => Ok(DataDirective::Strings { strings: strings()?, terminated: false }),
            ".asciiz" | ".string" => Ok(DataDirective::Strings { strings: strings()?, terminated: true }),
            other => Err(SyntaxErrorKind::UnknownDirective(other.to_string())),
        }
    }

    /// Number of bytes the directive occupies.
    pub fn size(&self) -> usize {
        match self {
            DataDirective::Bytes(values) => values.len(),
            DataDirective::Words(values) => 2 * values.len(),
            DataDirective::Strings { strings, terminated } => strings
                .iter()
                .map(|s| s.len() + *terminated as usize)
                .sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataLine {
    pub source: SourceLine,
    pub directive: DataDirective,
}

/// A named run of lines inside a section.
///
/// The first region of every section is named after the section and every label line starts a
/// new region.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRegion<T> {
    pub label: String,

    /// The line declaring the label. `None` for the implicit first region.
    pub line: Option<usize>,

    pub items: Vec<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section<T> {
    pub kind: SectionKind,
    pub regions: Vec<LabeledRegion<T>>,
}

impl<T> Section<T> {
    fn empty(kind: SectionKind) -> Section<T> {
        Section {
            kind,
            regions: vec![LabeledRegion {
                label: kind.name().to_string(),
                line: None,
                items: Vec::new(),
            }],
        }
    }
}

/// A parsed assembly source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub text: Section<SourceLine>,
    pub data: Section<DataLine>,
    pub constants: Section<DataLine>,
}

impl Program {
    /// Splits the source into sections and labeled regions and parses the data directives.
    ///
    /// Instructions are not parsed here, see [compile](Program::compile).
    pub fn parse(source: &str) -> Result<Program, SyntaxError> {
        let mut sections: HashMap<String, Vec<SourceLine>> = HashMap::new();
        let mut current = String::from("INITIAL");

        for (index, raw) in source.lines().enumerate() {
            let line = raw.replace('\t', " ");
            let line = line.trim_end();

            if line.is_empty() {
                continue;
            }

            let source_line = SourceLine {
                number: index + 1,
                text: line.to_string(),
            };

            if line.trim_start().starts_with(".new_section") {
                let stmt = complete(statement, line)
                    .map_err(|err| SyntaxError::new(&source_line, SyntaxErrorKind::Malformed(err)))?;

                current = match stmt.arguments.as_slice() {
                    [name] => name.to_string(),
                    _ => return Err(SyntaxError::new(&source_line, SyntaxErrorKind::MissingSectionName)),
                };

                sections.entry(current.clone()).or_default();
            } else {
                sections.entry(current.clone()).or_default().push(source_line);
            }
        }

        let mut take = |kind: SectionKind| sections.remove(kind.name());

        let text = take(SectionKind::Text).ok_or(SyntaxError {
            line: None,
            text: String::new(),
            kind: SyntaxErrorKind::MissingTextSection,
        })?;

        let data = take(SectionKind::Data).unwrap_or_default();
        let constants = take(SectionKind::Const).unwrap_or_default();

        Ok(Program {
            text: split_regions(SectionKind::Text, text)?,
            data: parse_data(split_regions(SectionKind::Data, data)?)?,
            constants: parse_data(split_regions(SectionKind::Const, constants)?)?,
        })
    }

    /// Assembles the program with the default [Options].
    pub fn compile(&self) -> Result<Assembly, CompileError> {
        crate::compiler::compile(self)
    }

    pub fn compile_with_logger<L>(&self, options: &Options, logger: L) -> Result<Assembly, CompileError>
    where
        L: Into<Option<Logger>>,
    {
        crate::compiler::compile_with_logger(self, options, logger)
    }
}

/// Indented lines belong to the current region, other lines must be labels.
fn split_regions(kind: SectionKind, lines: Vec<SourceLine>) -> Result<Section<SourceLine>, SyntaxError> {
    let mut section = Section::empty(kind);

    for mut line in lines {
        if line.text.starts_with(' ') {
            line.text = line.text.trim_start().to_string();

            if let Some(region) = section.regions.last_mut() {
                region.items.push(line);
            }
        } else if line.text.ends_with(':') {
            section.regions.push(LabeledRegion {
                label: line.text[..line.text.len() - 1].trim().to_string(),
                line: Some(line.number),
                items: Vec::new(),
            });
        } else {
            return Err(SyntaxError::new(&line, SyntaxErrorKind::UnlabeledLine));
        }
    }

    Ok(section)
}

fn parse_data(section: Section<SourceLine>) -> Result<Section<DataLine>, SyntaxError> {
    let regions = section
        .regions
        .into_iter()
        .map(|region| {
            let items = region
                .items
                .into_iter()
                .map(|source| {
                    let directive = complete(statement, &source.text)
                        .map_err(SyntaxErrorKind::Malformed)
                        .and_then(|stmt| DataDirective::parse(&stmt))
                        .map_err(|kind| SyntaxError::new(&source, kind))?;

                    Ok(DataLine { source, directive })
                })
                .collect::<Result<Vec<_>, SyntaxError>>()?;

            Ok(LabeledRegion {
                label: region.label,
                line: region.line,
                items,
            })
        })
        .collect::<Result<Vec<_>, SyntaxError>>()?;

    Ok(Section {
        kind: section.kind,
        regions,
    })
}

/// Error returned when the structure of the source file is invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    /// The offending line number, if the error concerns a single line.
    pub line: Option<usize>,
    pub text: String,
    pub kind: SyntaxErrorKind,
}

impl SyntaxError {
    fn new(line: &SourceLine, kind: SyntaxErrorKind) -> SyntaxError {
        SyntaxError {
            line: Some(line.number),
            text: line.text.clone(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxErrorKind {
    /// The source has no `_TEXT` section.
    MissingTextSection,

    /// `.new_section` without exactly one section name.
    MissingSectionName,

    /// A non-indented line that is not a label.
    UnlabeledLine,

    UnknownDirective(String),
    InvalidValue(OperandError),
    InvalidString(ParseError),
    Malformed(ParseError),
}

impl fmt::Display for SyntaxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SyntaxErrorKind::MissingTextSection => write!(f, "no _TEXT section in assembly code"),
            SyntaxErrorKind::MissingSectionName => write!(f, "expected a single section name"),
            SyntaxErrorKind::UnlabeledLine => write!(f, "expected an indented line or a label"),
            SyntaxErrorKind::UnknownDirective(name) => write!(f, "unrecognized directive '{}'", name),
            SyntaxErrorKind::InvalidValue(err) => write!(f, "{}", err),
            SyntaxErrorKind::InvalidString(err) => write!(f, "invalid string: {}", err),
            SyntaxErrorKind::Malformed(err) => write!(f, "malformed line: {}", err),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}: '{}'", line, self.kind, self.text),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "
.new_section _TEXT
main_:
\tmovw\t$msg,%ax
        call    ppt_puts_
        ret

.new_section CONST
msg:
        .asciiz \"abc\"
        .byte   0x0A, 7
.new_section _DATA
counter:
        .word   1, msg+1
";

    #[test]
    fn test_parse_regions() {
        let program = Program::parse(SOURCE).unwrap();

        assert_eq!(program.text.regions.len(), 2);
        assert_eq!(program.text.regions[0].label, "_TEXT");
        assert!(program.text.regions[0].items.is_empty());

        let main = &program.text.regions[1];
        assert_eq!(main.label, "main_");
        assert_eq!(main.line, Some(3));
        assert_eq!(main.items[0], SourceLine { number: 4, text: "movw $msg,%ax".into() });
        assert_eq!(main.items[1].condensed(), "call ppt_puts_");

        let msg = &program.constants.regions[1];
        assert_eq!(msg.label, "msg");
        assert_eq!(msg.items[0].directive.size(), 4);
        assert_eq!(msg.items[1].directive.size(), 2);

        let counter = &program.data.regions[1];
        assert_eq!(counter.items[0].directive.size(), 4);
    }

    #[test]
    fn test_missing_text_section() {
        let err = Program::parse(".new_section _DATA\nx:\n    .byte 1\n").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::MissingTextSection);
    }

    #[test]
    fn test_syntax_errors() {
        let err = Program::parse(".new_section _TEXT\nmain_\n").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnlabeledLine);
        assert_eq!(err.line, Some(2));

        let err = Program::parse(".new_section _TEXT\n.new_section CONST\n    .quad 1\n").unwrap_err();
        assert_eq!(err.kind, SyntaxErrorKind::UnknownDirective(".quad".into()));
        assert_eq!(err.line, Some(3));

        let err = Program::parse(".new_section _TEXT\n.new_section CONST\n    .byte %ax\n").unwrap_err();
        assert!(matches!(err.kind, SyntaxErrorKind::InvalidValue(_)));
    }

    #[test]
    fn test_other_sections_are_ignored() {
        let source = "    .model small\n.new_section _BSS\nbuf:\n    .skip 4\n.new_section _TEXT\n";
        let program = Program::parse(source).unwrap();

        assert_eq!(program.text.regions.len(), 1);
        assert_eq!(program.data.regions.len(), 1);
        assert!(program.data.regions[0].items.is_empty());
    }
}
