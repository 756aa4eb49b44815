//! Assembly of a parsed [Program] into an [ObjectProgram].
//!
//! The compiler first lays out the DATA and CONST sections to learn the addresses of their
//! labels, then translates the TEXT section line by line after a short prologue, and finally
//! resolves the label references of every emitted constant.

use std::fmt;

use slog::{debug, o, trace, warn, Discard, Logger};

use crate::bits::Byte;
use crate::bytecode::{ObjectProgram, Segment, TextEntry};
use crate::codegen::{translate, AssemblyInstruction, Sequence};
use crate::error::complete;
use crate::instruction::{Bus, Half, Instruction, Operation, RegisterPair, Source};
use crate::source_map::SourceMap;
use crate::symbol_table::{DuplicateLabel, SymbolTable};
use crate::symbolic::operand::UnresolvedLabel;
use crate::symbolic::parser::{statement, ParseError};
use crate::symbolic::{DataDirective, DataLine, Immediate, OperandError, Program, Section, SectionKind, Width};

/// Settings of the program prologue.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Label the prologue jumps to.
    pub entry: String,

    /// Initial value of SP. The word at this address holds the return address of the entry
    /// procedure.
    pub stack_pointer: u16,

    /// Label of the `HLT` the entry procedure returns to.
    pub halt_label: String,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            entry: "main_".into(),
            stack_pointer: 0xFFFC,
            halt_label: "X$0".into(),
        }
    }
}

/// A source line that was skipped during the assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub line: usize,
    pub text: String,
    pub reason: OperandError,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: skipping line '{}': {}", self.line, self.text, self.reason)
    }
}

/// The result of a successful assembly.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub program: ObjectProgram,
    pub warnings: Vec<Warning>,

    /// Source line numbers of the TEXT micro-operations.
    pub source_map: SourceMap<usize>,

    pub symbols: SymbolTable,
}

/// Error returned when a program cannot be assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    /// The offending source line, if the error concerns a single line.
    pub line: Option<usize>,
    pub source: Option<String>,
    pub kind: CompileErrorKind,
}

impl CompileError {
    fn new(line: Option<usize>, source: Option<&str>, kind: CompileErrorKind) -> CompileError {
        CompileError {
            line,
            source: source.map(String::from),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    Malformed(ParseError),
    UnknownMnemonic { name: String, suggestion: Option<String> },
    WrongOperandCount { mnemonic: String, expected: String, got: usize },
    InvalidOperand { operand: String, reason: &'static str },
    Operand(OperandError),

    /// More than one operand of the instruction needs its address computed into M4.
    MultipleAddressCalculations,

    UnresolvedLabel(UnresolvedLabel),
    DuplicateLabel(DuplicateLabel),
    ProgramTooLarge { section: &'static str, size: usize },
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompileErrorKind::Malformed(err) => write!(f, "malformed line: {}", err),
            CompileErrorKind::UnknownMnemonic { name, suggestion: Some(suggestion) } => {
                write!(f, "unknown instruction '{}', did you mean '{}'?", name, suggestion)
            }
            CompileErrorKind::UnknownMnemonic { name, suggestion: None } => {
                write!(f, "unknown instruction '{}'", name)
            }
            CompileErrorKind::WrongOperandCount { mnemonic, expected, got } => write!(
                f,
                "'{}' takes {} operands, got {}",
                mnemonic, expected, got
            ),
            CompileErrorKind::InvalidOperand { operand, reason } => {
                write!(f, "invalid operand '{}': {}", operand, reason)
            }
            CompileErrorKind::Operand(err) => write!(f, "{}", err),
            CompileErrorKind::MultipleAddressCalculations => {
                write!(f, "only one operand may need an address calculation")
            }
            CompileErrorKind::UnresolvedLabel(err) => write!(f, "{}", err),
            CompileErrorKind::DuplicateLabel(err) => write!(f, "{}", err),
            CompileErrorKind::ProgramTooLarge { section, size } => {
                write!(f, "section {} is too large ({} entries)", section, size)
            }
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.line, &self.source) {
            (Some(line), Some(source)) => write!(f, "line {}: {}: '{}'", line, self.kind, source),
            (Some(line), None) => write!(f, "line {}: {}", line, self.kind),
            _ => write!(f, "{}", self.kind),
        }
    }
}

impl From<DuplicateLabel> for CompileErrorKind {
    fn from(err: DuplicateLabel) -> CompileErrorKind {
        CompileErrorKind::DuplicateLabel(err)
    }
}

/// A micro-operation waiting for its constant to be resolved.
struct Emitted {
    instruction: AssemblyInstruction,
    comment: Option<String>,
    line: Option<usize>,
}

/// Builds the code that runs before the entry procedure.
///
/// Sets SP, stores the address of the halt label at the top of the stack as the return address
/// of the entry procedure and jumps to the entry label.
fn prologue(options: &Options) -> Sequence {
    let halt = Immediate::label(options.halt_label.as_str(), Width::Word);

    let mut seq = Sequence::new();
    seq.constant(Immediate::number(options.stack_pointer as i64, Width::Word));
    seq.store(RegisterPair::SP);
    seq.load_m3(Bus::M1);
    seq.exec(Operation::SetMemoryPointer);
    seq.constant_low(halt.clone());
    seq.load(Bus::M2, Half::Low, Source::M3(Half::Low));
    seq.exec(Operation::WriteMemory);
    seq.exec(Operation::IncrementMemoryPointer);
    seq.push(Instruction::Const { half: Half::High, value: halt });
    seq.load(Bus::M2, Half::Low, Source::M3(Half::High));
    seq.exec(Operation::WriteMemory);
    seq.constant(Immediate::label(options.entry.as_str(), Width::Word));
    seq.load_m3(Bus::M1);
    seq.exec(Operation::Jump);
    seq
}

fn section_limit(kind: SectionKind) -> usize {
    match kind {
        SectionKind::Text => 0x1_0000,
        SectionKind::Data | SectionKind::Const => 0x8000,
    }
}

fn define_region_label(
    symbols: &mut SymbolTable,
    label: &str,
    line: Option<usize>,
    offset: usize,
) -> Result<(), CompileError> {
    let result = match line {
        Some(line) => symbols.define_at(label, offset as u16, line),
        None => symbols.define(label, offset as u16),
    };

    result.map_err(|err| CompileError::new(line, Some(label), err.into()))
}

/// Assigns addresses to the labels of a DATA or CONST section.
fn layout_data(section: &Section<DataLine>, symbols: &mut SymbolTable, logger: &Logger) -> Result<(), CompileError> {
    let base = section.kind.base_address() as usize;
    let mut size = 0;

    for region in &section.regions {
        // A label at the end of a full section would alias the next segment.
        if size >= section_limit(section.kind) {
            return Err(CompileError::new(region.line, Some(&region.label), CompileErrorKind::ProgramTooLarge {
                section: section.kind.name(),
                size,
            }));
        }

        debug!(logger, "define label"; "section" => section.kind.name(), "label" => &region.label, "offset" => base + size);
        define_region_label(symbols, &region.label, region.line, base + size)?;

        size += region.items.iter().map(|item| item.directive.size()).sum::<usize>();

        if size > section_limit(section.kind) {
            return Err(CompileError::new(region.line, None, CompileErrorKind::ProgramTooLarge {
                section: section.kind.name(),
                size,
            }));
        }
    }

    Ok(())
}

/// Produces the bytes of a DATA or CONST section.
fn emit_data(section: &Section<DataLine>, symbols: &SymbolTable) -> Result<Vec<Byte>, CompileError> {
    let mut bytes = Vec::new();

    for item in section.regions.iter().flat_map(|region| region.items.iter()) {
        let resolve = |imm: &Immediate| {
            imm.resolve(symbols).map_err(|err| {
                CompileError::new(
                    Some(item.source.number),
                    Some(item.source.text.as_str()),
                    CompileErrorKind::UnresolvedLabel(err),
                )
            })
        };

        match &item.directive {
            DataDirective::Bytes(values) => {
                for value in values {
                    bytes.push(resolve(value)?.low());
                }
            }
            DataDirective::Words(values) => {
                for value in values {
                    let word = resolve(value)?;
                    bytes.push(word.low());
                    bytes.push(word.high());
                }
            }
            DataDirective::Strings { strings, terminated } => {
                for string in strings {
                    bytes.extend(string.iter().map(|b| Byte(*b)));

                    if *terminated {
                        bytes.push(Byte(0));
                    }
                }
            }
        }
    }

    Ok(bytes)
}

/// Assembles the program with the default [Options] and without logging.
pub fn compile(program: &Program) -> Result<Assembly, CompileError> {
    compile_with_logger(program, &Options::default(), None)
}

pub fn compile_with_logger<L>(program: &Program, options: &Options, logger: L) -> Result<Assembly, CompileError>
where
    L: Into<Option<Logger>>,
{
    let logger = logger
        .into()
        .unwrap_or_else(|| Logger::root(Discard, o!()))
        .new(o!("stage" => "assembly"));

    let mut symbols = SymbolTable::new();

    layout_data(&program.data, &mut symbols, &logger)?;
    layout_data(&program.constants, &mut symbols, &logger)?;

    let mut code: Vec<Emitted> = prologue(options)
        .into_instructions()
        .into_iter()
        .map(|instruction| Emitted { instruction, comment: None, line: None })
        .collect();

    define_region_label(&mut symbols, &options.halt_label, None, code.len())?;
    code.push(Emitted {
        instruction: Instruction::Exec(Operation::Halt),
        comment: None,
        line: None,
    });

    let mut warnings = Vec::new();

    for region in &program.text.regions {
        let region_log = logger.new(o!("label" => region.label.clone()));

        debug!(region_log, "define label"; "section" => "_TEXT", "offset" => code.len());
        define_region_label(&mut symbols, &region.label, region.line, code.len())?;

        for line in &region.items {
            let error = |kind| CompileError::new(Some(line.number), Some(line.text.as_str()), kind);

            let stmt = complete(statement, &line.text)
                .map_err(|err| error(CompileErrorKind::Malformed(err)))?;

            let seq = match translate(stmt.name, &stmt.arguments, code.len()) {
                Ok(seq) => seq,
                Err(CompileErrorKind::Operand(reason @ OperandError::SegmentRegister(_))) => {
                    warn!(region_log, "skipping line containing a segment register"; "line" => line.number, "text" => &line.text);

                    warnings.push(Warning {
                        line: line.number,
                        text: line.text.clone(),
                        reason,
                    });

                    continue;
                }
                Err(kind) => return Err(error(kind)),
            };

            trace!(region_log, "translate instruction"; "line" => line.number, "address" => code.len(), "size" => seq.len());

            let mut comment = Some(line.condensed());

            for instruction in seq.into_instructions() {
                code.push(Emitted {
                    instruction,
                    comment: comment.take(),
                    line: Some(line.number),
                });
            }

            if code.len() > section_limit(SectionKind::Text) {
                return Err(error(CompileErrorKind::ProgramTooLarge {
                    section: SectionKind::Text.name(),
                    size: code.len(),
                }));
            }
        }
    }

    let mut text = Segment::new();
    let mut source_map = SourceMap::new();

    for (addr, emitted) in code.into_iter().enumerate() {
        let addr = addr as u16;
        let Emitted { instruction, comment, line } = emitted;

        let instruction = instruction
            .map_constant(|half, imm| {
                imm.resolve(&symbols).map(|word| match half {
                    Half::High => word.high(),
                    Half::Low => word.low(),
                })
            })
            .map_err(|err| {
                CompileError::new(line, comment.as_deref(), CompileErrorKind::UnresolvedLabel(err))
            })?;

        if let Some(line) = line {
            source_map.insert(addr, line);
        }

        text.insert(addr, TextEntry { instruction, comment });
    }

    let data = emit_data(&program.data, &symbols)?;
    let constants = emit_data(&program.constants, &symbols)?;

    debug!(logger, "assembly finished"; "text" => text.len(), "data" => data.len(), "const" => constants.len());

    Ok(Assembly {
        program: ObjectProgram {
            text,
            data: Segment::from_values(SectionKind::Data.base_address(), data),
            constants: Segment::from_values(SectionKind::Const.base_address(), constants),
        },
        warnings,
        source_map,
        symbols,
    })
}
