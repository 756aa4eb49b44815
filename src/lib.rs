//! A crate for assembling x86 AT&T assembly into micro-operations of the PPT architecture and
//! for executing them.
//!
//! The PPT machine has no instructions in the x86 sense. A program is a list of byte-sized
//! micro-operations that move data between the named 8-bit registers and three 16-bit bus
//! registers (`M1`, `M2`, `M3`) and an `EXEC` micro-operation that runs a named operation
//! (`ADDW`, `JV`, `PUTS`, ...) on the bus registers.
//!
//! Currently this crate provides the functionality to:
//! - Parse the supported subset of GNU assembler syntax into a [symbolic program](symbolic::Program).
//! - Compile a symbolic program into an [object program](bytecode::ObjectProgram).
//! - Read and write the textual object format.
//! - Execute object programs.
//!
//! # Example
//! ```
//! use ppt::{
//!     symbolic::Program,
//!     compiler::compile,
//!     emulator::{Emulator, SegmentedMemory, TestIo},
//! };
//!
//! let source = "
//! .new_section _TEXT
//! main_:
//!     movw    $5,%ax
//!     addw    $3,%ax
//!     call    ppt_putint_
//!     ret
//! ";
//!
//! // Parse the assembly into sections of labeled regions.
//! let program = Program::parse(source).unwrap();
//!
//! // Translate the program into micro-operations.
//! let assembly = compile(&program).unwrap();
//!
//! // Load the object program into an emulator which records the output.
//! let memory = SegmentedMemory::new(&assembly.program);
//! let mut emulator = Emulator::new(memory, TestIo::new());
//!
//! emulator.run().unwrap();
//!
//! assert_eq!(emulator.io.output(), "8");
//! ```
//!
//! # Executables
//!
//! ## `pptasm`
//!
//! Assembles one source file into one object file.
//!
//! ```text
//! $ pptasm hello.s -o hello.pptasm
//! ```
//!
//! ## `pptvm`
//!
//! Loads an object file and runs it until it halts.
//!
//! ```text
//! $ pptvm hello.pptasm
//! Hello, world!
//! ```
pub mod alu;
pub mod bits;
pub mod bytecode;
pub mod codegen;
pub mod compiler;
pub mod emulator;
pub mod error;
pub mod event;
pub mod instruction;
pub mod source_map;
pub mod symbol_table;
pub mod symbolic;
