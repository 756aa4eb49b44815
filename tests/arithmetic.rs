use ppt::{
    bits::Word,
    compiler::Assembly,
    emulator::{Emulator, SegmentedMemory, TestIo},
    instruction::{Instruction, Operation, RegisterPair},
    symbolic::Program,
};

fn assemble(source: &str) -> Assembly {
    Program::parse(source)
        .expect("could not parse the source")
        .compile()
        .expect("could not assemble the program")
}

fn run<'a>(assembly: &Assembly, io: &'a mut TestIo) -> Emulator<SegmentedMemory, &'a mut TestIo> {
    let memory = SegmentedMemory::new(&assembly.program);
    let mut emulator = Emulator::new(memory, io);

    emulator.run_with_limit(10_000).expect("error while executing the program");

    emulator
}

#[test]
fn test_add_and_print() {
    let assembly = assemble(include_str!("add.s"));

    let operations: Vec<&Instruction> = assembly
        .program
        .text
        .iter()
        .map(|(_, entry)| &entry.instruction)
        .collect();

    assert!(operations.contains(&&Instruction::Exec(Operation::AddW)));
    assert!(operations.contains(&&Instruction::Exec(Operation::PutInt)));
    assert!(!operations.iter().any(|op| op.argument().as_deref() == Some("PUTS")));

    let mut io = TestIo::new();
    let emulator = run(&assembly, &mut io);

    assert!(emulator.halted);
    assert_eq!(emulator.state.pair(RegisterPair::A), Word(8));
    drop(emulator);

    assert_eq!(io.into_output(), "8");
}

#[test]
fn test_compare_and_branch() {
    let assembly = assemble(include_str!("compare.s"));

    for &(input, expected) in [("15", "different"), ("16", "equal"), ("17", "different")].iter() {
        let mut io = TestIo::with_input(vec![input]);
        run(&assembly, &mut io);

        assert_eq!(io.output(), expected, "AL = {}", input);
    }
}

#[test]
fn test_indexed_sum() {
    let assembly = assemble(include_str!("sum.s"));

    let mut io = TestIo::new();
    run(&assembly, &mut io);

    assert_eq!(io.into_output(), "42");
}
