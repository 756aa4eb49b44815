use clap::{App, Arg, ArgMatches};
use slog::{o, Discard, Drain, Logger};
use slog_term::{FullFormat, TermDecorator};

use ppt::{
    bits::Word,
    bytecode::{LoadError, ObjectProgram},
    emulator::{Emulator, ExecutionError, MemoryError, SegmentedMemory, StdIo},
};

enum Error {
    Load(LoadError),
    Execution(ExecutionError<MemoryError>),
    IO(std::io::Error),
    InvalidArgument(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::IO(e)
    }
}

impl From<LoadError> for Error {
    fn from(e: LoadError) -> Error {
        Error::Load(e)
    }
}

fn parse_arguments() -> ArgMatches<'static> {
    App::new("pptvm")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Executes PPT object programs")
        .arg(Arg::with_name("object")
             .help("File containing the assembled object program")
             .value_name("OBJECT")
             .required(true)
             .index(1))
        .arg(Arg::with_name("max-steps")
             .help("Stop with an error after executing this many micro-operations")
             .value_name("N")
             .long("max-steps")
             .takes_value(true))
        .arg(Arg::with_name("verbose")
             .help("Enables verbose logging")
             .long("verbose")
             .short("v"))
        .get_matches()
}

fn main() {
    let args = parse_arguments();

    let logger = if args.is_present("verbose") {
        let decorator = TermDecorator::new().build();
        let drain = FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        Logger::root(drain, o!())
    } else {
        Logger::root(Discard, o!())
    };

    let file_path = args.value_of("object").unwrap();
    let result = run(file_path, args.value_of("max-steps"), &logger);
    drop(logger);

    let code = match result {
        Ok(()) => 0,
        Err(Error::IO(io)) => {
            eprintln!("{}: {}", file_path, io);
            1
        }
        Err(Error::Load(err)) => {
            eprintln!("{}: {}", file_path, err);
            1
        }
        Err(Error::InvalidArgument(arg)) => {
            eprintln!("invalid step limit '{}'", arg);
            2
        }
        Err(Error::Execution(_)) => 1,
    };

    std::process::exit(code);
}

fn run(file_path: &str, max_steps: Option<&str>, logger: &Logger) -> Result<(), Error> {
    let max_steps = max_steps
        .map(|arg| arg.parse::<usize>().map_err(|_| Error::InvalidArgument(arg.to_string())))
        .transpose()?;

    let file = std::fs::read_to_string(file_path)?;
    let program = ObjectProgram::parse(&file)?;

    let memory = SegmentedMemory::new(&program);
    let mut emulator = Emulator::with_logger(memory, StdIo, logger.clone());

    let result = match max_steps {
        Some(limit) => emulator.run_with_limit(limit).map(|_| ()),
        None => emulator.run(),
    };

    result.map_err(|err| {
        eprintln!("\nexecution error {}", err);

        if let Some((address, line)) = program.source_map().find(err.address) {
            eprintln!("  in '{}' starting at {}", line, Word(address));
        }

        Error::Execution(err)
    })
}
