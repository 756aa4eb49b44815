use std::path::{Path, PathBuf};

use clap::{App, Arg, ArgMatches};
use slog::{o, Discard, Drain, Logger};
use slog_term::{FullFormat, TermDecorator};

use ppt::{
    compiler::{CompileError, Options},
    symbolic::{Program, SyntaxError},
};

enum Error {
    Syntax(SyntaxError),
    Compile(CompileError),
    IO(PathBuf, std::io::Error),
}

impl From<SyntaxError> for Error {
    fn from(e: SyntaxError) -> Error {
        Error::Syntax(e)
    }
}

impl From<CompileError> for Error {
    fn from(e: CompileError) -> Error {
        Error::Compile(e)
    }
}

fn parse_arguments() -> ArgMatches<'static> {
    App::new("pptasm")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Assembles x86 AT&T assembly into PPT micro-operations")
        .arg(Arg::with_name("source")
             .help("File containing the assembly source")
             .value_name("SOURCE")
             .required(true)
             .index(1))
        .arg(Arg::with_name("output")
             .help("Path of the object file. Defaults to SOURCE with the extension .pptasm")
             .value_name("OUTPUT")
             .short("o")
             .long("output")
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

    let source = Path::new(args.value_of("source").unwrap());

    let output = match args.value_of("output") {
        Some(path) => PathBuf::from(path),
        None => source.with_extension("pptasm"),
    };

    let result = assemble(source, &output, &logger);
    drop(logger);

    match result {
        Ok(()) => (),
        Err(Error::IO(path, err)) => {
            eprintln!("{}: {}", path.display(), err);
            std::process::exit(1);
        }
        Err(Error::Syntax(err)) => {
            eprintln!("{}: syntax error: {}", source.display(), err);
            std::process::exit(1);
        }
        Err(Error::Compile(err)) => {
            eprintln!("{}: {}", source.display(), err);
            std::process::exit(1);
        }
    }
}

fn assemble(source: &Path, output: &Path, logger: &Logger) -> Result<(), Error> {
    let text = std::fs::read_to_string(source)
        .map_err(|err| Error::IO(source.to_path_buf(), err))?;

    let program = Program::parse(&text)?;
    let assembly = program.compile_with_logger(&Options::default(), logger.clone())?;

    for warning in &assembly.warnings {
        eprintln!("{}: warning: {}", source.display(), warning);
    }

    std::fs::write(output, assembly.program.to_string())
        .map_err(|err| Error::IO(output.to_path_buf(), err))?;

    Ok(())
}
