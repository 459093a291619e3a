use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::debug;

use rill::interpreter::{DEFAULT_MEMORY_LIMIT_MB, Interpreter, InterpreterError};
use rill::{bytecode, lexer, parser};

#[derive(Parser)]
#[command(name = "rill", version, about = "Interpreter for the rill scripting language")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the token stream
    Scan(IoArgs),
    /// Check that the program parses
    Parse(IoArgs),
    /// Compile to bytecode (not implemented)
    Compile(IoArgs),
    /// Run the program with the tree-walking interpreter
    Interpret(IoArgs),
    /// Parse textual bytecode and pretty-print it
    Vm(IoArgs),
}

#[derive(Args)]
struct IoArgs {
    /// Path to input file, use '-' for stdin
    #[arg(default_value = "-")]
    input: String,

    /// Path to output file, use '-' for stdout
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Memory limit in megabytes
    #[arg(short, long, default_value_t = DEFAULT_MEMORY_LIMIT_MB)]
    mem: usize,
}

/// What went wrong, reduced to the mnemonic written to stderr. I/O problems
/// keep their full context instead.
enum Failure {
    Io(anyhow::Error),
    Lexical,
    Parse,
    Exec(InterpreterError),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Io(error) => write!(f, "{error:#}"),
            Failure::Lexical => write!(f, "LexicalError"),
            Failure::Parse => write!(f, "ParseError"),
            Failure::Exec(error) => write!(f, "{error}"),
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    // clap exits 2 on bad arguments by default; this tool's contract is 1.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            eprintln!("{failure}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), Failure> {
    match command {
        Command::Scan(args) => {
            let source = read_input(&args.input)?;
            let tokens = lexer::lex(&source);
            let mut out = open_output(&args.output)?;
            lexer::write_tokens(&tokens, &mut out)
                .context("writing tokens")
                .map_err(Failure::Io)?;
            if lexer::has_errors(&tokens) {
                return Err(Failure::Lexical);
            }
            Ok(())
        }
        Command::Parse(args) => {
            let program = frontend(&args.input)?;
            debug!("parsed {} top-level statements", program.statements.len());
            Ok(())
        }
        Command::Compile(args) => {
            let _source = read_input(&args.input)?;
            eprintln!("compile is not implemented yet");
            Ok(())
        }
        Command::Interpret(args) => {
            let program = frontend(&args.input)?;
            // Program output always goes to standard output.
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let stdin = io::stdin();
            let mut input = stdin.lock();
            Interpreter::with_memory_limit(&mut out, &mut input, args.mem)
                .run(&program)
                .map_err(Failure::Exec)
        }
        Command::Vm(args) => {
            let source = read_input(&args.input)?;
            let function = bytecode::parse(&source).map_err(|error| {
                debug!("bytecode rejected: {error}");
                match error {
                    bytecode::BytecodeError::UnexpectedToken { .. } => Failure::Parse,
                    _ => Failure::Lexical,
                }
            })?;
            let mut out = open_output(&args.output)?;
            bytecode::prettyprint(&function, &mut out)
                .context("writing bytecode")
                .map_err(Failure::Io)
        }
    }
}

/// Lex and parse the source program, mapping failures to their mnemonics.
fn frontend(input: &str) -> Result<rill::ast::Program, Failure> {
    let source = read_input(input)?;
    let tokens = lexer::lex(&source);
    if lexer::has_errors(&tokens) {
        for token in tokens
            .iter()
            .filter(|token| token.kind == rill::token::TokenKind::Error)
        {
            debug!("line {}: {}", token.line, token.lexeme);
        }
        return Err(Failure::Lexical);
    }
    parser::parse_tokens(tokens).map_err(|error| {
        debug!("parse failed: {error:#}");
        Failure::Parse
    })
}

fn read_input(path: &str) -> Result<String, Failure> {
    if path == "-" {
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .context("reading stdin")
            .map_err(Failure::Io)?;
        return Ok(source);
    }
    fs::read_to_string(path)
        .with_context(|| format!("reading {path}"))
        .map_err(Failure::Io)
}

fn open_output(path: &str) -> Result<Box<dyn Write>, Failure> {
    if path == "-" {
        return Ok(Box::new(io::stdout()));
    }
    let file = fs::File::create(path)
        .with_context(|| format!("creating {path}"))
        .map_err(Failure::Io)?;
    Ok(Box::new(file))
}
