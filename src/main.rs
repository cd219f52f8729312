/// zipr - ZIP machine Prolog runtime CLI
use std::env;
use std::fs;
use std::process;

use tracing_subscriber::EnvFilter;

use zipr::compiler::{compile_query, consult};
use zipr::machine::code::CodeStore;
use zipr::machine::{Machine, MachineConfig, Outcome};
use zipr::repl;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("zipr v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    zipr [OPTIONS] [PROGRAM]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help           Print this help message");
    eprintln!("    -v, --version        Print version information");
    eprintln!("    -q, --query <GOALS>  Run one query and print every solution");
    eprintln!("    --dis                Print the compiled program listing and exit");
    eprintln!("    --trace              Dump each executed instruction to stderr");
    eprintln!();
    eprintln!("ARGUMENTS:");
    eprintln!("    [PROGRAM]            Prolog program file to consult");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    zipr family.pl");
    eprintln!("    zipr family.pl -q 'parent(tom, X)'");
    eprintln!("    zipr --dis family.pl");
}

fn print_version() {
    println!("zipr {}", VERSION);
}

struct Options {
    program: Option<String>,
    query: Option<String>,
    dis: bool,
    trace: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut program = None;
    let mut query = None;
    let mut dis = false;
    let mut trace = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                process::exit(0);
            }
            "-q" | "--query" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing goals after -q".to_string());
                }
                query = Some(args[i].clone());
            }
            "--dis" => {
                dis = true;
            }
            "--trace" => {
                trace = true;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            arg => {
                if program.is_some() {
                    return Err("Multiple program files specified".to_string());
                }
                program = Some(arg.to_string());
            }
        }
        i += 1;
    }

    Ok(Options {
        program,
        query,
        dis,
        trace,
    })
}

/// Run one query non-interactively, printing every solution.
fn run_once(machine: &mut Machine, input: &str) -> Result<(), String> {
    let memento = machine.code().memento();
    let result = (|| {
        let query =
            compile_query(machine.code_mut(), input).map_err(|e| format!("Error: {}", e))?;
        machine
            .reset(query.addr)
            .map_err(|e| format!("Error: {}", e))?;

        let mut undone = Vec::new();
        let mut first = true;
        loop {
            let outcome = if first {
                machine.run()
            } else {
                undone.clear();
                machine.next_solution(&mut undone)
            };
            first = false;
            match outcome.map_err(|e| format!("Error: {}", e))? {
                Outcome::Solution => {
                    repl::print_solution(machine, &query).map_err(|e| format!("Error: {}", e))?;
                }
                Outcome::NoMoreSolutions => {
                    println!("no");
                    return Ok(());
                }
            }
        }
    })();
    machine.code_mut().restore(&memento);
    result
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    let mut code = CodeStore::new();
    if let Some(path) = &options.program {
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("Error: failed to read '{}': {}", path, e);
                process::exit(1);
            }
        };
        if let Err(e) = consult(&mut code, &source) {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }

    if options.dis {
        println!("{}", code.disassemble_program());
        return;
    }

    let config = MachineConfig {
        trace: options.trace,
        ..MachineConfig::default()
    };
    let mut machine = Machine::with_config(code, config);

    if let Some(query) = &options.query {
        if let Err(e) = run_once(&mut machine, query) {
            eprintln!("{}", e);
            process::exit(1);
        }
        return;
    }

    println!("zipr {}", VERSION);
    println!("Type 'halt' to leave.");
    println!();
    if let Err(e) = repl::run(&mut machine) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
