//! Interactive query loop
//!
//! Reads queries at the `?- ` prompt, prints each solution's bindings, and
//! steps through alternatives on `;` (an empty line commits). `halt` leaves
//! the loop. The bytecode memento is taken before each query is compiled
//! and restored on every exit path, so the provider returns to the
//! program-only state between queries. History persists in
//! `~/.zipr_history`.

use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::compiler::{compile_query, CompiledQuery};
use crate::machine::{Machine, MachineResult, Outcome};

/// Run the interactive loop until `halt` or end of input.
pub fn run(machine: &mut Machine) -> rustyline::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history = history_path();
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    loop {
        match rl.readline("?- ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);
                if input == "halt" || input == "halt." {
                    break;
                }
                run_query(machine, &mut rl, input);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err),
        }
    }

    if let Some(path) = &history {
        let _ = rl.save_history(path);
    }
    Ok(())
}

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".zipr_history"))
}

fn run_query(machine: &mut Machine, rl: &mut DefaultEditor, input: &str) {
    let memento = machine.code().memento();
    match compile_query(machine.code_mut(), input) {
        Ok(query) => solve(machine, rl, &query),
        Err(err) => eprintln!("Error: {}", err),
    }
    machine.code_mut().restore(&memento);
}

fn solve(machine: &mut Machine, rl: &mut DefaultEditor, query: &CompiledQuery) {
    if let Err(err) = machine.reset(query.addr) {
        eprintln!("Error: {}", err);
        return;
    }
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
        match outcome {
            Ok(Outcome::Solution) => {
                if let Err(err) = print_solution(machine, query) {
                    eprintln!("Error: {}", err);
                    return;
                }
                if !wants_more(rl) {
                    return;
                }
            }
            Ok(Outcome::NoMoreSolutions) => {
                println!("no");
                return;
            }
            Err(err) => {
                eprintln!("Error: {}", err);
                return;
            }
        }
    }
}

/// Print the current solution's bindings, or `yes` for a variable-free
/// query.
pub fn print_solution(machine: &Machine, query: &CompiledQuery) -> MachineResult<()> {
    if query.vars.is_empty() {
        println!("yes");
        return Ok(());
    }
    for (name, slot) in &query.vars {
        let term = machine.read_binding(*slot)?;
        println!("{} = {}", name, term);
    }
    Ok(())
}

fn wants_more(rl: &mut DefaultEditor) -> bool {
    matches!(rl.readline(""), Ok(line) if line.trim() == ";")
}
