//! Occurs-check-free unification
//!
//! `X = f(X)` must succeed with a cyclic term, and reading the answer back
//! must terminate by eliding below the depth cut.

use zipr::machine::code::CodeStore;
use zipr::machine::word::Tag;
use zipr::machine::{Machine, Outcome, Term};
use zipr::{compile_query, consult};

fn prepare(query: &str) -> Machine {
    let mut code = CodeStore::new();
    let compiled = compile_query(&mut code, query).unwrap();
    let mut machine = Machine::new(code);
    machine.reset(compiled.addr).unwrap();
    machine
}

#[test]
fn test_self_binding_succeeds() {
    let mut machine = prepare("X = f(X)");
    assert_eq!(machine.run().unwrap(), Outcome::Solution);

    // The binding is genuinely cyclic: the structure's argument cell
    // dereferences back to the structure itself.
    let root = machine.query_frame().unwrap();
    let (cell, word) = machine.deref(machine.var_addr(root, 0)).unwrap();
    assert_eq!(word.tag(), Tag::Str);
    let functor = machine.read_word(word.payload()).unwrap();
    assert_eq!(functor.tag(), Tag::Fun);
    let (arg, _) = machine.deref(word.payload() + 1).unwrap();
    assert_eq!(arg, cell, "argument cell leads back to the bound cell");
}

#[test]
fn test_cyclic_answer_elides() {
    let mut machine = prepare("X = f(X)");
    machine.run().unwrap();

    let term = machine.read_binding(0).unwrap();
    let rendered = term.to_string();
    assert!(rendered.starts_with("f(f("));
    assert!(rendered.contains("..."));

    // The tree bottoms out in an elision rather than recursing forever.
    let mut probe = &term;
    while let Term::Compound(_, args) = probe {
        probe = &args[0];
    }
    assert_eq!(probe, &Term::Elided);
}

#[test]
fn test_unifying_cyclic_terms_terminates() {
    // Re-unifying the cyclic binding against a fresh copy also terminates.
    let mut machine = prepare("X = f(X), X = f(X)");
    assert_eq!(machine.run().unwrap(), Outcome::Solution);
}

#[test]
fn test_mutual_cycle() {
    let mut machine = prepare("X = f(Y), Y = f(X)");
    assert_eq!(machine.run().unwrap(), Outcome::Solution);
}

#[test]
fn test_consulting_nothing_is_fine() {
    let mut code = CodeStore::new();
    consult(&mut code, "").unwrap();
    assert_eq!(code.code_size(), 0);
}
