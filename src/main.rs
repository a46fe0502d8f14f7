// main.rs - Interactive REPL and script runner

use std::path::{Path, PathBuf};
use std::process;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use rivet::outer;
use rivet::vm::{State, Vm};

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".rivet_history"))
}

fn print_usage() {
    println!("Usage: rivet [options] [files...]");
    println!();
    println!("Options:");
    println!("  -e <code>   evaluate code, then exit");
    println!("  -h, --help  show this help");
    println!();
    println!("With no files, starts an interactive session.");
}

fn report(vm: &mut Vm, err: rivet::error::VmError) {
    eprintln!("ABORT: {}", err);
    vm.reset();
}

fn run_file(vm: &mut Vm, path: &str) -> bool {
    if let Err(e) = outer::load_file(vm, Path::new(path)) {
        report(vm, e);
        return false;
    }
    true
}

fn repl(vm: &mut Vm) {
    println!("rivet {}", env!("CARGO_PKG_VERSION"));
    println!("Type 'bye' to exit");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Error: failed to start line editor: {}", e);
            process::exit(1);
        }
    };
    let history = history_path();
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    loop {
        let prompt = if vm.state == State::Compile { "... " } else { "> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line.as_str());
                match outer::interpret_line(vm, &line) {
                    Ok(()) => {
                        if vm.state == State::Compile {
                            println!(" compiled");
                        } else {
                            println!(" ok");
                        }
                    }
                    Err(e) => report(vm, e),
                }
                if !vm.running {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                vm.reset();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        let _ = rl.save_history(path);
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut vm = Vm::new();
    if let Err(e) = outer::load_boot(&mut vm) {
        eprintln!("Error loading boot definitions: {}", e);
        process::exit(1);
    }

    let mut files = Vec::new();
    let mut eval: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return;
            }
            "-e" => {
                i += 1;
                match args.get(i) {
                    Some(code) => eval = Some(code.clone()),
                    None => {
                        eprintln!("Error: -e requires an argument");
                        process::exit(1);
                    }
                }
            }
            other => files.push(other.to_string()),
        }
        i += 1;
    }

    for file in &files {
        if !run_file(&mut vm, file) {
            process::exit(1);
        }
        if !vm.running {
            return;
        }
    }

    if let Some(code) = eval {
        if let Err(e) = outer::interpret_source(&mut vm, &code) {
            report(&mut vm, e);
            process::exit(1);
        }
        return;
    }

    if files.is_empty() {
        repl(&mut vm);
    }
}
