//! A minimal line-oriented REPL (§6) standing in for the curses UI that is
//! out of scope: reads one line at a time, dispatches it through the same
//! `Document` command facade the reference crate's `process_command.rs`
//! occupies, and prints the evaluated viewport to stdout. Builds without the
//! `extensions` feature using plain `stdin`/`stdout` line reading; with it,
//! `rustyline` supplies history and line editing.

use gridcalc::cell::CellTag;
use gridcalc::command::Document;
use gridcalc::persistence;
use gridcalc::sheet::col_name;
use std::env;
use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

const DEFAULT_FILENAME: &str = "gridcalc.sheet";
const VIEWPORT_ROWS: i32 = 10;
const VIEWPORT_COLS: i32 = 10;

fn cell_display(doc: &Document, row: i32, col: i32) -> String {
    match doc.sheet.get(row, col) {
        None => String::new(),
        Some(cell) => {
            if cell.error != gridcalc::cell::ErrorCode::Ok {
                return "ERR".to_string();
            }
            match cell.tag {
                CellTag::Empty => String::new(),
                CellTag::Number => format!("{}", cell.v),
                CellTag::Boolean => if cell.v != 0.0 { "TRUE".to_string() } else { "FALSE".to_string() },
                CellTag::String => cell.label.as_ref().map(|s| s.as_str().to_string()).unwrap_or_default(),
                CellTag::Error => "ERR".to_string(),
            }
        }
    }
}

fn print_grid(doc: &Document) {
    let start_row = doc.sheet.viewport_row;
    let start_col = doc.sheet.viewport_col;

    print!("     ");
    for j in 0..VIEWPORT_COLS {
        print!("{:<10} ", col_name(start_col + j));
    }
    println!();

    for i in 0..VIEWPORT_ROWS {
        print!("{:<4} ", start_row + i + 1);
        for j in 0..VIEWPORT_COLS {
            print!("{:<10} ", cell_display(doc, start_row + i, start_col + j));
        }
        println!();
    }
}

/// Runs one command line against `doc`, returning a short status word for
/// the prompt (mirroring the reference implementation's `CommandStatus`
/// surfaced as text rather than an enum match, since the REPL has no other
/// consumer of it).
fn run_line(doc: &mut Document, line: &str) -> String {
    let trimmed = line.trim();
    if let Some(path) = trimmed.strip_prefix("save ") {
        return match persistence::save(doc, Path::new(path.trim())) {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("error: {e}"),
        };
    }
    if let Some(path) = trimmed.strip_prefix("load ") {
        return match persistence::load(doc, Path::new(path.trim())) {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("error: {e}"),
        };
    }
    if trimmed == "recalc" {
        let report = doc.recalculate();
        return format!("ok ({} pass{})", report.passes, if report.passes == 1 { "" } else { "es" });
    }
    match persistence::apply_line(doc, trimmed) {
        Ok(()) => {
            doc.recalculate();
            "ok".to_string()
        }
        Err(e) => format!("error: {e}"),
    }
}

#[cfg(feature = "extensions")]
fn run_interactive(doc: &mut Document) {
    use rustyline::error::ReadlineError;
    use rustyline::Editor;

    let mut rl = Editor::<()>::new().expect("failed to start line editor");
    let start = Instant::now();
    let mut last_status = "ok".to_string();

    loop {
        print_grid(doc);
        let prompt = format!("[{:.1}] ({}) > ", start.elapsed().as_secs_f64(), last_status);
        match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                if line.trim() == "q" {
                    break;
                }
                last_status = run_line(doc, &line);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                log::warn!("line editor error: {e}");
                break;
            }
        }
    }
}

#[cfg(not(feature = "extensions"))]
fn run_interactive(doc: &mut Document) {
    let start = Instant::now();
    let mut last_status = "ok".to_string();
    let mut input = String::with_capacity(128);

    loop {
        print_grid(doc);
        print!("[{:.1}] ({}) > ", start.elapsed().as_secs_f64(), last_status);
        io::stdout().flush().ok();

        input.clear();
        match io::stdin().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                log::warn!("stdin read error: {e}");
                break;
            }
        }
        if input.trim() == "q" {
            break;
        }
        last_status = run_line(doc, &input);
    }
}

fn main() {
    env_logger::init();

    let mut doc = Document::new();
    let args: Vec<String> = env::args().collect();
    let filename = args.get(1).cloned().unwrap_or_else(|| DEFAULT_FILENAME.to_string());

    if Path::new(&filename).exists() {
        if let Err(e) = persistence::load(&mut doc, Path::new(&filename)) {
            eprintln!("failed to load '{filename}': {e}");
        }
    }

    run_interactive(&mut doc);
}
