//! Command loop
//! Reads one command per line from stdin and drives the session

use anyhow::Result;
use app_core::{ActiveEntry, AppError, MediaKind, Session};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
commands:
  next | prev            step through the folder
  jump N                 go to file N (1-based)
  first | last
  open PATH              browse a folder, or the folder of a file
  copy DIR | move DIR    copy / move the current file into DIR
  delete                 delete the current file
  undo                   reverse the last copy, move or delete
  info                   current file, cache and undo state
  list                   files in the folder
  quit";

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Next,
    Prev,
    Jump(usize),
    First,
    Last,
    Open(PathBuf),
    Copy(PathBuf),
    Move(PathBuf),
    Delete,
    Undo,
    Info,
    List,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let path_arg = |name: &str| {
            if rest.is_empty() {
                Err(ParseError(format!("usage: {} DIR", name)))
            } else {
                Ok(PathBuf::from(rest))
            }
        };

        match word.to_ascii_lowercase().as_str() {
            "next" | "n" => Ok(Command::Next),
            "prev" | "p" => Ok(Command::Prev),
            "first" => Ok(Command::First),
            "last" => Ok(Command::Last),
            "jump" | "j" => rest
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(Command::Jump)
                .ok_or_else(|| ParseError("usage: jump N (N starts at 1)".to_string())),
            "open" => path_arg("open").map(Command::Open),
            "copy" | "cp" => path_arg("copy").map(Command::Copy),
            "move" | "mv" => path_arg("move").map(Command::Move),
            "delete" | "del" | "rm" => Ok(Command::Delete),
            "undo" | "u" => Ok(Command::Undo),
            "info" | "i" => Ok(Command::Info),
            "list" | "ls" => Ok(Command::List),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            "" => Err(ParseError(String::new())),
            other => Err(ParseError(format!("unknown command '{}' (try 'help')", other))),
        }
    }
}

/// Run the command loop until `quit` or end of input
pub fn run(session: &'static Session, start: PathBuf) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(command_loop(session, start))
}

async fn command_loop(session: &'static Session, start: PathBuf) -> Result<()> {
    execute(session, Command::Open(start)).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => execute(session, command).await,
            Err(e) if e.0.is_empty() => {}
            Err(e) => println!("{}", e),
        }
    }

    tracing::info!("Command loop finished");
    Ok(())
}

async fn execute(session: &Session, command: Command) {
    tracing::debug!(?command, "Executing");

    let result: Result<(), AppError> = match command {
        Command::Next => show_moved(session, session.next()).await,
        Command::Prev => show_moved(session, session.previous()).await,
        Command::First => show_moved(session, session.first()).await,
        Command::Last => show_moved(session, session.last()).await,
        Command::Jump(n) => match session.jump_to(n - 1) {
            Some(entry) => show_moved(session, Some(entry)).await,
            None => {
                println!("no file {} (folder has {})", n, session.with_navigator(|nav| nav.len()));
                Ok(())
            }
        },
        Command::Open(path) => open(session, path).await,
        Command::Copy(dir) => session.copy_current(&dir).map(|target| {
            println!("copied to {}", target.display());
        }),
        Command::Move(dir) => match session.move_current(&dir) {
            Ok(target) => {
                println!("moved to {}", target.display());
                show_active(session).await;
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Delete => match session.delete_current() {
            Ok(path) => {
                println!("deleted {}", path.display());
                show_active(session).await;
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Undo => match session.undo() {
            Ok(record) => {
                println!("undid {}", record.describe());
                show_active(session).await;
                Ok(())
            }
            Err(e) => Err(e),
        },
        Command::Info => {
            print_info(session);
            Ok(())
        }
        Command::List => {
            print_list(session);
            Ok(())
        }
        Command::Help => {
            println!("{}", HELP);
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    if let Err(e) = result {
        if !e.is_recoverable() {
            tracing::error!("{}", e);
        }
        println!("error: {}", e.user_message());
    }
}

async fn open(session: &Session, path: PathBuf) -> Result<(), AppError> {
    let count = if path.is_file() {
        session.open_file(&path)?
    } else {
        session.open_folder(&path)?
    };
    println!("{}: {} media files", path.display(), count);
    show_active(session).await;
    Ok(())
}

async fn show_moved(session: &Session, entry: Option<ActiveEntry>) -> Result<(), AppError> {
    if entry.is_none() {
        return Err(AppError::NoActiveEntry);
    }
    show_active(session).await;
    Ok(())
}

/// Print the file under the cursor and its artifact (or the placeholder)
async fn show_active(session: &Session) {
    let Some(entry) = session.active() else {
        println!("(folder is empty)");
        return;
    };
    let summary = match session.await_active().await {
        Some(artifact) => artifact.summary(),
        None => "load cancelled".to_string(),
    };
    println!(
        "[{}] {} ({}) {}",
        entry.position,
        entry.name,
        format_size(entry.size_bytes),
        summary
    );
}

fn print_info(session: &Session) {
    match session.active() {
        Some(entry) => println!("{} [{}] {}", entry.path.display(), entry.position, entry.kind),
        None => println!("no file selected"),
    }

    let stats = session.cache_stats();
    let budget = session.cache().budget();
    println!(
        "cache: {}/{} entries ({} loading), {} / {}, {} hits, {} misses, {} evictions",
        stats.entries,
        budget.max_entries,
        stats.pending,
        format_size(stats.memory_bytes as u64),
        format_size(budget.max_memory_bytes as u64),
        stats.hits,
        stats.misses,
        stats.evictions
    );
    if stats.inconsistencies > 0 {
        println!("cache repaired {} inconsistent entries", stats.inconsistencies);
    }
    println!(
        "undo: {} operation(s) available",
        session.undo_depth()
    );
}

fn print_list(session: &Session) {
    session.with_navigator(|nav| {
        let counts = nav.classify_all();
        let mut parts: Vec<String> = MediaKind::ALL
            .iter()
            .filter_map(|kind| counts.get(kind).map(|n| format!("{} {}", n, kind)))
            .collect();
        if parts.is_empty() {
            parts.push("nothing".to_string());
        }
        println!("{}", parts.join(", "));

        for (i, entry) in nav.entries().iter().enumerate() {
            let marker = if nav.cursor() == Some(i) { '>' } else { ' ' };
            println!("{} {:>4} {}  {}", marker, i + 1, entry.name(), format_size(entry.size_bytes()));
        }
    });
}

/// Format file size for display
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
