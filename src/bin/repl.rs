//! Interactive client for an rvm server.
//!
//! # Usage
//! ```text
//! rvm-repl [server_addr]
//! ```
//!
//! Connects to `server_addr` (default `127.0.0.1:8080`) and reads commands
//! from stdin. `merge` and `insert` switch to an input mode that collects one
//! instruction per line (`<mnemonic> [dest] [arg1] [arg2]`) until `done`.

use rvm::network::client::Client;
use rvm::virtual_machine::isa::Instruction;
use rvm::virtual_machine::vm::memory::MEMORY_SIZE;
use std::env;
use std::io::Write;
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

const DEFAULT_SERVER: &str = "127.0.0.1:8080";
const DEFAULT_DUMP_WORDS: usize = 16;
const WORDS_PER_LINE: usize = 8;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Merge,
    Insert(u64),
    Get,
    Exec,
    Reset,
    Delete(u32, u32),
    Dump(usize),
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("merge", []) => Command::Merge,
        ("insert", [start]) => Command::Insert(number(start)?),
        ("get", []) => Command::Get,
        ("exec", []) => Command::Exec,
        ("reset", []) => Command::Reset,
        ("delete", [start, end]) => Command::Delete(number(start)?, number(end)?),
        ("dump", []) => Command::Dump(DEFAULT_DUMP_WORDS),
        ("dump", [count]) => Command::Dump(number::<usize>(count)?.min(MEMORY_SIZE)),
        ("help", []) => Command::Help,
        ("quit" | "exit", []) => Command::Quit,
        (
            "merge" | "insert" | "get" | "exec" | "reset" | "delete" | "dump" | "help" | "quit"
            | "exit",
            _,
        ) => return Err(format!("wrong arguments for '{name}', try 'help'")),
        _ => return Err(format!("unknown command '{name}', try 'help'")),
    };
    Ok(Some(command))
}

fn number<T: std::str::FromStr>(word: &str) -> Result<T, String> {
    word.parse().map_err(|_| format!("not a number: {word}"))
}

fn prompt(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

/// Collects instructions until `done`. Returns `None` if stdin closes first.
async fn read_instructions(lines: &mut Lines<BufReader<Stdin>>) -> Option<Vec<Instruction>> {
    let mut insts = Vec::new();
    loop {
        prompt("> ");
        let line = lines.next_line().await.ok()??;
        let line = line.trim();
        if line.eq_ignore_ascii_case("done") {
            return Some(insts);
        }
        if line.is_empty() {
            continue;
        }
        match line.parse::<Instruction>() {
            Ok(inst) => insts.push(inst),
            Err(err) => eprintln!("not a valid instruction: {err}"),
        }
    }
}

fn print_memory(words: &[i32]) {
    for (row, chunk) in words.chunks(WORDS_PER_LINE).enumerate() {
        let cells: Vec<String> = chunk.iter().map(|w| format!("{w:>11}")).collect();
        println!("[{:#06x}]: {}", row * WORDS_PER_LINE, cells.join(" "));
    }
}

const HELP: &str = "\
Commands:
    merge                  Enter instructions, then append them to the remote program
    insert <start>         Enter instructions, then insert them before index <start>
    get                    Print the remote program
    exec                   Run the remote program
    reset                  Clear the remote program and registers
    delete <start> <end>   Delete instructions <start> through <end> (inclusive)
    dump [n]               Print the first [n] memory words (default: 16)
    help                   Print this message
    quit                   Leave

Instructions are written as <mnemonic> [dest] [arg1] [arg2]; missing operands are 0.

Example:
    $ merge
    > movi 0 69420
    > done
    $ exec
    $ dump 1
    [0x0000]:       69420
";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.iter().skip(1).any(|arg| arg == "--help" || arg == "-h") {
        let program = args.first().map_or("rvm-repl", String::as_str);
        eprintln!("usage: {program} [server_addr]");
        process::exit(0);
    }
    let server = args.get(1).map(String::as_str).unwrap_or(DEFAULT_SERVER);

    let mut client = match Client::connect(server).await {
        Ok(client) => client,
        Err(err) => {
            eprintln!("failed to connect to {server}: {err}");
            process::exit(1);
        }
    };
    println!("connected to {server}, type 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt("$ ");
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                eprintln!("failed to read stdin: {err}");
                break;
            }
        };

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(msg) => {
                eprintln!("{msg}");
                continue;
            }
        };

        let outcome = match command {
            Command::Merge => {
                let Some(insts) = read_instructions(&mut lines).await else {
                    break;
                };
                client
                    .merge_all(&insts)
                    .await
                    .map(|()| println!("merged {} instruction(s)", insts.len()))
            }
            Command::Insert(start) => {
                let Some(insts) = read_instructions(&mut lines).await else {
                    break;
                };
                client
                    .insert(start, &insts)
                    .await
                    .map(|()| println!("inserted {} instruction(s) at {start}", insts.len()))
            }
            Command::Get => client.get_all().await.map(|program| {
                for (index, inst) in program.iter().enumerate() {
                    println!("[{index:#06x}]: {inst}");
                }
            }),
            Command::Exec => client.exec().await.map(|()| println!("execution started")),
            Command::Reset => client.reset().await.map(|()| println!("program cleared")),
            Command::Delete(start, end) => client
                .delete(start, end)
                .await
                .map(|removed| println!("deleted {removed} instruction(s)")),
            Command::Dump(count) => client.dump(count).await.map(|words| print_memory(&words)),
            Command::Help => {
                print!("{HELP}");
                Ok(())
            }
            Command::Quit => break,
        };

        if let Err(err) = outcome {
            eprintln!("{err}");
            if matches!(err, rvm::network::client::ClientError::Io(_)) {
                process::exit(1);
            }
        }
    }
}
