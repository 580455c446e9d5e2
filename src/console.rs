//! Operator console: prompt loops and command parsing

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::command::{CommandRouter, RouterError};
use crate::session::SessionRegistry;

/// Tokens that leave a per-session sub-prompt (case-insensitive)
const RETURN_COMMANDS: [&str; 2] = ["back", "return"];

/// Parsed operator input at the main prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    List,
    Select(u64),
    BadSelect,
    All,
    Quit,
    Empty,
    Unknown,
}

/// Parse one main-prompt line. Keywords are case-insensitive.
pub fn parse_input(line: &str) -> ConsoleInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ConsoleInput::Empty;
    }

    let lower = trimmed.to_ascii_lowercase();
    match lower.as_str() {
        "list" => ConsoleInput::List,
        "all" => ConsoleInput::All,
        "quit" => ConsoleInput::Quit,
        _ => {
            if let Some(rest) = lower.strip_prefix("select") {
                match rest.split_whitespace().next() {
                    Some(arg) => arg
                        .parse::<u64>()
                        .map(ConsoleInput::Select)
                        .unwrap_or(ConsoleInput::BadSelect),
                    None => ConsoleInput::BadSelect,
                }
            } else {
                ConsoleInput::Unknown
            }
        }
    }
}

fn is_return_command(cmd: &str) -> bool {
    RETURN_COMMANDS.iter().any(|r| cmd.eq_ignore_ascii_case(r))
}

fn print_banner() {
    println!("\n{}", "=".repeat(50));
    println!("Available commands:");
    println!("list        - List connected clients");
    println!("select <id> - Select a specific client");
    println!("all         - Send a command to all clients");
    println!("quit        - Close all sessions and exit");
    println!("{}", "=".repeat(50));
}

/// The single thread of operator control.
///
/// Blocks only on console input and on the bounded response windows, never
/// on a session socket.
pub struct Console {
    router: CommandRouter,
    registry: Arc<SessionRegistry>,
}

impl Console {
    /// Create the console over the shared registry
    pub fn new(router: CommandRouter, registry: Arc<SessionRegistry>) -> Self {
        Self { router, registry }
    }

    /// Run the main prompt until `quit` or end of input
    pub async fn run(self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        print_banner();

        loop {
            let Some(line) = prompt(&mut lines, ">>> ").await? else {
                break;
            };

            match parse_input(&line) {
                ConsoleInput::Quit => break,
                ConsoleInput::List => self.print_listing().await,
                ConsoleInput::Select(id) => match self.router.validate_target(id).await {
                    Ok(()) => {
                        self.select_loop(id, &mut lines).await?;
                        print_banner();
                    }
                    Err(e) => println!("[-] {}", e),
                },
                ConsoleInput::BadSelect => println!("[-] Invalid client id"),
                ConsoleInput::All => self.broadcast_flow(&mut lines).await?,
                ConsoleInput::Empty => {}
                ConsoleInput::Unknown => {
                    println!("[-] Unknown command");
                    print_banner();
                }
            }
        }

        Ok(())
    }

    async fn print_listing(&self) {
        let sessions = self.router.list().await;
        if sessions.is_empty() {
            println!("\nNo clients connected");
            return;
        }

        println!("\nConnected clients:");
        for (id, addr) in sessions {
            println!("Client {}: {}", id, addr);
        }
    }

    /// Per-session sub-prompt: forward lines verbatim until a return token
    async fn select_loop(&self, id: u64, lines: &mut Lines<BufReader<Stdin>>) -> Result<()> {
        println!("\n[*] Sending commands to client {}", id);
        println!("Type 'back' or 'return' to return to the main prompt");

        loop {
            let Some(line) = prompt(lines, &format!("Client {} >>> ", id)).await? else {
                return Ok(());
            };
            let cmd = line.trim();
            if cmd.is_empty() {
                continue;
            }
            if is_return_command(cmd) {
                return Ok(());
            }

            match self.router.dispatch_one(id, cmd).await {
                Ok(0) => println!("[-] No response received from client"),
                Ok(_) => {}
                Err(e) => println!("[-] {}", e),
            }
        }
    }

    /// Broadcast flow: sweep, bail out if nobody is connected, otherwise
    /// prompt once for the command text
    async fn broadcast_flow(&self, lines: &mut Lines<BufReader<Stdin>>) -> Result<()> {
        self.registry.remove_disconnected().await;
        if self.registry.count().await == 0 {
            println!("[-] No connected clients");
            return Ok(());
        }

        println!("\n[*] Sending command to all clients");
        let Some(line) = prompt(lines, "All clients >>> ").await? else {
            return Ok(());
        };
        let cmd = line.trim();
        if cmd.is_empty() {
            return Ok(());
        }

        match self.router.dispatch_all(cmd).await {
            Ok(0) => println!("[-] No responses received from clients"),
            Ok(_) => {}
            Err(RouterError::NoSessions) => println!("[-] No connected clients"),
            Err(e) => println!("[-] {}", e),
        }
        Ok(())
    }
}

/// Print a prompt and read one line; None means end of input
async fn prompt(lines: &mut Lines<BufReader<Stdin>>, text: &str) -> Result<Option<String>> {
    print!("\n{}", text);
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?)
}
