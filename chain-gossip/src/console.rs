//! Operator console.
//!
//! Each input line is either the local `--print` command or content to
//! append. Appends go through [`SharedChain::append`], which also pushes the
//! new chain to every session. Chains adopted from peers are rendered as
//! they arrive.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::broadcast::error::RecvError,
};
use tracing::{debug, info};

use crate::{
    chain::Chain,
    state::{ChainEvent, SharedChain, StateError},
};

pub const PRINT_COMMAND: &str = "--print";
const PROMPT: &str = "> ";
const GREEN: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Show the content of every block. No network effect.
    Print,
    /// Append the line as a new block.
    Append(String),
}

impl ConsoleCommand {
    /// Parses one line of operator input. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }
        if line.trim() == PRINT_COMMAND {
            return Some(ConsoleCommand::Print);
        }
        Some(ConsoleCommand::Append(line.to_string()))
    }
}

/// One tab-indented line per block content.
pub fn render_contents(chain: &Chain) -> String {
    let mut out = String::new();
    for block in chain.blocks() {
        let _ = writeln!(out, "\t{}", block.content);
    }
    out
}

/// Index and content of every block, shown after a local append.
pub fn render_index(chain: &Chain) -> String {
    let mut out = String::new();
    for block in chain.blocks() {
        let _ = writeln!(out, "Index: {},\tContent: {}", block.index, block.content);
    }
    out
}

/// Indented JSON of a chain received from a peer, in green.
pub fn render_adopted(chain: &Chain) -> Result<String> {
    let json = serde_json::to_string_pretty(chain).context("failed to render chain")?;
    Ok(format!("{GREEN}{json}{RESET}\n"))
}

/// Runs the console until input reaches EOF.
pub async fn run_console<R, W>(input: R, mut output: W, state: &SharedChain) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut events = state.subscribe();
    write_out(&mut output, PROMPT).await?;

    loop {
        select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read operator input")? else {
                    debug!("operator input closed");
                    return Ok(());
                };
                handle_line(&line, &mut output, state).await?;
                write_out(&mut output, PROMPT).await?;
            }
            event = events.recv() => match event {
                Ok(ChainEvent::Adopted { chain }) => {
                    write_out(&mut output, &render_adopted(&chain)?).await?;
                    write_out(&mut output, PROMPT).await?;
                }
                Ok(ChainEvent::Appended { .. }) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

async fn handle_line<W>(line: &str, output: &mut W, state: &SharedChain) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match ConsoleCommand::parse(line) {
        None => Ok(()),
        Some(ConsoleCommand::Print) => match state.snapshot().await {
            Some(chain) => write_out(output, &render_contents(&chain)).await,
            None => write_out(output, "*** no chain yet\n").await,
        },
        Some(ConsoleCommand::Append(content)) => match state.append(&content).await {
            Ok(chain) => {
                write_out(output, &render_index(&chain)).await?;
                info!(len = chain.len(), "writing to peers");
                Ok(())
            }
            Err(error @ (StateError::NoChain | StateError::Chain(_))) => {
                write_out(output, &format!("!!! {error}\n")).await
            }
            Err(error) => Err(error.into()),
        },
    }
}

async fn write_out<W>(output: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    output
        .write_all(text.as_bytes())
        .await
        .context("failed to write to console")?;
    output.flush().await.context("failed to flush console")
}
