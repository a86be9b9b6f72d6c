//! Line-oriented prompts that give way to Ctrl-C.

use anyhow::Result;
use std::future::Future;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

pub enum Input {
    Line(String),
    Eof,
    Interrupted,
}

pub struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    pub fn stdin() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Print `question` and wait for one line, EOF or Ctrl-C.
    pub async fn ask(&mut self, question: &str) -> Result<Input> {
        print!("{question} ");
        std::io::stdout().flush()?;

        tokio::select! {
            line = self.lines.next_line() => Ok(match line? {
                Some(line) => Input::Line(line.trim().to_string()),
                None => Input::Eof,
            }),
            _ = tokio::signal::ctrl_c() => {
                println!();
                Ok(Input::Interrupted)
            }
        }
    }
}

/// Run `fut` unless Ctrl-C arrives first, in which case `fut` is dropped
/// and `None` is returned.
pub async fn interruptible<F: Future>(fut: F) -> Option<F::Output> {
    or_cancel(fut, tokio::signal::ctrl_c()).await
}

/// Run `fut` unless `cancel` completes first. `fut` is dropped on cancel.
pub async fn or_cancel<F: Future, C: Future>(fut: F, cancel: C) -> Option<F::Output> {
    tokio::select! {
        out = fut => Some(out),
        _ = cancel => None,
    }
}
