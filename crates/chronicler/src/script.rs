/// Line-oriented edit scripts.
use std::io::{BufRead, Write};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chronicler_history::{BlockToken, History};

use crate::document::Document;

/// One script line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { key: String, value: f64 },
    Drag { key: String, value: f64 },
    Batch { name: String, assignments: Vec<(String, f64)> },
    Undo,
    Redo,
    Goto(isize),
    List,
    Show(Option<String>),
    Clear,
    Wait(u64),
    Block,
    Release,
}

fn parse_value(raw: Option<&str>, what: &str) -> Result<f64> {
    let raw = raw.ok_or_else(|| anyhow!("missing {what}"))?;
    raw.parse::<f64>()
        .with_context(|| format!("invalid {what}: {raw:?}"))
}

fn parse_assignment(raw: &str) -> Result<(String, f64)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got {raw:?}"))?;
    Ok((key.to_string(), parse_value(Some(value), "value")?))
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let command = match verb {
            "set" | "drag" => {
                let key = words
                    .next()
                    .ok_or_else(|| anyhow!("missing key"))?
                    .to_string();
                let value = parse_value(words.next(), "value")?;
                if verb == "set" {
                    Command::Set { key, value }
                } else {
                    Command::Drag { key, value }
                }
            }
            "batch" => {
                let name = words
                    .next()
                    .ok_or_else(|| anyhow!("missing batch name"))?
                    .to_string();
                let assignments = words.by_ref().map(parse_assignment).collect::<Result<_>>()?;
                Command::Batch { name, assignments }
            }
            "undo" => Command::Undo,
            "redo" => Command::Redo,
            "goto" => {
                let raw = words.next().ok_or_else(|| anyhow!("missing index"))?;
                Command::Goto(raw.parse::<isize>().with_context(|| format!("invalid index: {raw:?}"))?)
            }
            "list" => Command::List,
            "show" => Command::Show(words.next().map(str::to_string)),
            "clear" => Command::Clear,
            "wait" => {
                let raw = words.next().ok_or_else(|| anyhow!("missing milliseconds"))?;
                Command::Wait(raw.parse::<u64>().with_context(|| format!("invalid milliseconds: {raw:?}"))?)
            }
            "block" => Command::Block,
            "release" => Command::Release,
            other => bail!("unknown command {other:?}"),
        };
        if let Some(extra) = words.next() {
            bail!("unexpected argument {extra:?}");
        }
        Ok(command)
    }
}

/// Parses a script line; blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    line.parse().map(Some)
}

/// Runs commands against one document and its history, writing output to `out`.
pub struct Session<W: Write> {
    history: History,
    document: Document,
    blocks: Vec<BlockToken>,
    out: W,
}

impl<W: Write> Session<W> {
    pub fn new(history: History, out: W) -> Self {
        Self {
            document: Document::new(history.clone()),
            history,
            blocks: Vec::new(),
            out,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Runs every line of `input`. Bad lines and failed commands are
    /// reported on `out` and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if reading input or writing output fails.
    pub fn run(&mut self, input: impl BufRead) -> Result<()> {
        for (number, line) in input.lines().enumerate() {
            let line = line.context("Failed to read script line")?;
            let outcome = parse_line(&line).and_then(|command| match command {
                Some(command) => self.execute(command),
                None => Ok(()),
            });
            if let Err(e) = outcome {
                tracing::warn!("Line {}: {e:#}", number + 1);
                writeln!(self.out, "error on line {}: {e:#}", number + 1)?;
            }
        }
        Ok(())
    }

    pub fn execute(&mut self, command: Command) -> Result<()> {
        tracing::debug!("Executing {command:?}");
        match command {
            Command::Set { key, value } => self.document.set(&key, value)?,
            Command::Drag { key, value } => self.document.drag(&key, value)?,
            Command::Batch { name, assignments } => self.document.batch(&name, &assignments)?,
            Command::Undo => {
                if !self.history.undo()? {
                    writeln!(self.out, "nothing to undo")?;
                }
            }
            Command::Redo => {
                if !self.history.redo()? {
                    writeln!(self.out, "nothing to redo")?;
                }
            }
            Command::Goto(index) => self.history.goto(index)?,
            Command::List => self.print_list()?,
            Command::Show(key) => self.print_values(key.as_deref())?,
            Command::Clear => self.history.clear()?,
            Command::Wait(ms) => {
                std::thread::sleep(Duration::from_millis(ms));
                self.history.tick();
            }
            Command::Block => self.blocks.push(self.history.block_saving()),
            Command::Release => {
                let token = self
                    .blocks
                    .pop()
                    .ok_or_else(|| anyhow!("no block to release"))?;
                self.history.release_block(token);
            }
        }
        Ok(())
    }

    fn print_list(&mut self) -> Result<()> {
        for item in self.history.list() {
            let marker = if item.executed { '*' } else { ' ' };
            writeln!(self.out, "{marker} {:>3} {}", item.index, item.name)?;
        }
        Ok(())
    }

    fn print_values(&mut self, key: Option<&str>) -> Result<()> {
        match key {
            Some(key) => match self.document.get(key) {
                Some(value) => writeln!(self.out, "{key} = {value}")?,
                None => writeln!(self.out, "{key} is unset")?,
            },
            None => {
                for (key, value) in self.document.snapshot() {
                    writeln!(self.out, "{key} = {value}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(script: &str) -> (String, Session<Vec<u8>>) {
        let mut session = Session::new(History::default(), Vec::new());
        session.run(script.as_bytes()).expect("run");
        let out = String::from_utf8(session.out.clone()).expect("utf8");
        (out, session)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_line("set x 1.5").unwrap(),
            Some(Command::Set {
                key: "x".to_string(),
                value: 1.5
            })
        );
        assert_eq!(
            parse_line("batch move x=1 y=2").unwrap(),
            Some(Command::Batch {
                name: "move".to_string(),
                assignments: vec![("x".to_string(), 1.0), ("y".to_string(), 2.0)],
            })
        );
        assert_eq!(parse_line("goto -1").unwrap(), Some(Command::Goto(-1)));
        assert_eq!(parse_line("  # comment").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("set x").is_err());
        assert!(parse_line("set x abc").is_err());
        assert!(parse_line("batch g x").is_err());
        assert!(parse_line("undo now").is_err());
        assert!(parse_line("frobnicate").is_err());
    }

    #[test]
    fn test_script_undo_and_list() {
        let (out, session) = run("set x 1\nset y 2\nundo\nlist\n");
        assert_eq!(out, "*   0 set x\n    1 set y\n");
        assert_eq!(session.document().get("y"), None);
    }

    #[test]
    fn test_script_reports_errors_and_continues() {
        let (out, session) = run("bogus\nset x 3\nredo\nshow\n");
        assert!(out.starts_with("error on line 1:"));
        assert!(out.contains("nothing to redo"));
        assert!(out.ends_with("x = 3\n"));
        assert_eq!(session.document().get("x"), Some(3.0));
    }

    #[test]
    fn test_script_block_suppresses_history() {
        let (out, session) = run("block\nset x 1\nrelease\nlist\n");
        assert!(out.is_empty());
        assert_eq!(session.document().get("x"), Some(1.0));
        assert!(session.history.is_empty());
    }

    #[test]
    fn test_script_batch_and_goto() {
        let (out, _session) = run("set a 1\nbatch pair b=2 c=3\ngoto 0\nlist\nshow\n");
        assert_eq!(out, "*   0 set a\n    3 pair\na = 1\n");
    }

    #[test]
    fn test_show_single_key() {
        let (out, _session) = run("set x 2\nshow x\nundo\nshow x\n");
        assert_eq!(out, "x = 2\nx is unset\n");
    }

    #[test]
    fn test_release_without_block_is_error() {
        let (out, _session) = run("release\n");
        assert!(out.contains("no block to release"));
    }
}
