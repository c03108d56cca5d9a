use anyhow::Result;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tracing::debug;

use crate::game::GameRules;
use crate::protocol::{self, MAX_LINE_LEN, TERMINATOR, parse_guess};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Won { guesses: u32 },
    Exhausted,
    /// Client went away: end-of-stream, reset or broken pipe.
    Disconnected,
    IdleTimeout,
    /// Forced close from outside the session.
    Closed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Won { guesses } => write!(f, "won after {} guesses", guesses),
            Outcome::Exhausted => f.write_str("exhausted"),
            Outcome::Disconnected => f.write_str("disconnected"),
            Outcome::IdleTimeout => f.write_str("idle timeout"),
            Outcome::Closed => f.write_str("closed"),
        }
    }
}

enum Line {
    Complete,
    Overlong,
    Eof,
}

pub struct Session<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    rules: GameRules,
    secret: u32,
    guesses: u32,
    idle_timeout: Option<Duration>,
}

impl<S: AsyncRead + AsyncWrite> Session<S> {
    pub fn new(stream: S, rules: GameRules) -> Self {
        let secret = rules.draw_secret();

        Self::with_secret(stream, rules, secret)
    }

    pub fn with_secret(stream: S, rules: GameRules, secret: u32) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        Self {
            reader: BufReader::new(reader),
            writer,
            rules,
            secret,
            guesses: 1,
            idle_timeout: None,
        }
    }

    pub fn idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.idle_timeout = limit;
        self
    }

    /// Runs the guess loop to completion. Consuming `self` means the
    /// connection is closed when this returns.
    pub async fn run(mut self) -> Result<Outcome> {
        match self.play().await {
            Ok(outcome) => Ok(outcome),
            Err(e) if is_disconnect(&e) => Ok(Outcome::Disconnected),
            Err(e) => Err(e.into()),
        }
    }

    async fn play(&mut self) -> io::Result<Outcome> {
        let welcome = protocol::welcome(&self.rules);
        self.writer.write_all(welcome.as_bytes()).await?;

        let mut buf = Vec::with_capacity(MAX_LINE_LEN);

        while self.guesses <= self.rules.budget {
            let prompt = protocol::prompt(self.guesses);
            self.writer.write_all(prompt.as_bytes()).await?;

            let read = match self.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, self.read_line(&mut buf))
                    .await
                    .ok(),
                None => Some(self.read_line(&mut buf).await),
            };

            let line = match read {
                Some(line) => line?,
                None => {
                    self.writer.write_all(protocol::IDLE.as_bytes()).await?;
                    return Ok(Outcome::IdleTimeout);
                }
            };

            let parsed = match line {
                Line::Eof => return Ok(Outcome::Disconnected),
                Line::Overlong => Err(protocol::ParseError::InvalidInput),
                Line::Complete => parse_guess(&buf),
            };

            let guess = match parsed {
                Ok(n) => n,
                Err(e) => {
                    // Does not use up a guess.
                    self.writer.write_all(format!("{}\n", e).as_bytes()).await?;
                    continue;
                }
            };

            debug!(attempt = self.guesses, guess, "guess received");

            if guess > self.secret {
                self.writer.write_all(protocol::TOO_HIGH.as_bytes()).await?;
            } else if guess < self.secret {
                self.writer.write_all(protocol::TOO_LOW.as_bytes()).await?;
            } else {
                self.writer.write_all(protocol::CORRECT.as_bytes()).await?;
                return Ok(Outcome::Won {
                    guesses: self.guesses,
                });
            }

            self.guesses += 1;
        }

        self.writer.write_all(protocol::FAILED.as_bytes()).await?;

        Ok(Outcome::Exhausted)
    }

    /// Reads one line of at most `MAX_LINE_LEN` bytes into `buf`. Longer
    /// lines are drained up to their terminator and reported as overlong.
    async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<Line> {
        buf.clear();

        let n = (&mut self.reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(TERMINATOR, buf)
            .await?;

        if n == 0 {
            return Ok(Line::Eof);
        }
        if buf.last() == Some(&TERMINATOR) {
            return Ok(Line::Complete);
        }
        if n < MAX_LINE_LEN {
            // Stream ended in the middle of a line.
            return Ok(Line::Eof);
        }

        let mut skipped = Vec::with_capacity(MAX_LINE_LEN);
        loop {
            skipped.clear();

            let n = (&mut self.reader)
                .take(MAX_LINE_LEN as u64)
                .read_until(TERMINATOR, &mut skipped)
                .await?;

            if n == 0 {
                return Ok(Line::Eof);
            }
            if skipped.last() == Some(&TERMINATOR) {
                return Ok(Line::Overlong);
            }
        }
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
