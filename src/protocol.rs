use thiserror::Error;

use crate::game::GameRules;

pub const TERMINATOR: u8 = b'\n';

/// Longest line a client may send, terminator included.
pub const MAX_LINE_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid number")]
    InvalidInput,
}

/// Parses one line of client input into a guess.
///
/// Only bytes up to the first terminator are inspected. A buffer with no
/// terminator at all is rejected.
pub fn parse_guess(buf: &[u8]) -> Result<u32, ParseError> {
    if buf.first() == Some(&TERMINATOR) {
        return Err(ParseError::InvalidInput);
    }

    let mut num: u32 = 0;

    for &b in buf {
        if b == TERMINATOR {
            return Ok(num);
        }

        if !b.is_ascii_digit() {
            return Err(ParseError::InvalidInput);
        }

        num = num
            .checked_mul(10)
            .and_then(|n| n.checked_add(u32::from(b - b'0')))
            .ok_or(ParseError::InvalidInput)?;
    }

    Err(ParseError::InvalidInput)
}

pub fn welcome(rules: &GameRules) -> String {
    format!(
        "Welcome to the guessing game!\n\
         Guess a number between {} and {} (Both ends are included)\n\
         You only have {} guesses!\n\n",
        rules.low, rules.high, rules.budget
    )
}

pub fn prompt(n: u32) -> String {
    format!("Guess {} => ", n)
}

pub const TOO_HIGH: &str = "Not correct. Your guess is too high.\n";
pub const TOO_LOW: &str = "Not correct. Your guess is too low.\n";
pub const CORRECT: &str = "Correct!!! See you later...\n";
pub const FAILED: &str = "You failed!\nSee you later...\n";
pub const IDLE: &str = "Idle for too long. See you later...\n";
