//! Transcript output for the demo commands.
//!
//! Each line carries the side that produced it, so the two engines'
//! progress reads as one conversation over the relay.

use colored::{ColoredString, Colorize};
use std::fmt::Display;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Dapp,
    Wallet,
    Relay,
}

impl Side {
    fn tag(self) -> ColoredString {
        match self {
            Side::Dapp => "dapp  ".magenta().bold(),
            Side::Wallet => "wallet".cyan().bold(),
            Side::Relay => "relay ".dimmed(),
        }
    }
}

/// Numbered heading for one protocol step.
pub fn step(number: usize, title: &str) {
    println!("\n{} {}", format!("[{}]", number).dimmed(), title.bold());
}

/// Heading for single-shot commands.
pub fn heading(title: &str) {
    println!("{}", title.bold().underline());
}

pub fn said(side: Side, message: impl Display) {
    println!("  {} {}", side.tag(), message);
}

pub fn ok(side: Side, message: impl Display) {
    println!("  {} {} {}", side.tag(), "ok".green().bold(), message);
}

/// The peer answered with a protocol error.
pub fn refused(side: Side, code: i32, message: &str) {
    println!(
        "  {} {} {}",
        side.tag(),
        format!("refused {}", code).yellow().bold(),
        message
    );
}

pub fn failed(message: impl Display) {
    eprintln!("{} {}", "error:".red().bold(), message);
}

/// Indented `name value` row under the current step.
pub fn field(name: &str, value: impl Display) {
    println!("      {:<16} {}", name.dimmed(), value);
}

pub fn json(value: &serde_json::Value) {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    for line in text.lines() {
        println!("      {}", line);
    }
}

/// Topics and keys are 64 hex characters; show both ends.
pub fn short(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 16 {
        return id.to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 8..].iter().collect();
    format!("{}..{}", head, tail)
}
