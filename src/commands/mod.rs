//! Command Dispatch Module
//!
//! Maps decoded requests onto the storage layer and produces one reply
//! per request.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ RequestReader   │  (protocol module)
//! └────────┬────────┘
//!          │  Request { name, args }
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │  - lookup       │  static name table -> Command
//! │  - arity check  │  Command::arity()
//! │  - execute      │  Result<_, CommandError>
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ SessionTable    │────>│ StorageEngine   │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! Handlers never encode errors themselves: they return a
//! [`CommandError`] and the dispatcher turns it into the error reply.
//!
//! ## Supported Commands
//!
//! - `PING [message]`, `ECHO message`, `QUIT`
//! - `SET key value`, `GET key`, `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `INCR key`, `DECR key`, `INCRBY key n`, `DECRBY key n`
//! - `SELECT index`, `MOVE key index`
//! - `RANDOMKEY`, `DBSIZE`, `FLUSHDB`, `FLUSHALL`

pub mod handler;

use crate::protocol::RespValue;
use crate::storage::CounterError;
use thiserror::Error;

// Re-export the main command handler
pub use handler::CommandHandler;

/// Whether a counter command adds or subtracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Increment,
    Decrement,
}

/// Where a counter command takes its step from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Amount {
    /// Always 1 (`INCR`, `DECR`)
    One,
    /// The second argument (`INCRBY`, `DECRBY`)
    Argument,
}

/// Every command the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Echo,
    Set,
    Get,
    Del,
    Exists,
    Counter(Direction, Amount),
    Select,
    Move,
    RandomKey,
    DbSize,
    FlushDb,
    FlushAll,
    Quit,
}

/// Lower-cased command names and what they dispatch to.
const COMMAND_TABLE: &[(&str, Command)] = &[
    ("dbsize", Command::DbSize),
    ("decr", Command::Counter(Direction::Decrement, Amount::One)),
    ("decrby", Command::Counter(Direction::Decrement, Amount::Argument)),
    ("del", Command::Del),
    ("echo", Command::Echo),
    ("exists", Command::Exists),
    ("flushall", Command::FlushAll),
    ("flushdb", Command::FlushDb),
    ("get", Command::Get),
    ("incr", Command::Counter(Direction::Increment, Amount::One)),
    ("incrby", Command::Counter(Direction::Increment, Amount::Argument)),
    ("move", Command::Move),
    ("ping", Command::Ping),
    ("quit", Command::Quit),
    ("randomkey", Command::RandomKey),
    ("select", Command::Select),
    ("set", Command::Set),
];

impl Command {
    /// Resolves a lower-cased command name.
    pub fn lookup(name: &str) -> Option<Command> {
        COMMAND_TABLE
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, command)| *command)
    }

    /// Canonical lower-case name, as used in error replies.
    pub fn name(self) -> &'static str {
        COMMAND_TABLE
            .iter()
            .find(|(_, command)| *command == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// How many arguments (excluding the command name) are accepted.
    pub fn arity(self) -> Arity {
        match self {
            Command::Ping => Arity::Range(0, 1),
            Command::Echo | Command::Get | Command::Select => Arity::Exact(1),
            Command::Set | Command::Move => Arity::Exact(2),
            Command::Del | Command::Exists => Arity::AtLeast(1),
            Command::Counter(_, Amount::One) => Arity::Exact(1),
            Command::Counter(_, Amount::Argument) => Arity::Exact(2),
            Command::RandomKey
            | Command::DbSize
            | Command::FlushDb
            | Command::FlushAll
            | Command::Quit => Arity::Exact(0),
        }
    }
}

/// Argument count contract of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::AtLeast(min) => count >= min,
        }
    }
}

/// Failures a command can report to the client.
///
/// The `Display` text is the exact error line sent on the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR DB index is out of range")]
    IndexOutOfRange,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
}

impl CommandError {
    pub fn into_reply(self) -> RespValue {
        RespValue::error(self.to_string())
    }
}

impl From<CounterError> for CommandError {
    fn from(err: CounterError) -> Self {
        match err {
            CounterError::NotAnInteger => CommandError::NotAnInteger,
            CounterError::Overflow => CommandError::Overflow,
        }
    }
}

/// What the connection should do after a command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send the reply and keep reading.
    Reply(RespValue),
    /// Send the reply, then close the connection.
    Close(RespValue),
}

impl Outcome {
    pub fn reply(&self) -> &RespValue {
        match self {
            Outcome::Reply(reply) | Outcome::Close(reply) => reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_every_table_entry() {
        for (name, command) in COMMAND_TABLE {
            assert_eq!(Command::lookup(name), Some(*command));
            assert_eq!(command.name(), *name);
        }
        assert_eq!(Command::lookup("keys"), None);
        assert_eq!(Command::lookup("GET"), None);
    }

    #[test]
    fn test_counter_variants() {
        assert_eq!(
            Command::lookup("decrby"),
            Some(Command::Counter(Direction::Decrement, Amount::Argument))
        );
        assert_eq!(Command::lookup("incr").map(Command::arity), Some(Arity::Exact(1)));
        assert_eq!(Command::lookup("incrby").map(Command::arity), Some(Arity::Exact(2)));
    }

    #[test]
    fn test_arity() {
        assert!(Arity::Range(0, 1).accepts(0));
        assert!(Arity::Range(0, 1).accepts(1));
        assert!(!Arity::Range(0, 1).accepts(2));
        assert!(Arity::AtLeast(1).accepts(5));
        assert!(!Arity::AtLeast(1).accepts(0));
        assert!(!Arity::Exact(2).accepts(1));
    }

    #[test]
    fn test_error_replies() {
        assert_eq!(
            CommandError::WrongArity("get").into_reply(),
            RespValue::error("ERR wrong number of arguments for 'get' command")
        );
        assert_eq!(
            CommandError::UnknownCommand("foo".into()).to_string(),
            "ERR unknown command 'foo'"
        );
        assert_eq!(
            CommandError::from(CounterError::NotAnInteger),
            CommandError::NotAnInteger
        );
        assert_eq!(
            CommandError::from(CounterError::Overflow),
            CommandError::Overflow
        );
    }
}
