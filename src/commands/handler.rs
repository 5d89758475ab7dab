//! Command Handler
//!
//! Executes decoded requests against the database selected by the
//! calling connection.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  lookup()   │───>│  arity()    │───>│ dispatch()  │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                              SessionTable -> StorageEngine  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use super::{Amount, Command, CommandError, Direction, Outcome};
use crate::protocol::{Request, RespValue};
use crate::session::{ConnectionId, SessionTable};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

type CommandResult = Result<RespValue, CommandError>;

/// Dispatches requests to command implementations.
///
/// Cheap to clone; every connection task holds its own copy.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    sessions: Arc<SessionTable>,
}

impl CommandHandler {
    pub fn new(sessions: Arc<SessionTable>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Executes one request on behalf of connection `conn`.
    ///
    /// Always produces exactly one reply. Unknown commands and arity
    /// violations are answered with an error reply; the connection stays
    /// usable.
    pub fn execute(&self, conn: ConnectionId, request: &Request) -> Outcome {
        let command = match Command::lookup(&request.name) {
            Some(command) => command,
            None => {
                warn!(connection = %conn, command = %request.name, "Unknown command");
                return Outcome::Reply(
                    CommandError::UnknownCommand(request.name.clone()).into_reply(),
                );
            }
        };

        if !command.arity().accepts(request.args.len()) {
            return Outcome::Reply(CommandError::WrongArity(command.name()).into_reply());
        }

        self.dispatch(conn, command, &request.args)
            .unwrap_or_else(|err| Outcome::Reply(err.into_reply()))
    }

    fn dispatch(
        &self,
        conn: ConnectionId,
        command: Command,
        args: &[Bytes],
    ) -> Result<Outcome, CommandError> {
        let reply = match command {
            Command::Ping => self.cmd_ping(args),
            Command::Echo => self.cmd_echo(args),
            Command::Set => self.cmd_set(conn, args),
            Command::Get => self.cmd_get(conn, args),
            Command::Del => self.cmd_del(conn, args),
            Command::Exists => self.cmd_exists(conn, args),
            Command::Counter(direction, amount) => {
                self.cmd_counter(conn, direction, amount, args)
            }
            Command::Select => self.cmd_select(conn, args),
            Command::Move => self.cmd_move(conn, args),
            Command::RandomKey => self.cmd_randomkey(conn),
            Command::DbSize => self.cmd_dbsize(conn),
            Command::FlushDb => self.cmd_flushdb(conn),
            Command::FlushAll => self.cmd_flushall(),
            Command::Quit => return Ok(self.cmd_quit(conn)),
        };

        reply.map(Outcome::Reply)
    }

    /// The database `conn` currently has selected.
    fn db(&self, conn: ConnectionId) -> Arc<StorageEngine> {
        self.sessions.engine_for(conn)
    }

    // ========================================================================
    // Connection Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> CommandResult {
        Ok(match args.first() {
            Some(message) => RespValue::bulk_string(message.clone()),
            None => RespValue::pong(),
        })
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> CommandResult {
        Ok(RespValue::bulk_string(args[0].clone()))
    }

    /// QUIT
    fn cmd_quit(&self, conn: ConnectionId) -> Outcome {
        self.sessions.release(conn);
        Outcome::Close(RespValue::ok())
    }

    // ========================================================================
    // Key Commands
    // ========================================================================

    /// SET key value
    fn cmd_set(&self, conn: ConnectionId, args: &[Bytes]) -> CommandResult {
        self.db(conn).set(args[0].clone(), args[1].clone());
        Ok(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, conn: ConnectionId, args: &[Bytes]) -> CommandResult {
        Ok(RespValue::from_option(self.db(conn).get(&args[0])))
    }

    /// DEL key [key ...]
    fn cmd_del(&self, conn: ConnectionId, args: &[Bytes]) -> CommandResult {
        Ok(RespValue::integer(self.db(conn).delete_many(args) as i64))
    }

    /// EXISTS key [key ...]
    ///
    /// A key named twice is counted twice.
    fn cmd_exists(&self, conn: ConnectionId, args: &[Bytes]) -> CommandResult {
        Ok(RespValue::integer(self.db(conn).exists_many(args) as i64))
    }

    /// INCR key | DECR key | INCRBY key n | DECRBY key n
    fn cmd_counter(
        &self,
        conn: ConnectionId,
        direction: Direction,
        amount: Amount,
        args: &[Bytes],
    ) -> CommandResult {
        let delta = match amount {
            Amount::One => 1,
            Amount::Argument => parse_integer(&args[1])?,
        };

        let db = self.db(conn);
        let value = match direction {
            Direction::Increment => db.incr_by(&args[0], delta)?,
            Direction::Decrement => db.decr_by(&args[0], delta)?,
        };
        Ok(RespValue::integer(value))
    }

    /// RANDOMKEY
    fn cmd_randomkey(&self, conn: ConnectionId) -> CommandResult {
        Ok(RespValue::from_option(self.db(conn).random_key()))
    }

    // ========================================================================
    // Database Commands
    // ========================================================================

    /// SELECT index
    fn cmd_select(&self, conn: ConnectionId, args: &[Bytes]) -> CommandResult {
        let index = std::str::from_utf8(&args[0]).map_err(|_| CommandError::IndexOutOfRange)?;
        if self.sessions.select(conn, index) {
            Ok(RespValue::ok())
        } else {
            Err(CommandError::IndexOutOfRange)
        }
    }

    /// MOVE key index
    ///
    /// Replies 1 if the key was moved, 0 if it is missing from the current
    /// database or already present in the destination.
    fn cmd_move(&self, conn: ConnectionId, args: &[Bytes]) -> CommandResult {
        let source = self.db(conn);
        if !source.exists(&args[0]) {
            return Ok(RespValue::integer(0));
        }

        let dest = std::str::from_utf8(&args[1])
            .ok()
            .and_then(|index| self.sessions.registry().lookup(index))
            .ok_or(CommandError::IndexOutOfRange)?;

        let moved = source.move_to(&dest, &args[0]);
        Ok(RespValue::integer(i64::from(moved)))
    }

    /// DBSIZE
    fn cmd_dbsize(&self, conn: ConnectionId) -> CommandResult {
        Ok(RespValue::integer(self.db(conn).len() as i64))
    }

    /// FLUSHDB
    fn cmd_flushdb(&self, conn: ConnectionId) -> CommandResult {
        self.db(conn).flush();
        Ok(RespValue::ok())
    }

    /// FLUSHALL
    fn cmd_flushall(&self) -> CommandResult {
        self.sessions.registry().flush_all();
        Ok(RespValue::ok())
    }
}

/// Parses a base-10 signed 64-bit argument.
fn parse_integer(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}
