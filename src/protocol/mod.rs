//! RESP Protocol Implementation
//!
//! This module implements the subset of the Redis Serialization Protocol
//! (RESP) that multikv speaks.
//!
//! ## Modules
//!
//! - `types`: The `RespValue` reply enum and its wire encoding
//! - `parser`: Async decoder for array-framed and inline requests
//!
//! ## Example
//!
//! ```ignore
//! use multikv::protocol::{RequestReader, RespValue};
//!
//! // Decoding requests from a buffered stream
//! let mut reader = RequestReader::new(buffered_stream);
//! while let Some(request) = reader.read_request().await? {
//!     println!("{} {:?}", request.name, request.args);
//! }
//!
//! // Encoding replies
//! let bytes = RespValue::bulk_string("Ariz").serialize();
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{DecodeError, Framing, ParseError, ParseResult, Request, RequestReader};
pub use types::RespValue;
