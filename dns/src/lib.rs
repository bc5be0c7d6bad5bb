//! DNS wire encode/decode plus the text-file input formats the engine reads from.

pub mod input;
pub mod wire;

pub use input::{canonicalize, read_resolvers, Domains, Source};
pub use wire::{encode_query, parse_message, parse_type_name, type_name, Flags, Header, Message, Opcode, Rcode, Record, WireError};
