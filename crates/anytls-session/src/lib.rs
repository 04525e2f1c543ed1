//! Stream multiplexer for the anytls protocol.
//!
//! A session runs over one authenticated TLS connection and carries any
//! number of logical streams. The client interleaves real frames with
//! padding so early packets match the installed padding scheme; the server
//! answers heartbeats, pushes scheme updates, and hands each opened stream
//! to a caller-supplied handler.
//!
//! The server consumes [`ServerSession`], [`Stream`], [`DestAddr`] and the
//! padding-scheme installer; the [`frame`] codec is public for client
//! implementations and protocol-level tests.

mod addr;
pub mod frame;
mod padding;
mod session;
mod stream;
pub mod uot;

pub use addr::{DestAddr, UOT_MAGIC_SUFFIX};
pub use padding::{PaddingScheme, current_scheme, update_padding_scheme};
pub use session::ServerSession;
pub use stream::Stream;
