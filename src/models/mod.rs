//! Data models shared across the crate.

pub mod command;
pub mod connection;
pub mod paging;
pub mod table;
pub mod value;

pub use command::*;
pub use connection::*;
pub use paging::*;
pub use table::*;
pub use value::*;
