//! Generic dynamic values used as the wire format between the crawl
//! engine's native records and scripted handlers.
//!
//! [`Value`] covers the set of types expressible on the Lua side (and is
//! a superset of what the record schemas need); [`Object`] is the ordered
//! string-keyed mapping that record snapshots marshal into.

mod array;
mod object;
mod value;

pub use array::Array;
pub use object::Object;
pub use value::Value;
