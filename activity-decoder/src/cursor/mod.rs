//! Sequential readers shared by all format decoders
//!
//! - [`ByteCursor`] reads fixed-width integers and floats from a byte stream,
//!   tracking the absolute position so decoders can report offsets.
//! - [`MarkupCursor`] pulls selected element subtrees out of an XML stream
//!   without building the whole document tree.

mod bytes;
mod markup;

pub use bytes::{ByteCursor, Endian};
pub use markup::{MarkupCursor, MarkupItem, XmlLeaf, XmlNode};
