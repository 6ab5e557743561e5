//! # Typed Value Codec
//!
//! Schema-directed serialization for shimmer. A [`Shape`] describes the
//! layout of a value; [`encode`] and [`decode`] map a runtime [`Value`] to
//! and from a little-endian byte representation driven entirely by the
//! shape. The same codec serves the user-facing typed get/put and the
//! whole-database snapshot writer.
//!
//! ## Shape Grammar
//!
//! ```text
//! Shape ::= Void                      (zero bytes)
//!         | Bool                      (one byte, 0 or 1)
//!         | Int  { bits, signed }     (bits/8 bytes, little-endian)
//!         | Float{ bits }             (bit pattern as unsigned, LE)
//!         | Array{ len, elem }        (len consecutive element encodings)
//!         | Seq  { elem }             (8-byte LE count, then elements)
//!         | Record{ fields }          (field encodings in declaration order)
//!         | Ref  { elem }             (encoding of the referent)
//! ```
//!
//! ## Wire Format Properties
//!
//! - All scalars are little-endian; floats are written as the unsigned
//!   integer carrying their bit pattern.
//! - Sequences are length-prefixed with an 8-byte count. A sequence of
//!   unsigned bytes is written and read as one contiguous block.
//! - The encoding is self-describing only through the shape: decoding
//!   requires the same shape that produced the bytes.
//! - `decode` consumes the entire input; truncated input or trailing bytes
//!   fail with `InvalidSize`.
//!
//! ## Ownership
//!
//! Decoded values own their heap buffers outright; dropping the [`Value`]
//! releases everything. There is no separate release protocol.
//!
//! ## Unsupported Shapes
//!
//! Host-unrepresentable layouts are rejected with `InvalidDataType`: float
//! widths other than 32 and 64, integer widths outside {8, 16, 32, 64, 128},
//! and any shape/value mismatch. The grammar has no spelling for raw
//! many-item pointers, null-terminated pointers, or untagged unions.

mod decode;
mod encode;
mod shape;
mod value;

pub use decode::decode;
pub use encode::encode;
pub use shape::{Field, Shape};
pub use value::Value;
