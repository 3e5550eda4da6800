//! Field metadata and value handling.
//!
//! `descriptor` holds the closed field-kind enumeration and per-field
//! metadata; `codec` is the single place where loosely-typed external values
//! are turned into display text and back. Code outside this module never
//! inspects raw value shapes.

mod codec;
mod descriptor;

pub use codec::{is_truthy, FieldValueCodec, RichSegment};
pub use descriptor::{FieldDescriptor, FieldKind, SelectOption};
