//! Value types shared across the server.

mod primitive;

pub use primitive::{PrimitiveKind, PrimitiveType};
