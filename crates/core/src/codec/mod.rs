//! Wire codec for ticket events and the schema registry it depends on.

mod registry;
mod wire;

pub use registry::{RegistryError, SchemaRegistry};
pub use wire::{fields, CodecError, TicketCodec, HEADER_LEN, MAGIC_BYTE};
