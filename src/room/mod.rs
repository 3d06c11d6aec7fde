//! Connection registry and room broadcasting.

pub mod manager;
pub mod registry;

pub use manager::{CallDeparture, CallEntry, LocalRooms, RoomDirectory, RoomKey};
pub use registry::{ConnectionRegistry, Outbox};
