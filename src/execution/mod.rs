//! Order execution across broker platforms.

mod adapter;
mod venue;
mod wire;

pub use adapter::ExecutionAdapter;
pub use venue::{SimulatedVenue, Venue};
pub use wire::{ProjectXOrderRequest, TradovateOrderRequest, VenueAck, VenueRequest};
