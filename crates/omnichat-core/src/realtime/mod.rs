pub mod channel;
pub mod events;
pub mod router;

pub use channel::RealtimeChannel;
pub use events::ServerEvent;
pub use router::EventRouter;
