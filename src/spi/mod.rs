//! Native callback side of the bridge: the producer converts callbacks into
//! owned notifications, the channel carries them to the host pump.

pub mod channel;
pub mod producer;

pub use channel::NotificationChannel;
pub use producer::NotificationProducer;
