//! Queue backends.

pub mod channel;
pub mod frame;
pub mod pipe;

pub use channel::ChannelQueue;
pub use pipe::PipeQueue;
