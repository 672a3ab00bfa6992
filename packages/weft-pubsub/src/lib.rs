pub mod driver;
pub mod pubsub;

pub use driver::*;
pub use pubsub::{Message, NextOutput, PubSub, Subscriber};
