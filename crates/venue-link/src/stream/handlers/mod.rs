//! Ready-made protocol handlers.

mod json;

pub use json::{JsonChannelConfig, JsonChannelHandler};
