#![doc = include_str!("../README.md")]

mod error;

pub mod bytes;
pub mod events;
pub mod integrity;
pub mod link;
pub mod spacepacket;
pub mod stream;
pub mod tc;
pub mod timecode;
pub mod tm;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bytes::ByteOrder;
pub use error::{Error, Result};
