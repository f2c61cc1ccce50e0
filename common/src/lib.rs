//! Common types shared between `detect_server` and `capture`.
pub mod frame;
pub mod notice;
pub mod source;

pub use frame::{ChannelOrder, Frame};
pub use notice::{Level, Notice};
pub use source::{InvalidSource, SourceDescriptor, SourceKind, SourceSelection};
