#![doc = include_str!("../README.md")]

mod allocator;
mod config;
mod error;
mod row;
mod segment;
mod sequencer;
mod store;

pub use crate::allocator::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::row::*;
pub use crate::segment::*;
pub use crate::sequencer::*;
pub use crate::store::*;
