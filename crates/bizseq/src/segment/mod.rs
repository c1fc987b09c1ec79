mod key_cache;
mod range;

pub use key_cache::*;
pub use range::*;
