mod interface;
mod memory;
#[cfg(feature = "mongo")]
mod mongo;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use interface::*;
pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "mongo")))]
#[cfg(feature = "mongo")]
pub use mongo::*;
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
#[cfg(feature = "postgres")]
pub use postgres::*;
