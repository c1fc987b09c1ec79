mod facade;
#[cfg(test)]
mod tests;

pub use facade::*;
