mod allocate;
mod janitor;
mod preload;
mod registry;

pub use allocate::*;
