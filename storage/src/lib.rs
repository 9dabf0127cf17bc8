pub mod stash;

pub use stash::*;
