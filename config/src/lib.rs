pub mod loader;
pub mod validate;

pub use loader::*;
pub use validate::*;
