mod probe;
mod serve;

pub use probe::*;
pub use serve::*;
