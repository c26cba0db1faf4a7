pub mod ask;
pub mod generation;
pub mod record;
pub mod store;

pub use ask::*;
pub use generation::*;
pub use record::*;
pub use store::*;
