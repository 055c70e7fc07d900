pub mod repository;
pub mod store;
pub mod types;


pub use repository::*;
pub use store::*;
pub use types::*;
