pub mod advisor;
pub mod history;
pub mod location;
pub mod types;


pub use advisor::*;
pub use history::*;
pub use location::*;
pub use types::*;
