pub mod manager;
pub mod types;

#[cfg(test)]
mod tests;

pub use manager::*;
pub use types::*;
