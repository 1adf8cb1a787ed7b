//! Database module for PostgreSQL persistence.

#[cfg(test)]
mod memory;
mod pool;
mod records;

#[cfg(test)]
pub use memory::*;
pub use pool::*;
pub use records::*;
