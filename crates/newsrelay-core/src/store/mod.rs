// # Store Implementations
//
// This module provides implementations of the SentStore and DefinitionStore
// traits for different persistence strategies.

mod json_file;
pub mod file;
pub mod memory;

pub use file::{FileDefinitionStore, FileSentStore};
pub use memory::{MemoryDefinitionStore, MemorySentStore};
