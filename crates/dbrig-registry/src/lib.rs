pub mod binary_registry;
pub mod tool_store;

pub use binary_registry::{resolve_binary, BinaryFetcher, ResolvedBinary};
pub use tool_store::{FileToolStore, MemoryToolStore, ToolRegistry, ToolRegistryDocument, ToolStore};
