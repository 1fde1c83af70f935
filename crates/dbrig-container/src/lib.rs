pub mod manager;
pub mod manifest;

pub use manager::{add_database, allocate_port, clone_container, create, delete, get, list, remove_database, rename};
