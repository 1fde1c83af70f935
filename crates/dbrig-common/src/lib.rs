pub mod backup;
pub mod binary_installation;
pub mod bytes;
pub mod container;
pub mod engine_descriptor;
pub mod error;
pub mod identifier;
pub mod platform;
pub mod sql;
pub mod tool_registration;
pub mod version;

pub use backup::{BackupDescriptor, FormatTag, VersionPair};
pub use binary_installation::BinaryInstallation;
pub use container::{Container, ContainerStatus};
pub use engine_descriptor::{EngineDescriptor, EngineFamily, EngineName};
pub use error::{DbrigError, DbrigResult, ErrorCode};
pub use platform::{Arch, Os, PlatformTuple};
pub use tool_registration::{Provenance, ToolRegistration};
pub use version::Version;
