pub mod atomic_toml;
pub mod versioned_toml;

pub use atomic_toml::AtomicTomlFile;
pub use versioned_toml::{Schema, VersionedTomlFile};
