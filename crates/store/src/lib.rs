//! Persistence primitives shared by every durable store in the runtime:
//! atomic JSON snapshots, a reclaimable file lock, and the profile-root
//! directory layout.

pub mod lock;
pub mod paths;
pub mod snapshot;

pub use lock::FileLock;
pub use paths::ProfilePaths;
pub use snapshot::{load_json, save_json};
