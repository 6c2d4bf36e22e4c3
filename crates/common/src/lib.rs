// Engine modules
pub mod cache;
pub mod changelog;
pub mod digest;
pub mod scanner;
pub mod store;
pub mod transport;
pub mod tree_path;
pub mod watcher;

// Re-exports for consumers (daemon, tests)
pub use cache::{CacheError, DirEntry, RemoteCache, RepairStats, UpdateOutcome};
pub use changelog::{ChangeLog, ChangeLogError, Entry, Meta, LOG_FILE, META_FILE};
pub use digest::Digest;
pub use scanner::{ScanError, ScanSummary, TreeScanner};
pub use store::{FileStat, LocalStore};
pub use transport::{FetchOutcome, FsTransport, HttpTransport, Transport, TransportError};
pub use tree_path::{TreePath, TreePathError};
pub use watcher::{spawn_watcher, WatchError, WatchEvent, WatcherBridge};
