//! Common utilities shared across EPTA crates.

pub mod dirs;
pub mod file_locking;
pub mod http_client;
pub mod path_utils;

pub use dirs::{AppDirs, STATE_FILE_NAME, SYNC_CONFIG_FILE_NAME, get_app_dirs};
pub use file_locking::{
    FileLockError, FileLockGuard, FileLockResult, LockMode, atomic_write, try_acquire_lock,
};
pub use http_client::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_TIMEOUT, USER_AGENT, download_client,
    manifest_client,
};
pub use path_utils::{PathError, PathResult, resolve_within, validate_relative_path};
