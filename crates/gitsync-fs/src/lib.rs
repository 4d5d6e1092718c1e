//! Filesystem layer for gitsync
//!
//! Provides the path safety resolver used before every repository access,
//! atomic I/O with advisory locking, content checksums, and
//! format-agnostic configuration loading.

pub mod checksum;
pub mod config;
pub mod error;
pub mod io;
pub mod path;

pub use config::ConfigStore;
pub use error::{Error, PathError, Result};
pub use io::RobustnessConfig;
pub use path::{
    NormalizedPath, RelativePath, RequestPath, ResolvedPath, RootPolicy, join_relative, resolve,
    validate,
};
