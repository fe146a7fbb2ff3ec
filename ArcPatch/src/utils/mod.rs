//! Utility functions

pub mod hash;
pub mod path;

pub use hash::{Checksum, HashingReader};
pub use path::{is_contained, normalize_path, normalize_resource_name, relative_path};
