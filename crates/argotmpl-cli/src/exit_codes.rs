//! Standard exit codes for CLI operations
//!
//! 0, 1 and 5 follow the usual conventions; 10 and up map one to one onto
//! the failure kinds of a render or diff.

/// Success - operation completed, including an empty diff
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// IO error - file not found, permission denied, lock timeout
pub const IO_ERROR: i32 = 5;

/// Malformed chart source or application descriptor
pub const MALFORMED_SOURCE: i32 = 10;

/// A chart could not be fetched
pub const FETCH_FAILED: i32 = 11;

/// A git revision does not exist, even after fetching
pub const REVISION_NOT_FOUND: i32 = 12;

/// `helm template` failed
pub const RENDER_FAILED: i32 = 13;

/// Diff requested outside a git work tree
pub const NOT_A_GIT_REPO: i32 = 14;

/// Base files could not be extracted from git
pub const DIFF_STAGING_FAILED: i32 = 15;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
