/*!
 * Exit codes for the blockdb CLI
 */

use blockdb_core_index::Error as CoreError;

pub const EXIT_SUCCESS: i32 = 0;
/// Configuration errors: bad settings, mismatched databases, invalid input
pub const EXIT_CONFIG: i32 = 1;
/// I/O and substrate failures
pub const EXIT_FATAL: i32 = 2;

/// Map an error to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CoreError>() {
        Some(
            CoreError::InvalidSettings { .. }
            | CoreError::VersionMismatch { .. }
            | CoreError::IncompatibleDatabases { .. }
            | CoreError::NotADatabase { .. }
            | CoreError::DirectoryNotEmpty { .. }
            | CoreError::WriterActive { .. }
            | CoreError::InvalidHash(_),
        ) => EXIT_CONFIG,
        _ => EXIT_FATAL,
    }
}
