use mne_rs::MneError;

pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
pub const INPUT_ERROR: i32 = 2;
pub const BINARY_NOT_FOUND: i32 = 3;
pub const VERSION_MISMATCH: i32 = 4;

/// Exit code reported for a library error.
pub fn for_error(err: &MneError) -> i32 {
    match err {
        MneError::FileNotFound(_)
        | MneError::UnsupportedFileType(_)
        | MneError::ParseError(_)
        | MneError::InvalidParameter(_)
        | MneError::ChannelNotFound(_) => INPUT_ERROR,
        MneError::BinaryNotFound(_) => BINARY_NOT_FOUND,
        MneError::VersionMismatch { .. } => VERSION_MISMATCH,
        _ => EXECUTION_ERROR,
    }
}
