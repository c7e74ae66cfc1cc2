use crate::exit_codes;
use mne_rs::MneError;
use std::io::Write;
use std::path::Path;

/// Write text to stdout or a file.
pub fn write_output(text: &str, output_path: Option<&Path>) -> Result<(), String> {
    match output_path {
        Some(path) => std::fs::write(path, text)
            .map_err(|e| format!("Failed to write output file '{}': {}", path.display(), e)),
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(text.as_bytes())
                .and_then(|_| {
                    if text.ends_with('\n') {
                        Ok(())
                    } else {
                        handle.write_all(b"\n")
                    }
                })
                .map_err(|e| format!("Failed to write to stdout: {}", e))
        }
    }
}

/// Serialize a value to JSON (pretty or compact).
pub fn to_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<String, String> {
    let result = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    result.map_err(|e| format!("JSON serialization failed: {}", e))
}

/// Print `value` as pretty JSON on stdout and return the exit code.
pub fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match to_json(value, false).and_then(|json| write_output(&json, None)) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}

/// Report a library error on stderr and map it to an exit code.
pub fn fail(err: MneError) -> i32 {
    eprintln!("Error: {}", err);
    exit_codes::for_error(&err)
}
