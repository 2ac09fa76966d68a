use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Write a JSON document to stdout or a file, creating parent directories as needed.
pub fn write_output(json: &str, output_path: Option<&str>) -> Result<(), String> {
    match output_path {
        Some(path) => write_file(Path::new(path), json),
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            writeln!(handle, "{}", json).map_err(|e| format!("Failed to write to stdout: {}", e))
        }
    }
}

fn write_file(path: &Path, json: &str) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            format!("Failed to create output directory '{}': {}", parent.display(), e)
        })?;
    }

    std::fs::write(path, format!("{}\n", json))
        .map_err(|e| format!("Failed to write output file '{}': {}", path.display(), e))
}

/// Serialize a value to JSON (pretty or compact).
pub fn to_json<T: Serialize>(value: &T, compact: bool) -> Result<String, String> {
    let serialized = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    serialized.map_err(|e| format!("JSON serialization failed: {}", e))
}
