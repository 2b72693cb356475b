use std::path::{Path, PathBuf};

/// Human-readable file stem for an item: the title reduced to letters,
/// digits and spaces, falling back to the id.
pub fn output_stem(title: Option<&str>, id: &str) -> String {
    let cleaned: String = title
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect();
    let cleaned = cleaned.trim_end();
    if cleaned.is_empty() {
        id.to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn staging_path_for(staging_dir: &Path, id: &str, ext: &str) -> PathBuf {
    staging_dir.join(format!("{id}.{ext}"))
}

/// Final paths to try in order; the second disambiguates by id.
pub fn candidate_paths(output_dir: &Path, stem: &str, id: &str, ext: &str) -> [PathBuf; 2] {
    [
        output_dir.join(format!("{stem}.{ext}")),
        output_dir.join(format!("{stem} - {id}.{ext}")),
    ]
}

pub fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
