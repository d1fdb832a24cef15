//! `\i` include expansion for desired-state DDL files.
//!
//! `\i relative/path.sql` splices a file; `\i relative/folder/` (trailing
//! slash) splices every `.sql` file under the folder, depth-first in
//! alphabetical order. Paths resolve relative to the including file and may
//! not escape the base directory of the top-level file.

use std::path::{Path, PathBuf};

use crate::error::{PgplanError, Result};

/// Read a DDL file and expand all `\i` directives recursively.
pub fn expand_includes(root: &Path) -> Result<String> {
    let root = root.canonicalize().map_err(|e| PgplanError::ParseError {
        source_path: root.display().to_string(),
        reason: format!("cannot open file: {}", e),
    })?;
    let base_dir = root
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let mut chain: Vec<PathBuf> = Vec::new();
    expand_file(&root, &base_dir, &mut chain)
}

fn expand_file(file: &Path, base_dir: &Path, chain: &mut Vec<PathBuf>) -> Result<String> {
    if chain.contains(&file.to_path_buf()) {
        let mut cycle: Vec<String> = chain.iter().map(|p| display_name(p)).collect();
        cycle.push(display_name(file));
        return Err(PgplanError::CircularInclude {
            path: cycle.join(" -> "),
        });
    }
    chain.push(file.to_path_buf());

    let content = std::fs::read_to_string(file).map_err(|e| PgplanError::ParseError {
        source_path: file.display().to_string(),
        reason: format!("cannot read file: {}", e),
    })?;
    let dir = file.parent().unwrap_or(base_dir).to_path_buf();

    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(target) = trimmed.strip_prefix("\\i ") {
            let target = target.trim();
            if target.ends_with('/') {
                out.push_str(&expand_folder(&dir.join(target), file, base_dir, chain)?);
            } else {
                let resolved = resolve(&dir.join(target), file, base_dir)?;
                out.push_str(&expand_file(&resolved, base_dir, chain)?);
            }
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }

    chain.pop();
    Ok(out)
}

/// Expand every `.sql` file under `folder`, depth-first, children sorted
/// alphabetically; subdirectories recurse before later siblings.
fn expand_folder(
    folder: &Path,
    includer: &Path,
    base_dir: &Path,
    chain: &mut Vec<PathBuf>,
) -> Result<String> {
    let folder = resolve(folder, includer, base_dir)?;
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&folder)
        .map_err(|e| PgplanError::ParseError {
            source_path: includer.display().to_string(),
            reason: format!("cannot read include folder {}: {}", folder.display(), e),
        })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    let mut out = String::new();
    for entry in entries {
        if entry.is_dir() {
            out.push_str(&expand_folder(&entry, includer, base_dir, chain)?);
        } else if entry.extension().is_some_and(|ext| ext == "sql") {
            out.push_str(&expand_file(&entry, base_dir, chain)?);
        }
    }
    Ok(out)
}

/// Canonicalize a path and reject resolution outside the base directory.
fn resolve(path: &Path, includer: &Path, base_dir: &Path) -> Result<PathBuf> {
    let resolved = path.canonicalize().map_err(|e| PgplanError::ParseError {
        source_path: includer.display().to_string(),
        reason: format!("include target {} not found: {}", path.display(), e),
    })?;
    if !resolved.starts_with(base_dir) {
        return Err(PgplanError::ParseError {
            source_path: includer.display().to_string(),
            reason: format!(
                "include target {} resolves outside the base directory {}",
                path.display(),
                base_dir.display()
            ),
        });
    }
    Ok(resolved)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_plain_file_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.sql", "CREATE TABLE t (id int);\n");
        let out = expand_includes(&dir.path().join("main.sql")).unwrap();
        assert_eq!(out, "CREATE TABLE t (id int);\n");
    }

    #[test]
    fn test_file_include() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.sql", "\\i tables/users.sql\nSELECT 1;\n");
        write(dir.path(), "tables/users.sql", "CREATE TABLE users (id int);\n");
        let out = expand_includes(&dir.path().join("main.sql")).unwrap();
        assert_eq!(out, "CREATE TABLE users (id int);\nSELECT 1;\n");
    }

    #[test]
    fn test_folder_include_alphabetical() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.sql", "\\i tables/\n");
        write(dir.path(), "tables/b.sql", "-- b\n");
        write(dir.path(), "tables/a.sql", "-- a\n");
        let out = expand_includes(&dir.path().join("main.sql")).unwrap();
        assert_eq!(out, "-- a\n-- b\n");
    }

    #[test]
    fn test_folder_include_recurses_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.sql", "\\i objects/\n");
        write(dir.path(), "objects/a.sql", "-- a\n");
        write(dir.path(), "objects/nested/inner.sql", "-- inner\n");
        write(dir.path(), "objects/z.sql", "-- z\n");
        let out = expand_includes(&dir.path().join("main.sql")).unwrap();
        // "nested" sorts between "a.sql" and "z.sql"
        assert_eq!(out, "-- a\n-- inner\n-- z\n");
    }

    #[test]
    fn test_nested_relative_resolution() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.sql", "\\i sub/mid.sql\n");
        write(dir.path(), "sub/mid.sql", "\\i leaf.sql\n");
        write(dir.path(), "sub/leaf.sql", "-- leaf\n");
        let out = expand_includes(&dir.path().join("main.sql")).unwrap();
        assert_eq!(out, "-- leaf\n");
    }

    #[test]
    fn test_traversal_outside_base_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "secret.sql", "-- secret\n");
        write(dir.path(), "project/main.sql", "\\i ../secret.sql\n");
        let err = expand_includes(&dir.path().join("project/main.sql")).unwrap_err();
        assert!(err.to_string().contains("outside the base directory"));
    }

    #[test]
    fn test_circular_include_detected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.sql", "\\i b.sql\n");
        write(dir.path(), "b.sql", "\\i a.sql\n");
        let err = expand_includes(&dir.path().join("a.sql")).unwrap_err();
        assert!(matches!(err, PgplanError::CircularInclude { .. }));
        assert!(err.to_string().contains("a.sql -> b.sql -> a.sql"));
    }

    #[test]
    fn test_missing_include_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.sql", "\\i nope.sql\n");
        let err = expand_includes(&dir.path().join("main.sql")).unwrap_err();
        assert!(matches!(err, PgplanError::ParseError { .. }));
    }
}
