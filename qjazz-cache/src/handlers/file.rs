//! Local-filesystem protocol handler (§4.C1), grounded on
//! `py_qgis_cache/handlers/file.py::FileProtocolHandler`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::error::{self, CacheError};
use crate::handler::ProtocolHandler;
use crate::model::{ProjectMetadata, ResourceUri};

/// Suffixes recognized as QGIS project files, checked case-insensitively.
const PROJECT_SUFFIXES: [&str; 2] = ["qgs", "qgz"];

#[derive(Debug, Default)]
pub struct FileProtocolHandler;

impl FileProtocolHandler {
    pub fn new() -> Self {
        Self
    }

    /// Appends a recognized suffix when `path` doesn't already carry one and
    /// a matching file exists, mirroring `_check_filepath`.
    fn check_filepath(&self, path: &Path) -> PathBuf {
        let has_project_suffix = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| PROJECT_SUFFIXES.iter().any(|sfx| sfx.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if has_project_suffix {
            return path.to_path_buf();
        }
        for sfx in PROJECT_SUFFIXES {
            let candidate = path.with_extension(sfx);
            if candidate.is_file() {
                return candidate;
            }
        }
        path.to_path_buf()
    }
}

fn file_metadata(path: &Path) -> Result<ProjectMetadata, CacheError> {
    let meta = fs::metadata(path)
        .map_err(|e| error::unreadable_resource(format!("{}: {e}", path.display())))?;
    let last_modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(ProjectMetadata {
        uri: path.to_string_lossy().to_string(),
        name: path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default(),
        scheme: "file".to_string(),
        storage: Some("file".to_string()),
        last_modified,
        saved_version: None,
    })
}

impl ProtocolHandler for FileProtocolHandler {
    fn scheme(&self) -> &str {
        "file"
    }

    fn validate_root_url(&self, root: &ResourceUri, is_dynamic: bool) -> Result<(), CacheError> {
        if !is_dynamic && !Path::new(&root.path).exists() {
            return Err(error::invalid_root_url(format!(
                "{} does not exist",
                root.path
            )));
        }
        Ok(())
    }

    fn resolve_uri(&self, url: &ResourceUri) -> String {
        url.path.clone()
    }

    fn public_path(&self, uri: &str, location: &str, root: &ResourceUri) -> String {
        let relative = Path::new(uri)
            .strip_prefix(&root.path)
            .unwrap_or_else(|_| Path::new(uri));
        Path::new(location)
            .join(relative)
            .to_string_lossy()
            .to_string()
    }

    fn project_metadata(&self, url: &ResourceUri) -> Result<ProjectMetadata, CacheError> {
        let path = self.check_filepath(Path::new(&url.path));
        if !path.exists() {
            return Err(error::not_found(path.to_string_lossy().to_string()));
        }
        file_metadata(&path)
    }

    fn list_projects(&self, root: &ResourceUri) -> Result<Vec<ProjectMetadata>, CacheError> {
        let path = Path::new(&root.path);
        if !path.exists() {
            tracing::warn!(path = %path.display(), "search root does not exist");
            return Ok(Vec::new());
        }
        if path.is_file() {
            return Ok(vec![file_metadata(path)?]);
        }

        let mut found = Vec::new();
        collect_recursive(path, &mut found)?;
        Ok(found)
    }
}

fn collect_recursive(dir: &Path, out: &mut Vec<ProjectMetadata>) -> Result<(), CacheError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| error::unreadable_resource(format!("{}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| error::unreadable_resource(e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| PROJECT_SUFFIXES.iter().any(|sfx| sfx.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
        {
            out.push(file_metadata(&path)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_projects_finds_qgs_and_qgz_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.qgs"), b"").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.qgz"), b"").unwrap();
        fs::write(dir.path().join("ignore.txt"), b"").unwrap();

        let handler = FileProtocolHandler::new();
        let root = ResourceUri::new("file", dir.path().to_string_lossy().to_string());
        let mut projects = handler.list_projects(&root).unwrap();
        projects.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].name, "a");
        assert_eq!(projects[1].name, "b");
    }

    #[test]
    fn project_metadata_fails_with_not_found_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FileProtocolHandler::new();
        let url = ResourceUri::new("file", dir.path().join("missing.qgs").to_string_lossy().to_string());
        let err = handler.project_metadata(&url).unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }

    #[test]
    fn project_metadata_appends_recognized_suffix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("proj.qgz"), b"").unwrap();
        let handler = FileProtocolHandler::new();
        let url = ResourceUri::new("file", dir.path().join("proj").to_string_lossy().to_string());
        let md = handler.project_metadata(&url).unwrap();
        assert_eq!(md.name, "proj");
    }
}
