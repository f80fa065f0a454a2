use std::{
    convert::TryFrom,
    path::{Path, PathBuf},
};

use axum::body::Body as AxumBody;
use eyre::WrapErr;
use http_body_util::BodyExt;
use hyper::{Request, Response};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::ports::file_system::{FileSystem, FileSystemError, FileSystemResult};

/// File system adapter using tower-http ServeDir for static file serving
#[derive(Debug, Default, Clone)]
pub struct FileSystemAdapter;

impl FileSystemAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for FileSystemAdapter {
    async fn serve_file(
        &self,
        root: &str,
        path: &str,
        req: Request<AxumBody>,
    ) -> FileSystemResult<Response<AxumBody>> {
        // Create a new request with the path adjusted for ServeDir
        let uri_string = format!("/{path}", path = path.trim_start_matches('/'));
        let uri = hyper::Uri::try_from(uri_string)
            .wrap_err("Failed to parse URI for file serving")
            .map_err(|e| FileSystemError::InvalidPath(e.to_string()))?;

        let (parts, body) = req.into_parts();
        let mut new_req = Request::from_parts(parts, body);
        *new_req.uri_mut() = uri;

        // `/` and other directories resolve to their index.html
        let serve_dir = ServeDir::new(root).append_index_html_on_directories(true);

        let response = serve_dir
            .oneshot(new_req)
            .await
            .wrap_err("ServeDir failed to serve file")
            .map_err(|e| {
                FileSystemError::IoError(std::io::Error::other(format!("ServeDir error: {e}")))
            })?;

        let (parts, tower_body) = response.into_parts();
        let axum_body = AxumBody::new(tower_body.map_err(|e| {
            tracing::error!("Error reading static file body: {}", e);
            axum::Error::new(e)
        }));

        Ok(Response::from_parts(parts, axum_body))
    }

    async fn entry_exists(&self, root: &str, path: &str) -> FileSystemResult<bool> {
        let full_path = Path::new(root).join(path.trim_start_matches('/'));
        let canonical_root = tokio::fs::canonicalize(root)
            .await
            .map_err(FileSystemError::IoError)?;

        let canonical_path = match tokio::fs::canonicalize(&full_path).await {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // A missing entry is only "not found" if its parent stays inside root
                return match nearest_existing_ancestor(&full_path).await {
                    Some(parent) if parent.starts_with(&canonical_root) => Ok(false),
                    _ => Err(FileSystemError::InvalidPath(
                        "Path traversal attempt detected".to_string(),
                    )),
                };
            }
            Err(e) => return Err(FileSystemError::IoError(e)),
        };

        if !canonical_path.starts_with(&canonical_root) {
            return Err(FileSystemError::InvalidPath(
                "Path traversal attempt detected".to_string(),
            ));
        }

        match tokio::fs::metadata(&canonical_path).await {
            Ok(metadata) => Ok(metadata.is_file() || metadata.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FileSystemError::IoError(e)),
        }
    }
}

impl FileSystemAdapter {
    // Helpers used when seeding stores from disk; not part of the port
    pub async fn read_file(&self, root: &str, path: &str) -> FileSystemResult<Vec<u8>> {
        let full_path = contained_path(root, path).await?;
        tokio::fs::read(&full_path)
            .await
            .map_err(FileSystemError::IoError)
    }

    /// Names of the regular files directly inside `path`, sorted.
    pub async fn list_files(&self, root: &str, path: &str) -> FileSystemResult<Vec<String>> {
        let full_path = contained_path(root, path).await?;

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&full_path)
            .await
            .map_err(FileSystemError::IoError)?;

        while let Some(entry) = dir.next_entry().await.map_err(FileSystemError::IoError)? {
            let is_file = entry
                .file_type()
                .await
                .map_err(FileSystemError::IoError)?
                .is_file();
            if let (true, Some(name)) = (is_file, entry.file_name().to_str()) {
                entries.push(name.to_string());
            }
        }

        entries.sort();
        Ok(entries)
    }
}

/// Resolve `path` under `root`, refusing anything that escapes it.
async fn contained_path(root: &str, path: &str) -> FileSystemResult<PathBuf> {
    let full_path = Path::new(root).join(path.trim_start_matches('/'));

    let canonical_root = tokio::fs::canonicalize(root)
        .await
        .map_err(FileSystemError::IoError)?;
    let canonical_path = tokio::fs::canonicalize(&full_path)
        .await
        .map_err(FileSystemError::IoError)?;

    if !canonical_path.starts_with(&canonical_root) {
        return Err(FileSystemError::InvalidPath(
            "Path traversal attempt detected".to_string(),
        ));
    }
    Ok(canonical_path)
}

async fn nearest_existing_ancestor(path: &Path) -> Option<PathBuf> {
    for ancestor in path.ancestors().skip(1) {
        if let Ok(canonical) = tokio::fs::canonicalize(ancestor).await {
            return Some(canonical);
        }
    }
    None
}
