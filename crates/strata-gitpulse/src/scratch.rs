//! Opening repository locations, cloning remote ones first.
//!
//! A remote URL is cloned either into the configured `clone_repo_to`
//! directory (kept afterwards) or into a temporary directory that is removed
//! when the last [`ScratchRepo`] handle is dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use strata_core::{MiningConfig, Result, StrataError};
use tempfile::TempDir;
use tracing::info;

use crate::git::{GitBackend, GitOptions};

const REMOTE_PREFIXES: [&str; 4] = ["git@", "https://", "http://", "git://"];

/// Whether `location` names a remote repository rather than a local path.
///
/// # Examples
///
/// ```
/// use strata_gitpulse::scratch::is_remote;
///
/// assert!(is_remote("https://github.com/rust-lang/git2-rs.git"));
/// assert!(is_remote("git@github.com:rust-lang/git2-rs.git"));
/// assert!(!is_remote("/srv/git/project"));
/// ```
pub fn is_remote(location: &str) -> bool {
    REMOTE_PREFIXES.iter().any(|prefix| location.starts_with(prefix))
}

/// Repository name of a URL or path: its last segment without `.git`.
///
/// # Errors
///
/// Returns a configuration error if no name can be derived.
///
/// # Examples
///
/// ```
/// use strata_gitpulse::scratch::repo_name;
///
/// assert_eq!(repo_name("https://example.com/team/widget.git").unwrap(), "widget");
/// assert_eq!(repo_name("git@example.com:team/widget").unwrap(), "widget");
/// assert!(repo_name("https://").is_err());
/// ```
pub fn repo_name(location: &str) -> Result<String> {
    let trimmed = location.trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default()
        .trim_end_matches(".git");
    if last.is_empty() {
        return Err(StrataError::Config(format!(
            "cannot derive a repository name from '{location}'"
        )));
    }
    Ok(last.to_string())
}

/// A clone made for the duration of a traversal.
#[derive(Debug)]
pub struct ScratchRepo {
    path: PathBuf,
    _tempdir: Option<TempDir>,
}

impl ScratchRepo {
    /// Clone `url`, into `into/<name>` when given, otherwise into a
    /// temporary directory.
    ///
    /// An existing clone under `into` is reused.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Clone`] if cloning fails and an I/O error if
    /// the temporary directory cannot be created.
    pub fn clone_from(url: &str, into: Option<&Path>) -> Result<Self> {
        let name = repo_name(url)?;
        let (path, tempdir) = match into {
            Some(dir) => (dir.join(&name), None),
            None => {
                let tempdir = tempfile::Builder::new().prefix("strata-").tempdir()?;
                (tempdir.path().join(&name), Some(tempdir))
            }
        };

        if tempdir.is_none() && path.exists() {
            info!(url, path = %path.display(), "reusing existing clone");
            return Ok(Self {
                path,
                _tempdir: None,
            });
        }

        info!(url, path = %path.display(), "cloning repository");
        Repository::clone(url, &path).map_err(|e| StrataError::Clone {
            url: url.to_string(),
            message: e.message().to_string(),
        })?;
        Ok(Self {
            path,
            _tempdir: tempdir,
        })
    }

    /// Working directory of the clone.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A backend opened on a location, holding on to its scratch clone.
pub struct OpenedRepo {
    /// The opened repository.
    pub backend: GitBackend,
    /// The clone backing `backend`, for remote locations.
    pub scratch: Option<Arc<ScratchRepo>>,
}

/// Open a local path or clone and open a remote URL.
///
/// # Errors
///
/// Returns an error if cloning fails or the path is not a git repository.
pub fn open_location(location: &str, config: &MiningConfig) -> Result<OpenedRepo> {
    let options = GitOptions::from_config(config);
    if is_remote(location) {
        let scratch = Arc::new(ScratchRepo::clone_from(
            location,
            config.clone_repo_to.as_deref(),
        )?);
        let backend = GitBackend::open(scratch.path(), options)?;
        return Ok(OpenedRepo {
            backend,
            scratch: Some(scratch),
        });
    }
    let path = Path::new(location);
    if !path.exists() {
        return Err(StrataError::FileNotFound(path.to_path_buf()));
    }
    Ok(OpenedRepo {
        backend: GitBackend::open(path, options)?,
        scratch: None,
    })
}
