//! Bare repositories of one site, addressed by name.

use std::path::{Path, PathBuf};

use git2::{Repository, RepositoryInitOptions};

use crate::core::RepoName;

use super::error::GitError;

/// Opens `<root>/<name>.git` bare repositories.
///
/// Cheap to clone; holds no open handles. Every thread opens its own
/// `Repository` since those are not `Sync`.
#[derive(Clone, Debug)]
pub struct RepoManager {
    root: PathBuf,
}

impl RepoManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &RepoName) -> PathBuf {
        self.root.join(format!("{}.git", name.as_str()))
    }

    pub fn exists(&self, name: &RepoName) -> bool {
        self.path_of(name).join("HEAD").is_file()
    }

    pub fn open(&self, name: &RepoName) -> Result<Repository, GitError> {
        let path = self.path_of(name);
        if !self.exists(name) {
            return Err(GitError::NoSuchRepo(name.clone()));
        }
        Repository::open_bare(&path).map_err(|source| GitError::OpenRepo {
            repo: name.clone(),
            path,
            source,
        })
    }

    pub fn create(&self, name: &RepoName) -> Result<Repository, GitError> {
        let path = self.path_of(name);
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true).mkpath(true);
        let repo = Repository::init_opts(&path, &opts).map_err(|source| GitError::InitRepo {
            repo: name.clone(),
            path: path.clone(),
            source,
        })?;
        tracing::debug!(repo = %name, path = %path.display(), "created repository");
        Ok(repo)
    }

    pub fn open_or_create(&self, name: &RepoName) -> Result<Repository, GitError> {
        if self.exists(name) {
            self.open(name)
        } else {
            self.create(name)
        }
    }

    /// Names of every repository under the root, sorted.
    pub fn list(&self) -> Result<Vec<RepoName>, GitError> {
        let mut out = Vec::new();
        if !self.root.is_dir() {
            return Ok(out);
        }
        self.walk(&self.root, &mut out);
        out.sort();
        Ok(out)
    }

    fn walk(&self, dir: &Path, out: &mut Vec<RepoName>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.ends_with(".git") {
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let rel = rel.to_string_lossy();
                let name = rel.trim_end_matches(".git").replace('\\', "/");
                match RepoName::new(name) {
                    Ok(name) => out.push(name),
                    Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping repository"),
                }
            } else {
                self.walk(&path, out);
            }
        }
    }
}
