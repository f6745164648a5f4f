use std::path::{Component, Path, PathBuf};

use conductor_core::{ConfigError, GlobalConfig, LocationKind, RepositoryLocation};
use tokio::process::Command;

/// Resolve resource references to local files.
///
/// A reference may be a plain filesystem path, a `file://` URL, a direct
/// `http(s)` URL (fetched into the cache), or `alias://relative/path`
/// against a configured resource location (filesystem join, git clone into
/// the cache, or HTTP fetch with the location's headers).
pub struct ResourceResolver {
    config: GlobalConfig,
    cache_root: PathBuf,
    client: reqwest::Client,
}

impl ResourceResolver {
    pub fn new(config: GlobalConfig) -> Result<Self, ConfigError> {
        let cache_root = match &config.resource_cache_dir {
            Some(dir) => dir.clone(),
            None => default_cache_dir()?,
        };
        std::fs::create_dir_all(&cache_root).map_err(|err| ConfigError::Resolution {
            reference: cache_root.display().to_string(),
            message: format!("failed to create cache directory: {err}"),
        })?;
        Ok(Self {
            config,
            cache_root,
            client: reqwest::Client::new(),
        })
    }

    pub async fn resolve(&self, reference: &str) -> Result<PathBuf, ConfigError> {
        let Some((scheme, rest)) = reference.split_once("://") else {
            return existing_path(reference, Path::new(reference));
        };

        match scheme {
            "file" => existing_path(reference, Path::new(rest)),
            "http" | "https" => self.download(reference, &Default::default()).await,
            alias => {
                let location = self.config.resource_locations.get(alias).ok_or_else(|| {
                    ConfigError::Resolution {
                        reference: reference.to_string(),
                        message: format!("no resource location registered for alias '{alias}'"),
                    }
                })?;
                let relative = safe_relative(reference, rest)?;
                self.resolve_in_location(reference, location, &relative)
                    .await
            }
        }
    }

    async fn resolve_in_location(
        &self,
        reference: &str,
        location: &RepositoryLocation,
        relative: &Path,
    ) -> Result<PathBuf, ConfigError> {
        match location.kind {
            LocationKind::Filesystem => {
                let mut root = PathBuf::from(&location.location);
                if let Some(subpath) = &location.subpath {
                    root = root.join(safe_relative(reference, subpath)?);
                }
                existing_path(reference, &root.join(relative))
            }
            LocationKind::Git => {
                let mut root = self.ensure_git_checkout(location).await?;
                if let Some(subpath) = &location.subpath {
                    root = root.join(safe_relative(reference, subpath)?);
                }
                existing_path(reference, &root.join(relative))
            }
            LocationKind::Http => {
                let mut base = location.location.trim_end_matches('/').to_string();
                if let Some(subpath) = &location.subpath {
                    base = format!("{base}/{}", subpath.trim_matches('/'));
                }
                let url = format!("{base}/{}", relative.display());
                self.download(&url, &location.headers).await
            }
        }
    }

    /// Clone the repository into the cache on first use, fetch afterwards,
    /// and check out the pinned reference when one is configured.
    async fn ensure_git_checkout(
        &self,
        location: &RepositoryLocation,
    ) -> Result<PathBuf, ConfigError> {
        let repo_dir = self.cache_root.join(&location.name);
        if !repo_dir.exists() {
            run_git(
                &location.location,
                &["clone", &location.location, &repo_dir.display().to_string()],
            )
            .await?;
        } else {
            let dir = repo_dir.display().to_string();
            run_git(
                &location.location,
                &["-C", &dir, "fetch", "--all", "--tags", "--prune"],
            )
            .await?;
        }
        if let Some(reference) = &location.reference {
            let dir = repo_dir.display().to_string();
            run_git(&location.location, &["-C", &dir, "checkout", reference]).await?;
            // A tag or detached commit cannot fast-forward; that is fine.
            let _ = run_git(&location.location, &["-C", &dir, "pull", "--ff-only"]).await;
        }
        Ok(repo_dir)
    }

    async fn download(
        &self,
        url: &str,
        headers: &std::collections::BTreeMap<String, String>,
    ) -> Result<PathBuf, ConfigError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| ConfigError::Resolution {
                reference: url.to_string(),
                message: err.to_string(),
            })?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ConfigError::Resolution {
                reference: url.to_string(),
                message: err.to_string(),
            })?;

        let name = url
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or("resource");
        let downloads = self.cache_root.join("downloads");
        std::fs::create_dir_all(&downloads).map_err(|err| ConfigError::Resolution {
            reference: url.to_string(),
            message: err.to_string(),
        })?;
        let target = downloads.join(format!("{}-{name}", uuid::Uuid::new_v4()));
        std::fs::write(&target, &bytes).map_err(|err| ConfigError::Resolution {
            reference: url.to_string(),
            message: err.to_string(),
        })?;
        tracing::debug!(%url, path = %target.display(), "fetched resource");
        Ok(target)
    }
}

fn default_cache_dir() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or_else(|| ConfigError::Resolution {
        reference: "~/.conductor/sources".to_string(),
        message: "HOME is not set and no resource_cache_dir is configured".to_string(),
    })?;
    Ok(PathBuf::from(home).join(".conductor").join("sources"))
}

fn existing_path(reference: &str, path: &Path) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        Ok(path.to_path_buf())
    } else {
        Err(ConfigError::Resolution {
            reference: reference.to_string(),
            message: format!("'{}' does not exist", path.display()),
        })
    }
}

/// Relative paths inside a repository may not be absolute or climb out of
/// the repository root.
fn safe_relative(reference: &str, raw: &str) -> Result<PathBuf, ConfigError> {
    let path = PathBuf::from(raw);
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|component| matches!(component, Component::ParentDir));
    if escapes {
        return Err(ConfigError::Resolution {
            reference: reference.to_string(),
            message: format!("relative path '{raw}' cannot be absolute or contain '..'"),
        });
    }
    Ok(path)
}

async fn run_git(context: &str, args: &[&str]) -> Result<(), ConfigError> {
    let output = Command::new("git")
        .args(args)
        .output()
        .await
        .map_err(|err| ConfigError::Resolution {
            reference: context.to_string(),
            message: format!("failed to run git: {err}"),
        })?;
    if !output.status.success() {
        return Err(ConfigError::Resolution {
            reference: context.to_string(),
            message: format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}
