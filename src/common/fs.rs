//! 配置文件落盘：先写同目录临时文件再 rename，
//! 守护进程只会看到完整的旧文件或完整的新文件。

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::error::ControlError;

/// Write `content` to `path` as a whole, creating the parent directory if absent.
///
/// With `owner_only`, the file ends up `0600` on unix. Platforms without
/// POSIX modes log a warning and keep going.
pub async fn write_atomic(path: &Path, content: &str, owner_only: bool) -> Result<(), ControlError> {
    let wrap = |source: std::io::Error| ControlError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await.map_err(wrap)?;
    }

    let tmp = temp_path(path);
    let result = async {
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            if owner_only {
                opts.mode(0o600);
            }
        }
        let mut file = opts.open(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        if owner_only {
            restrict_permissions(&tmp).await;
        }
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(wrap(e));
    }
    debug!(path = %path.display(), bytes = content.len(), "file written");
    Ok(())
}

/// Remove `path`. Returns whether a file was actually removed; absence is not an error.
pub async fn remove_if_exists(path: &Path) -> Result<bool, ControlError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ControlError::Io(e)),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let perms = std::fs::Permissions::from_mode(0o600);
    if let Err(e) = tokio::fs::set_permissions(path, perms).await {
        warn!(path = %path.display(), error = %e, "cannot restrict file permissions");
    }
}

#[cfg(not(unix))]
async fn restrict_permissions(path: &Path) {
    warn!(path = %path.display(), "owner-only permissions are not supported on this platform");
}
