use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::SessionId;
use crate::error::IprError;

pub const RESULTS_FILE_NAME: &str = "results";
const DATA_DIR_NAME: &str = ".iprstats";
const SESSIONS_DIR_NAME: &str = "sessions";

/// Owns the `<data_dir>/sessions/<id>/` working directories.
#[derive(Debug, Clone)]
pub struct SessionStore {
    data_dir: Utf8PathBuf,
    sessions_dir: Utf8PathBuf,
}

/// One session working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    dir: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub path: String,
    pub cached: bool,
    pub bytes: u64,
}

impl SessionStore {
    /// `installed` places the data directory in `$HOME`, otherwise in the
    /// current working directory.
    pub fn new(installed: bool) -> Result<Self, IprError> {
        let home = if installed {
            BaseDirs::new()
                .map(|dirs| dirs.home_dir().to_path_buf())
                .ok_or_else(|| {
                    IprError::Filesystem("unable to resolve home directory".to_string())
                })?
        } else {
            std::env::current_dir().map_err(|err| IprError::Filesystem(err.to_string()))?
        };
        let home = Utf8PathBuf::from_path_buf(home)
            .map_err(|_| IprError::Filesystem("invalid home path".to_string()))?;

        let data_dir = real_folder(home.join(DATA_DIR_NAME))?;
        let sessions_dir = real_folder(data_dir.join(SESSIONS_DIR_NAME))?;
        Ok(Self {
            data_dir,
            sessions_dir,
        })
    }

    pub fn new_with_paths(data_dir: Utf8PathBuf) -> Self {
        let sessions_dir = data_dir.join(SESSIONS_DIR_NAME);
        Self {
            data_dir,
            sessions_dir,
        }
    }

    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    pub fn sessions_dir(&self) -> &Utf8Path {
        &self.sessions_dir
    }

    pub fn ensure_dirs(&self) -> Result<(), IprError> {
        fs::create_dir_all(self.sessions_dir.as_std_path())
            .map_err(|err| IprError::Filesystem(err.to_string()))
    }

    pub fn session_dir(&self, id: &SessionId) -> Utf8PathBuf {
        self.sessions_dir.join(id.as_str())
    }

    /// Creates the directory for `id`, or for a freshly generated id.
    pub fn new_session(&self, id: Option<SessionId>) -> Result<Session, IprError> {
        self.ensure_dirs()?;
        let id = id.unwrap_or_else(SessionId::generate);
        let dir = self.session_dir(&id);
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| IprError::Filesystem(err.to_string()))?;
        debug!(session = %id, dir = %dir, "session directory ready");
        Ok(Session { id, dir })
    }

    pub fn open_session(&self, id: &SessionId) -> Result<Session, IprError> {
        let dir = self.session_dir(id);
        if !dir.as_std_path().is_dir() {
            return Err(IprError::SessionNotFound(id.to_string()));
        }
        Ok(Session {
            id: id.clone(),
            dir,
        })
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>, IprError> {
        if !self.sessions_dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(self.sessions_dir.as_std_path())
            .map_err(|err| IprError::Filesystem(err.to_string()))?;
        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| IprError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if name.parse::<SessionId>().is_err() {
                continue;
            }
            sessions.push(SessionInfo {
                id: name.to_string(),
                path: path.display().to_string(),
                cached: path.join(RESULTS_FILE_NAME).exists(),
                bytes: dir_size(&path).unwrap_or(0),
            });
        }
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    pub fn clear_session(&self, id: &SessionId) -> Result<(), IprError> {
        let dir = self.session_dir(id);
        if dir.as_std_path().exists() {
            fs::remove_dir_all(dir.as_std_path())
                .map_err(|err| IprError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), IprError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| IprError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| IprError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| IprError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn results_path(&self) -> Utf8PathBuf {
        self.dir.join(RESULTS_FILE_NAME)
    }

    pub fn local_db_path(&self, db_name: &str) -> Utf8PathBuf {
        self.dir.join(db_name)
    }

    pub fn has_results(&self) -> bool {
        self.results_path().as_std_path().exists()
    }
}

/// Creates `path` if needed; falls back to the system temp dir when that fails.
fn real_folder(path: Utf8PathBuf) -> Result<Utf8PathBuf, IprError> {
    if path.as_std_path().exists() {
        return Ok(path);
    }
    match fs::create_dir_all(path.as_std_path()) {
        Ok(()) => Ok(path),
        Err(err) => {
            let temp = Utf8PathBuf::from_path_buf(std::env::temp_dir())
                .map_err(|_| IprError::Filesystem("invalid temp dir".to_string()))?;
            warn!(folder = %path, fallback = %temp, error = %err, "could not create folder");
            Ok(temp)
        }
    }
}

fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total = total.saturating_add(meta.len());
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let temp = tempfile::tempdir().unwrap();
        let data_dir = Utf8PathBuf::from_path_buf(temp.path().join(".iprstats")).unwrap();
        let store = SessionStore::new_with_paths(data_dir);
        let id: SessionId = "Xs7O4pYH".parse().unwrap();

        let session = store.new_session(Some(id)).unwrap();
        assert!(session.dir().ends_with("sessions/Xs7O4pYH"));
        assert!(session.results_path().ends_with("Xs7O4pYH/results"));
        assert!(!session.has_results());
    }
}
