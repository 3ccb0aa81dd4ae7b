use std::fs::{self, File};

use bzip2::Compression;
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::domain::SessionId;
use crate::error::IprError;
use crate::store::Session;

pub const IPS_EXTENSION: &str = "ips";

/// Saved sessions: a tar+bzip2 of the session directory under its id.
pub struct IpsArchive;

impl IpsArchive {
    /// `dest` with `.ips` appended when missing.
    pub fn archive_path(dest: &Utf8Path) -> Utf8PathBuf {
        if dest.extension() == Some(IPS_EXTENSION) {
            dest.to_path_buf()
        } else {
            Utf8PathBuf::from(format!("{dest}.{IPS_EXTENSION}"))
        }
    }

    pub fn export(session: &Session, dest: &Utf8Path) -> Result<Utf8PathBuf, IprError> {
        let path = Self::archive_path(dest);
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| IprError::Filesystem(err.to_string()))?;
        }
        let file = File::create(path.as_std_path())
            .map_err(|err| IprError::Filesystem(err.to_string()))?;
        let mut builder = tar::Builder::new(BzEncoder::new(file, Compression::best()));
        builder
            .append_dir_all(session.id().as_str(), session.dir().as_std_path())
            .map_err(archive_error)?;
        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(archive_error)?;
        info!(session = %session.id(), path = %path, "session archived");
        Ok(path)
    }

    /// Unpacks `path` into `sessions_dir` and returns the archived session id.
    /// An existing session with the same id is replaced.
    pub fn open(path: &Utf8Path, sessions_dir: &Utf8Path) -> Result<SessionId, IprError> {
        fs::create_dir_all(sessions_dir.as_std_path())
            .map_err(|err| IprError::Filesystem(err.to_string()))?;
        let file = File::open(path.as_std_path())
            .map_err(|err| IprError::Filesystem(format!("{path}: {err}")))?;
        let staging = tempfile::Builder::new()
            .prefix(".ips-open")
            .tempdir_in(sessions_dir.as_std_path())
            .map_err(|err| IprError::Filesystem(err.to_string()))?;
        tar::Archive::new(BzDecoder::new(file))
            .unpack(staging.path())
            .map_err(archive_error)?;

        let mut roots = fs::read_dir(staging.path())
            .map_err(|err| IprError::Filesystem(err.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| IprError::Filesystem(err.to_string()))?;
        if roots.len() != 1 {
            return Err(IprError::Archive(format!(
                "{path}: expected one session directory, found {}",
                roots.len()
            )));
        }
        let root = roots.remove(0);
        let name = root.file_name();
        let id: SessionId = name
            .to_str()
            .ok_or_else(|| IprError::Archive(format!("{path}: non UTF-8 session name")))?
            .parse()?;

        let target = sessions_dir.join(id.as_str());
        if target.as_std_path().exists() {
            warn!(session = %id, "replacing existing session directory");
            fs::remove_dir_all(target.as_std_path())
                .map_err(|err| IprError::Filesystem(err.to_string()))?;
        }
        fs::rename(root.path(), target.as_std_path())
            .map_err(|err| IprError::Filesystem(err.to_string()))?;
        info!(session = %id, path = %path, "session restored");
        Ok(id)
    }
}

fn archive_error(err: std::io::Error) -> IprError {
    IprError::Archive(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_appended_once() {
        assert_eq!(
            IpsArchive::archive_path(Utf8Path::new("out/session")),
            Utf8PathBuf::from("out/session.ips")
        );
        assert_eq!(
            IpsArchive::archive_path(Utf8Path::new("out/session.ips")),
            Utf8PathBuf::from("out/session.ips")
        );
    }
}
