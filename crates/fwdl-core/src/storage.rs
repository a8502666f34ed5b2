//! Temporary and final file lifecycle.
//!
//! Bytes always land in `<dir>/<name>.part`; the final name appears only
//! once the transfer is complete, and never on top of an existing file.
//! All calls run on
//! the tokio blocking-aware fs API.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};

use crate::error::DownloadError;

/// Temporary file suffix used before the final rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path
/// (e.g. `radio.bin` -> `radio.bin.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Current byte length of `path`; 0 when the file does not exist.
pub async fn file_len(path: &Path) -> Result<u64, DownloadError> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::Storage(format!(
            "stat {}: {e}",
            path.display()
        ))),
    }
}

/// Opens the temp file for writing: appending when `offset > 0`, otherwise
/// truncating (or creating) it. Parent directories are created as needed.
pub async fn open_destination(path: &Path, offset: u64) -> Result<File, DownloadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::Storage(format!("create {}: {e}", parent.display())))?;
    }
    let mut options = OpenOptions::new();
    options.create(true).write(true);
    if offset > 0 {
        options.append(true);
    } else {
        options.truncate(true);
    }
    options
        .open(path)
        .await
        .map_err(|e| DownloadError::Storage(format!("open {}: {e}", path.display())))
}

/// Cuts the temp file back to `len` bytes (used when it outgrew the record).
pub async fn truncate_to(path: &Path, len: u64) -> Result<(), DownloadError> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| DownloadError::Storage(format!("open {}: {e}", path.display())))?;
    file.set_len(len)
        .await
        .map_err(|e| DownloadError::Storage(format!("truncate {}: {e}", path.display())))
}

/// Deletes a partial file. Missing files are not an error.
pub async fn remove_partial(path: &Path) -> Result<(), DownloadError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DownloadError::Storage(format!(
            "remove {}: {e}",
            path.display()
        ))),
    }
}

/// Suffixes tried after the wanted name is taken: `name (1).ext` ..
const MAX_NAME_SUFFIX: u32 = 999;

/// `dir/stem (n).ext`; `n == 0` is `path` itself.
pub fn numbered_path(path: &Path, n: u32) -> PathBuf {
    if n == 0 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem} ({n}).{}", ext.to_string_lossy()),
        None => format!("{stem} ({n})"),
    };
    path.with_file_name(name)
}

/// Moves the finished temp file to `final_path`, or to the first free
/// `stem (n).ext` next to it. An existing file is never replaced. Returns
/// the path the file ended up at.
pub async fn finalize(temp: &Path, final_path: &Path) -> Result<PathBuf, DownloadError> {
    let storage_err = |what: &str, target: &Path, e: std::io::Error| {
        DownloadError::Storage(format!(
            "{what} {} to {}: {e}",
            temp.display(),
            target.display()
        ))
    };

    for n in 0..=MAX_NAME_SUFFIX {
        let candidate = numbered_path(final_path, n);
        // A hard link claims the name atomically and fails if it is taken.
        match fs::hard_link(temp, &candidate).await {
            Ok(()) => {
                if let Err(e) = fs::remove_file(temp).await {
                    let _ = fs::remove_file(&candidate).await;
                    return Err(storage_err("unlink", &candidate, e));
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(storage_err("link", &candidate, e));
            }
            Err(_) => {
                // Filesystem without hard links.
                if fs::try_exists(&candidate).await.unwrap_or(true) {
                    continue;
                }
                return fs::rename(temp, &candidate)
                    .await
                    .map(|()| candidate.clone())
                    .map_err(|e| storage_err("rename", &candidate, e));
            }
        }
    }
    Err(DownloadError::Storage(format!(
        "no free file name for {}",
        final_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn temp_path_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/data/fw/radio.bin")),
            PathBuf::from("/data/fw/radio.bin.part")
        );
    }

    #[tokio::test]
    async fn append_and_truncate_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("a.bin.part");

        let mut f = open_destination(&path, 0).await.unwrap();
        f.write_all(b"hello").await.unwrap();
        f.flush().await.unwrap();
        drop(f);
        assert_eq!(file_len(&path).await.unwrap(), 5);

        let mut f = open_destination(&path, 5).await.unwrap();
        f.write_all(b" world").await.unwrap();
        f.flush().await.unwrap();
        drop(f);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");

        let f = open_destination(&path, 0).await.unwrap();
        drop(f);
        assert_eq!(file_len(&path).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_files_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.part");
        assert_eq!(file_len(&path).await.unwrap(), 0);
        remove_partial(&path).await.unwrap();
        assert!(matches!(
            finalize(&path, &dir.path().join("nope")).await,
            Err(DownloadError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn truncate_and_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("x.part");
        std::fs::write(&temp, b"0123456789").unwrap();
        truncate_to(&temp, 4).await.unwrap();
        let done = dir.path().join("x");
        assert_eq!(finalize(&temp, &done).await.unwrap(), done);
        assert!(!temp.exists());
        assert_eq!(std::fs::read(&done).unwrap(), b"0123");
    }

    #[test]
    fn numbered_paths_keep_the_extension() {
        let p = Path::new("/data/fw-1.2.img");
        assert_eq!(numbered_path(p, 0), PathBuf::from("/data/fw-1.2.img"));
        assert_eq!(numbered_path(p, 2), PathBuf::from("/data/fw-1.2 (2).img"));
        assert_eq!(numbered_path(Path::new("/data/README"), 1), PathBuf::from("/data/README (1)"));
    }

    #[tokio::test]
    async fn finalize_never_replaces_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let wanted = dir.path().join("fw.img");
        std::fs::write(&wanted, b"first").unwrap();
        std::fs::write(dir.path().join("fw (1).img"), b"second").unwrap();

        let temp = dir.path().join("other.bin.part");
        std::fs::write(&temp, b"third").unwrap();
        let landed = finalize(&temp, &wanted).await.unwrap();

        assert_eq!(landed, dir.path().join("fw (2).img"));
        assert!(!temp.exists());
        assert_eq!(std::fs::read(&wanted).unwrap(), b"first");
        assert_eq!(std::fs::read(&landed).unwrap(), b"third");
    }
}
