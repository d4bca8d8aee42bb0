use rand::{distributions::Alphanumeric, Rng};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn ensure_dir_for_file(path: impl AsRef<Path>) -> io::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn temp_sibling_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("temp");
    parent.join(format!("{}.{}.tmp", file_name, random_token(8)))
}

fn open_options(mode: u32) -> fs::OpenOptions {
    let mut options = fs::OpenOptions::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options
}

/// Creates a brand-new file with `mode` applied at creation time, so the
/// content is never readable with looser permissions. Fails if `path` exists.
/// A file that could not be fully written is removed again.
pub fn create_private_file(path: impl AsRef<Path>, content: &[u8], mode: u32) -> io::Result<()> {
    let path = path.as_ref();
    let mut file = open_options(mode).write(true).create_new(true).open(path)?;
    let written = file.write_all(content).and_then(|_| file.sync_all());
    drop(file);
    discard_on_error(path, written)
}

fn discard_on_error(path: &Path, written: io::Result<()>) -> io::Result<()> {
    if written.is_err() {
        let _ = remove_file_if_exists(path);
    }
    written
}

pub fn atomic_write_text_file(path: impl AsRef<Path>, content: &str, mode: u32) -> io::Result<()> {
    let path = path.as_ref();
    ensure_dir_for_file(path)?;
    let tmp = temp_sibling_path(path);
    create_private_file(&tmp, content.as_bytes(), mode)?;
    fs::rename(tmp, path)?;
    Ok(())
}

pub fn append_private_file(path: impl AsRef<Path>, content: &str, mode: u32) -> io::Result<()> {
    let path = path.as_ref();
    ensure_dir_for_file(path)?;
    let mut file = open_options(mode).create(true).append(true).open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Removes `path`, treating an already-missing file as success.
pub fn remove_file_if_exists(path: impl AsRef<Path>) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gitkeeper-fs-{}-{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn create_private_file_refuses_existing_path() {
        let path = tmp_path("exists");
        create_private_file(&path, b"one", 0o600).expect("first create");
        assert!(create_private_file(&path, b"two", 0o600).is_err());
        assert_eq!(fs::read_to_string(&path).expect("read"), "one");
        remove_file_if_exists(&path).expect("cleanup");
    }

    #[cfg(unix)]
    #[test]
    fn create_private_file_applies_mode() {
        use std::os::unix::fs::PermissionsExt;
        let path = tmp_path("mode");
        create_private_file(&path, b"k", 0o600).expect("create");
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        remove_file_if_exists(&path).expect("cleanup");
    }

    #[test]
    fn failed_write_removes_partial_file() {
        let path = tmp_path("partial");
        fs::write(&path, b"-----BEGIN OPENSSH").expect("seed");
        let err = discard_on_error(&path, Err(io::Error::new(io::ErrorKind::Other, "disk full")))
            .expect_err("write error");
        assert_eq!(err.to_string(), "disk full");
        assert!(!path.exists());

        fs::write(&path, b"whole").expect("seed");
        discard_on_error(&path, Ok(())).expect("kept");
        assert!(path.exists());
        remove_file_if_exists(&path).expect("cleanup");
    }

    #[test]
    fn remove_missing_file_is_ok() {
        assert!(remove_file_if_exists(tmp_path("missing")).is_ok());
    }
}
