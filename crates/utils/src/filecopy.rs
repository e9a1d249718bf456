//! Small file and directory copy helpers used by the bootloader
//! integrations.

use std::fs;
use std::io;
use std::path::Path;

/// Copy a single regular file, preserving permissions.
pub fn copy_file(from: impl AsRef<Path>, to: impl AsRef<Path>) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}

/// Recursively copy a directory tree. The destination directory is
/// created if absent; existing files are overwritten. Symlinks are
/// followed (bootloader trees do not contain them in practice).
pub fn copy_dir_all(from: impl AsRef<Path>, to: impl AsRef<Path>) -> io::Result<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(entry.path(), target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_dir_all() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let src = td.path().join("src");
        fs::create_dir_all(src.join("sub"))?;
        fs::write(src.join("a"), b"a")?;
        fs::write(src.join("sub/b"), b"b")?;

        let dest = td.path().join("dest");
        copy_dir_all(&src, &dest)?;
        assert_eq!(fs::read(dest.join("a"))?, b"a");
        assert_eq!(fs::read(dest.join("sub/b"))?, b"b");
        Ok(())
    }
}
