//! Path and digest primitives: atomic writes, hex digests, ZIP/JAR sniffing.

use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::fs::{self, File};

use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha512};


/// Extension to the standard [`Path`].
pub trait PathExt {
    /// A shortcut method to join a file name with its extension to the current path.
    /// This shortcut avoids a temporary allocation of a formatted string when joining.
    fn join_with_extension<P: AsRef<Path>, S: AsRef<OsStr>>(&self, name: P, extension: S) -> PathBuf;
}

impl PathExt for Path {
    #[inline]
    fn join_with_extension<P: AsRef<Path>, S: AsRef<OsStr>>(&self, name: P, extension: S) -> PathBuf {
        self.join(name).appended(".").appended(extension)
    }
}

/// Extension to the standard [`PathBuf`], mainly to ease joining and raw appending. We do
/// a lot of path joining in this crate so we don't want to allocate each time.
pub trait PathBufExt {
    /// Return this path joined with another one, this is different from [`Path::join`]
    /// in that it doesn't reallocate a new path on each join.
    fn joined<P: AsRef<Path>>(self, path: P) -> Self;
    /// Return this path appended with another string, this doesn't add any path separator.
    fn appended<S: AsRef<OsStr>>(self, s: S) -> Self;
}

impl PathBufExt for PathBuf {
    #[inline]
    fn joined<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.push(path);
        self
    }

    #[inline]
    fn appended<S: AsRef<OsStr>>(mut self, s: S) -> Self {
        self.as_mut_os_string().push(s);
        self
    }
}

/// Write `data` to `file` atomically: the payload is written to a sibling temp file and
/// published with a rename, so readers never observe a partial write. Parent directories
/// are created as needed.
pub fn atomic_write(file: &Path, data: &[u8]) -> io::Result<()> {
    let parent = file.parent().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no parent"))?;
    fs::create_dir_all(parent)?;

    let tmp_file = parent.join(format!(".{}.tmp", file.file_name()
        .and_then(OsStr::to_str)
        .unwrap_or("atomic-write")));

    let mut tmp = File::create(&tmp_file)?;
    let res = tmp.write_all(data).and_then(|_| tmp.flush());
    drop(tmp);

    if let Err(e) = res {
        let _ = fs::remove_file(&tmp_file);
        return Err(e);
    }

    fs::rename(&tmp_file, file)
}

/// Create the directory and all its parents, tolerating the directory already existing.
/// Fabric-like sources disagree on whether `mkdirs` returning false means failure or
/// pre-existence; we treat creation as idempotent and retry once before giving up.
pub fn create_dir_all_idempotent(dir: &Path) -> io::Result<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if dir.is_dir() => { let _ = e; Ok(()) }
        Err(_) => fs::create_dir_all(dir),
    }
}

/// Read a whole file to bytes, returning `Ok(None)` if it doesn't exist instead of an error.
pub fn read_or_null(file: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(file) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Return the size in bytes of `file`, or `None` if it doesn't exist.
pub fn size_of(file: &Path) -> io::Result<Option<u64>> {
    match fs::metadata(file) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Recursively walk `dir`, yielding every regular file found, depth-first.
pub fn walk_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk_files_into(dir, &mut out)?;
    Ok(out)
}

fn walk_files_into(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_files_into(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Encode bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        write!(s, "{b:02x}").unwrap();
    }
    s
}

/// Compute the lowercase-hex SHA-1 of a byte slice.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

/// Compute the raw SHA-1 digest of a byte slice.
pub fn sha1_bytes(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the lowercase-hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

/// Compute the lowercase-hex SHA-512 of a byte slice.
pub fn sha512_hex(data: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

/// Compute the lowercase-hex SHA-1 of a file's content, streaming it to avoid loading the
/// whole file in memory.
pub fn sha1_file_hex(file: &Path) -> io::Result<String> {
    let mut f = File::open(file)?;
    let mut hasher = Sha1::new();
    io::copy(&mut f, &mut hasher)?;
    Ok(hex_encode(&hasher.finalize()))
}

/// Probe whether `file` opens as a valid ZIP/JAR archive with at least one entry. Used to
/// validate `.jar` artifacts: the JAR probe returns true iff the central directory parses
/// and the archive is non-empty.
pub fn is_openable_jar(file: &Path) -> bool {
    let Ok(f) = File::open(file) else { return false };
    match zip::ZipArchive::new(f) {
        Ok(zip) => zip.len() > 0,
        Err(_) => false,
    }
}

/// Read the byte length of a reader fully, without keeping the content, used where only
/// the final size is of interest.
pub fn stream_len<R: Read>(mut r: R) -> io::Result<u64> {
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn atomic_write_publishes_full_payload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sub").join("out.bin");
        atomic_write(&file, b"hello world").unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"hello world");
    }

    #[test]
    fn sha1_hex_is_lowercase() {
        let digest = sha1_hex(b"abc");
        assert_eq!(digest, "a9993e364706816aba3e25717850c26c9cd0d89");
        assert!(digest.chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn read_or_null_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        assert!(read_or_null(&missing).unwrap().is_none());
    }

    #[test]
    fn is_openable_jar_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.jar");
        let mut f = File::create(&file).unwrap();
        f.write_all(b"not a zip").unwrap();
        assert!(!is_openable_jar(&file));
    }
}
