use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

/// Lexically normalizes a path without touching the file system.
///
/// - `.` and empty segments are dropped.
/// - `..` pops the previously retained segment; at the root of an absolute
///   path it is dropped instead (clamped), while a relative path keeps
///   leading `..` segments.
/// - On Windows the drive prefix is split off first (and its letter
///   uppercased) so `c:/a\b` and `C:\a\b` normalize identically.
///
/// Symlinks are not resolved; the result of normalizing a normalized path is
/// the path itself.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut prefix: Option<OsString> = None;
    let mut absolute = false;
    let mut segments: Vec<OsString> = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix = Some(normalize_prefix(p)),
            Component::RootDir => absolute = true,
            Component::CurDir => {}
            Component::ParentDir => match segments.last() {
                Some(last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(OsString::from("..")),
            },
            Component::Normal(segment) => segments.push(segment.to_owned()),
        }
    }

    let mut out = PathBuf::new();
    match (prefix, absolute) {
        (Some(mut prefix), true) => {
            prefix.push(MAIN_SEPARATOR.to_string());
            out.push(prefix);
        }
        (Some(prefix), false) => out.push(prefix),
        (None, true) => out.push(MAIN_SEPARATOR.to_string()),
        (None, false) => {}
    }
    out.extend(segments);
    out
}

fn normalize_prefix(prefix: std::path::PrefixComponent<'_>) -> OsString {
    #[cfg(windows)]
    {
        let raw = prefix.as_os_str().to_string_lossy().into_owned();
        let mut bytes = raw.into_bytes();
        // `X:` and `\\?\X:` prefixes carry a drive letter right before the
        // colon; fold it to uppercase so paths compare drive-insensitively.
        if let Some(colon) = bytes.iter().rposition(|&b| b == b':') {
            if colon > 0 && bytes[colon - 1].is_ascii_alphabetic() {
                bytes[colon - 1] = bytes[colon - 1].to_ascii_uppercase();
            }
        }
        OsString::from(String::from_utf8(bytes).unwrap_or_default())
    }

    #[cfg(not(windows))]
    {
        prefix.as_os_str().to_owned()
    }
}

/// Error produced when constructing a [`FolderPath`] from unsuitable input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The input path was not absolute.
    NotAbsolute(PathBuf),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::NotAbsolute(path) => {
                write!(f, "folder path '{}' is not absolute", path.display())
            }
        }
    }
}

impl std::error::Error for PathError {}

/// A normalized, absolute directory path.
///
/// `FolderPath` is the only key type accepted by the folder dedup map and the
/// folder cache: because keys of this type always denote directories, a file
/// path can never collide with a folder entry (the reason the classic
/// trailing-separator trick existed). [`fmt::Display`] still renders with a
/// trailing separator for parity with user-facing folder strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderPath {
    inner: PathBuf,
}

impl FolderPath {
    /// Normalizes `path` into a folder key.
    ///
    /// Fails with [`PathError::NotAbsolute`] for relative input; the caller
    /// is expected to resolve relative/`~` forms first.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PathError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(PathError::NotAbsolute(path));
        }
        Ok(Self {
            inner: normalize_path(&path),
        })
    }

    pub fn as_path(&self) -> &Path {
        &self.inner
    }

    /// Joins a single entry name onto this folder.
    pub fn join(&self, name: &str) -> PathBuf {
        self.inner.join(name)
    }

    /// The parent folder, computed by appending `..` and re-normalizing.
    ///
    /// This works even when the folder itself no longer exists on disk; the
    /// root is its own parent.
    pub fn parent(&self) -> FolderPath {
        FolderPath {
            inner: normalize_path(&self.inner.join("..")),
        }
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent().is_none()
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.inner.display().to_string();
        if rendered.ends_with(MAIN_SEPARATOR) {
            write!(f, "{rendered}")
        } else {
            write!(f, "{rendered}{MAIN_SEPARATOR}")
        }
    }
}

impl AsRef<Path> for FolderPath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}
