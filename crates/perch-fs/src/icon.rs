use std::path::{Path, PathBuf};

use perch_core::normalize_path;

use crate::file::{FileFlags, FileRecord};

/// Which icon a file-browser frontend should display for an entry.
///
/// This is a classification, not a pixmap: mapping `Mime` to a concrete icon
/// via the entry's MIME type is the frontend's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IconKind {
    /// Entry enumerated but not yet stat'd.
    Blank,
    File,
    Directory,
    Home,
    Desktop,
    Trash,
    BrokenLink,
    Nonexistent,
    BlockDevice,
    CharacterDevice,
    Fifo,
    Socket,
    /// Regular file with a resolved MIME type.
    Mime,
}

/// Classifies `record` (an entry of `dirname`) into an [`IconKind`].
pub(crate) fn classify(record: &FileRecord, dirname: &Path) -> IconKind {
    if record.is_broken_link() {
        return IconKind::BrokenLink;
    }
    if !record.exists() {
        return IconKind::Nonexistent;
    }
    if record.is_dir() {
        return folder_icon(&dirname.join(record.name().as_str()));
    }
    if record.is_block_device() {
        return IconKind::BlockDevice;
    }
    if record.is_char_device() {
        return IconKind::CharacterDevice;
    }
    if record.is_fifo() {
        return IconKind::Fifo;
    }
    if record.is_socket() {
        return IconKind::Socket;
    }
    if record.flags().contains(FileFlags::HAS_MIME_TYPE) && record.mime_type().is_some() {
        return IconKind::Mime;
    }
    IconKind::File
}

fn folder_icon(path: &Path) -> IconKind {
    let Some(home) = dirs::home_dir() else {
        return IconKind::Directory;
    };
    let path = normalize_path(path);
    if path == home {
        return IconKind::Home;
    }
    let desktop: PathBuf = dirs::desktop_dir().unwrap_or_else(|| home.join("Desktop"));
    if path == desktop {
        return IconKind::Desktop;
    }
    if path == desktop.join("Trash") {
        return IconKind::Trash;
    }
    IconKind::Directory
}
