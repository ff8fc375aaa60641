//! Directory → gzip-compressed tar

use crate::error::{HpcrError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Component, Path};
use tar::Builder;
use walkdir::WalkDir;

/// Archive every entry below `root` into an in-memory `.tar.gz`.
///
/// Entry names are relative to `root` in forward-slash form; the root itself
/// is not emitted. Symlinks are stored as links, never followed.
pub fn archive(root: impl AsRef<Path>) -> Result<Vec<u8>> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(HpcrError::Io(format!("{} is not a directory", root.display())));
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = Builder::new(encoder);
    tar.follow_symlinks(false);

    let mut entries = 0usize;
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| HpcrError::Io(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| HpcrError::InternalError)?;
        let name = forward_slash(relative);
        tar.append_path_with_name(entry.path(), &name)?;
        entries += 1;
    }

    let encoder = tar.into_inner()?;
    let bytes = encoder.finish()?;
    tracing::debug!(entries, bytes = bytes.len(), "archived directory");
    Ok(bytes)
}

fn forward_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
