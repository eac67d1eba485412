use crate::error::LaunchError;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// ConfigMaps are capped at 1 MiB by the API server
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

const SKIPPED_DIRS: &[&str] = &[".git", ".terraform"];

/// Gzip-compressed tarball of a configuration directory, paths relative to it
pub fn create_archive(root: &Path) -> Result<Vec<u8>, LaunchError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    append_dir(&mut builder, root, Path::new(""))?;

    let payload = builder.into_inner()?.finish()?;
    debug!(bytes = payload.len(), "Archived {}", root.display());

    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(LaunchError::PayloadTooLarge {
            size: payload.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(payload)
}

fn append_dir<W: io::Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    relative: &Path,
) -> io::Result<()> {
    let mut entries = fs::read_dir(root.join(relative))?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let archived = relative.join(&name);

        if file_type.is_dir() {
            if SKIPPED_DIRS.iter().any(|skipped| name == *skipped) {
                continue;
            }
            builder.append_dir(&archived, entry.path())?;
            append_dir(builder, root, &archived)?;
        } else {
            builder.append_path_with_name(entry.path(), &archived)?;
        }
    }
    Ok(())
}
