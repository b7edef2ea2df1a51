//! Reproducible layer archives.
//!
//! Archives are gzip-compressed tarballs whose bytes depend only on the file
//! contents, modes and the order files are supplied in:
//! - entry owner is forced to uid/gid 0 (`root`/`root`)
//! - entry mtime is forced to 0
//! - the gzip header mtime is forced to 0
//!
//! The builder does not sort its input. [`collect_files`] yields a sorted
//! file list for callers that need cross-run reproducibility.

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Builder, Header, HeaderMode};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::{Error, Result};

/// Build a reproducible `.tar.gz` archive at `destination`.
///
/// Each item (absolute, or relative to `working_directory`) is stored as
/// `archive_root/<path relative to working_directory>`. Directories are
/// added recursively in file name order.
pub fn build_archive<I, P>(
    items: I,
    destination: &Path,
    working_directory: &Path,
    archive_root: Option<&str>,
) -> Result<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    debug!(?destination, ?working_directory, ?archive_root, "Building archive");

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::file(parent, e))?;
    }

    let file = File::create(destination).map_err(|e| Error::file(destination, e))?;
    let encoder = GzBuilder::new()
        .mtime(0)
        .write(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);

    let mut count = 0usize;
    for item in items {
        let item = item.as_ref();
        let source = if item.is_absolute() {
            item.to_path_buf()
        } else {
            working_directory.join(item)
        };
        let relative = source.strip_prefix(working_directory).unwrap_or(item);
        let name = entry_name(archive_root, relative);

        trace!(?source, ?name, "Adding to archive");
        count += append_path(&mut builder, &source, &name)?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::file(destination, e))?;
    let mut writer = encoder.finish().map_err(|e| Error::file(destination, e))?;
    writer.flush().map_err(|e| Error::file(destination, e))?;

    debug!(?destination, entries = count, "Built archive");
    Ok(destination.to_path_buf())
}

/// Compute the diff ID of a gzip-compressed tar archive.
///
/// Returns the hex SHA256 of the decompressed tar stream. The stream is
/// hashed as it is decompressed.
pub fn diff_id(archive: &Path) -> Result<String> {
    let file = File::open(archive).map_err(|e| Error::file(archive, e))?;
    let mut decoder = GzDecoder::new(BufReader::new(file));
    let mut hasher = Sha256::new();
    io::copy(&mut decoder, &mut hasher).map_err(|e| Error::file(archive, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// [`diff_id`] in the `sha256:<hex>` form recorded in `rootfs.diff_ids`.
pub fn diff_id_prefixed(archive: &Path) -> Result<String> {
    Ok(format!("sha256:{}", diff_id(archive)?))
}

/// Digest of an in-memory blob in OCI format: `sha256:<hex>`.
#[must_use]
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(data))
}

/// Digest of a file in OCI format: `sha256:<hex>`.
pub fn file_digest(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::file(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(|e| Error::file(path, e))?;
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Expand sources into the regular files they contain.
///
/// Files are returned as given; directories are walked recursively and their
/// files returned in file name order. Relative sources resolve against
/// `working_directory`.
pub fn collect_files<P: AsRef<Path>>(
    sources: &[P],
    working_directory: &Path,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for source in sources {
        let source = source.as_ref();
        let path = if source.is_absolute() {
            source.to_path_buf()
        } else {
            working_directory.join(source)
        };

        let metadata = fs::metadata(&path).map_err(|e| Error::file(&path, e))?;
        if metadata.is_dir() {
            for entry in WalkDir::new(&path).sort_by_file_name() {
                let entry = entry.map_err(|e| Error::file(&path, e.into()))?;
                if entry.file_type().is_file() {
                    trace!(path = ?entry.path(), "Including file");
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path);
        }
    }

    debug!(count = files.len(), "Collected archive inputs");
    Ok(files)
}

/// Append a file, or a directory and everything below it.
fn append_path<W: Write>(builder: &mut Builder<W>, source: &Path, name: &Path) -> Result<usize> {
    let metadata = fs::metadata(source).map_err(|e| Error::file(source, e))?;
    if !metadata.is_dir() {
        append_entry(builder, source, &metadata, name)?;
        return Ok(1);
    }

    let mut count = 0;
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::file(source, e.into()))?;
        let child = entry.path();
        let relative = child.strip_prefix(source).unwrap_or(child);
        let metadata = fs::metadata(child).map_err(|e| Error::file(child, e))?;
        append_entry(builder, child, &metadata, &name.join(relative))?;
        count += 1;
    }
    Ok(count)
}

fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    source: &Path,
    metadata: &fs::Metadata,
    name: &Path,
) -> Result<()> {
    let mut header = reproducible_header(metadata).map_err(|e| Error::file(source, e))?;

    if metadata.is_dir() {
        builder
            .append_data(&mut header, name, io::empty())
            .map_err(|e| Error::file(source, e))?;
    } else {
        let file = File::open(source).map_err(|e| Error::file(source, e))?;
        builder
            .append_data(&mut header, name, BufReader::new(file))
            .map_err(|e| Error::file(source, e))?;
    }
    Ok(())
}

/// Header carrying only the metadata that should survive into the archive.
fn reproducible_header(metadata: &fs::Metadata) -> io::Result<Header> {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(metadata, HeaderMode::Deterministic);
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    header.set_mtime(0);
    Ok(header)
}

/// `archive_root/relative`, keeping only normal path components.
fn entry_name(archive_root: Option<&str>, relative: &Path) -> PathBuf {
    let root = archive_root.map(Path::new).unwrap_or_else(|| Path::new(""));
    root.components()
        .chain(relative.components())
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}
