//! Layer extraction.
//!
//! Tar layers (compressed or not) are unpacked into the destination
//! directory. Any other layer is written as a single file named by its
//! title annotation.

use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, trace, warn};

use crate::{Error, LAYER_MEDIA_TYPE, LAYER_TAR_MEDIA_TYPE, Result};

/// Docker's gzip layer media type.
const DOCKER_LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Write one layer's content below `destination`.
///
/// `title` names the file for non-tar layers; only its final path
/// component is used. Returns the regular files written.
pub fn unpack_layer(
    data: &[u8],
    media_type: &str,
    title: &str,
    destination: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(destination).map_err(|e| Error::file(destination, e))?;

    match media_type {
        LAYER_MEDIA_TYPE | DOCKER_LAYER_MEDIA_TYPE => {
            debug!(%title, "Extracting gzip layer");
            unpack_tar(GzDecoder::new(data), destination)
        }
        LAYER_TAR_MEDIA_TYPE => {
            debug!(%title, "Extracting tar layer");
            unpack_tar(data, destination)
        }
        _ => {
            let name = Path::new(title)
                .file_name()
                .ok_or_else(|| Error::registry(format!("layer title '{title}' is not a file name")))?;
            let path = destination.join(name);
            debug!(?path, %media_type, "Writing layer");
            fs::write(&path, data).map_err(|e| Error::file(&path, e))?;
            Ok(vec![path])
        }
    }
}

fn unpack_tar<R: Read>(reader: R, destination: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_mtime(false);

    let mut files = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let is_file = entry.header().entry_type().is_file();

        if !entry.unpack_in(destination)? {
            warn!(?path, "Skipping entry outside destination");
            continue;
        }

        trace!(?path, "Unpacked entry");
        if is_file {
            files.push(destination.join(path));
        }
    }

    Ok(files)
}
