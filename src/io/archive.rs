use crate::io::layout::LayoutRegistry;
use crate::io::store::TileStore;
use crate::types::{PipelineError, PipelineResult, Tile, TileId};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use zip::ZipArchive;

/// Container formats the extractor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Format of an archive file, judged by its name
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

/// Outcome of one extraction pass over the raw-download area
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub extracted: Vec<TileId>,
    /// Tiles whose folder already existed without an archive; state was caught up
    pub reconciled: Vec<TileId>,
    pub skipped: usize,
    pub failures: Vec<PipelineError>,
}

/// Unpacks completed downloads into canonical product folders.
///
/// An archive is deleted only after its folder is confirmed on disk, and the
/// tile is marked unzipped only after the deletion. Interrupting at any point
/// leaves either the archive (re-extracted next pass, overwriting) or the
/// folder (state caught up next pass).
pub struct ArchiveExtractor<'a> {
    store: &'a TileStore,
    layouts: &'a LayoutRegistry,
    download_dir: PathBuf,
}

impl<'a> ArchiveExtractor<'a> {
    pub fn new(store: &'a TileStore, layouts: &'a LayoutRegistry, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            layouts,
            download_dir: download_dir.into(),
        }
    }

    /// Extract every archive whose tile is downloaded but not yet unzipped
    pub fn run(&self) -> PipelineResult<ExtractionReport> {
        log::info!("Scanning {} for archives to extract", self.download_dir.display());
        let mut report = ExtractionReport::default();

        if !self.download_dir.is_dir() {
            log::warn!("Download directory {} does not exist", self.download_dir.display());
            return Ok(report);
        }

        for archive in self.list_archives()? {
            let Some(tile) = self.tile_for_archive(&archive)? else {
                log::debug!("No tile registered for {}, leaving it in place", archive.display());
                report.skipped += 1;
                continue;
            };

            // The folder on disk decides; a recorded unzip with no folder is extracted again
            if tile.is_unzipped() && self.download_dir.join(&tile.folder_name).is_dir() {
                log::debug!("Tile {} already unzipped, ignoring {}", tile.id, archive.display());
                report.skipped += 1;
                continue;
            }
            if !tile.is_downloaded() {
                log::debug!("Tile {} download not confirmed, skipping {}", tile.id, archive.display());
                report.skipped += 1;
                continue;
            }

            match self.extract_tile(&archive, &tile) {
                Ok(()) => report.extracted.push(tile.id),
                Err(e) => {
                    log::warn!("{}", e);
                    report.failures.push(e);
                }
            }
        }

        // Interrupted after deleting the archive but before recording the state
        for tile in self.store.tiles_pending_extraction()? {
            let folder = self.download_dir.join(&tile.folder_name);
            let has_archive = self.archive_for_tile(&tile)?.is_some();
            if folder.is_dir() && !has_archive {
                log::info!("Folder {} present for tile {}, recording as unzipped", folder.display(), tile.id);
                self.store.record_unzipped(tile.id)?;
                report.reconciled.push(tile.id);
            }
        }

        log::info!(
            "Extraction pass complete: {} extracted, {} reconciled, {} skipped, {} failed",
            report.extracted.len(),
            report.reconciled.len(),
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }

    fn list_archives(&self) -> PipelineResult<Vec<PathBuf>> {
        let mut archives = Vec::new();
        for entry in fs::read_dir(&self.download_dir)? {
            let path = entry?.path();
            if path.is_file() && ArchiveKind::from_path(&path).is_some() {
                archives.push(path);
            }
        }
        archives.sort();
        Ok(archives)
    }

    fn tile_for_archive(&self, archive: &Path) -> PipelineResult<Option<Tile>> {
        let Some(name) = archive.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        for folder in self.layouts.candidate_folders(name) {
            if let Some(tile) = self.store.find_tile_by_folder_name(&folder)? {
                return Ok(Some(tile));
            }
        }
        Ok(None)
    }

    fn archive_for_tile(&self, tile: &Tile) -> PipelineResult<Option<PathBuf>> {
        let layout = self.layouts.get(tile.platform)?;
        Ok(self
            .list_archives()?
            .into_iter()
            .find(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| layout.folder_for_archive(n))
                    .map(|folder| folder == tile.folder_name)
                    .unwrap_or(false)
            }))
    }

    fn extract_tile(&self, archive: &Path, tile: &Tile) -> PipelineResult<()> {
        log::info!("Extracting {} for tile {}", archive.display(), tile.id);
        let folder = extract_archive(archive, &self.download_dir, &tile.folder_name)?;

        fs::remove_file(archive)?;
        self.store.record_unzipped(tile.id)?;
        log::info!("Tile {} unzipped to {}", tile.id, folder.display());
        Ok(())
    }
}

/// Unpack `archive` so that its content ends up in `download_dir/folder_name`.
///
/// Archives that already wrap everything in a top-level `folder_name`
/// directory (as SAFE products do) are unpacked into `download_dir`; anything
/// else is unpacked into the folder itself. Existing files are overwritten.
pub fn extract_archive(archive: &Path, download_dir: &Path, folder_name: &str) -> PipelineResult<PathBuf> {
    match ArchiveKind::from_path(archive) {
        Some(ArchiveKind::Zip) => extract_zip(archive, download_dir, folder_name),
        Some(ArchiveKind::TarGz) => extract_tar_gz(archive, download_dir, folder_name),
        None => Err(PipelineError::Extraction {
            path: archive.to_path_buf(),
            message: "Unsupported archive format".to_string(),
        }),
    }
}

fn extract_zip(archive: &Path, download_dir: &Path, folder_name: &str) -> PipelineResult<PathBuf> {
    let fail = |message: String| PipelineError::Extraction {
        path: archive.to_path_buf(),
        message,
    };

    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(|e| fail(format!("Failed to open ZIP: {}", e)))?;

    let wrapped = zip.len() > 0
        && zip.file_names().all(|name| {
            matches!(Path::new(name).components().next(), Some(Component::Normal(first)) if first == folder_name)
        });
    let root = if wrapped {
        download_dir.to_path_buf()
    } else {
        download_dir.join(folder_name)
    };
    let target = download_dir.join(folder_name);
    fs::create_dir_all(&root)?;

    log::debug!("Unpacking {} entries into {}", zip.len(), root.display());

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| fail(format!("Failed to read ZIP entry {}: {}", i, e)))?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| fail(format!("Entry {} escapes the target folder", entry.name())))?;
        let destination = root.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&destination)?;
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&destination)?;
        io::copy(&mut entry, &mut out).map_err(|e| fail(format!("Failed to unpack {}: {}", entry.name(), e)))?;
    }

    if !target.is_dir() {
        return Err(fail(format!("Folder {} missing after extraction", target.display())));
    }
    Ok(target)
}

/// Gzipped tarball into `download_dir/folder_name`, dropping a leading `folder_name` component
fn extract_tar_gz(archive: &Path, download_dir: &Path, folder_name: &str) -> PipelineResult<PathBuf> {
    let fail = |message: String| PipelineError::Extraction {
        path: archive.to_path_buf(),
        message,
    };

    let target = download_dir.join(folder_name);
    let mut tarball = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    let entries = tarball
        .entries()
        .map_err(|e| fail(format!("Failed to open tarball: {}", e)))?;

    log::debug!("Unpacking {} into {}", archive.display(), target.display());
    let mut unpacked = 0usize;

    for entry in entries {
        let mut entry = entry.map_err(|e| fail(format!("Failed to read tar entry: {}", e)))?;
        let name = entry
            .path()
            .map_err(|e| fail(format!("Invalid tar entry name: {}", e)))?
            .into_owned();

        let mut components = Vec::new();
        for component in name.components() {
            match component {
                Component::Normal(part) => components.push(part.to_os_string()),
                Component::CurDir => {}
                _ => return Err(fail(format!("Entry {} escapes the target folder", name.display()))),
            }
        }
        if components.first().map(|first| first == folder_name).unwrap_or(false) {
            components.remove(0);
        }
        if components.is_empty() {
            continue;
        }
        let destination = components.iter().fold(target.clone(), |path, part| path.join(part));

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&destination)?;
            continue;
        }
        if !kind.is_file() {
            log::debug!("Skipping non-regular tar entry {}", name.display());
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&destination)?;
        io::copy(&mut entry, &mut out).map_err(|e| fail(format!("Failed to unpack {}: {}", name.display(), e)))?;
        unpacked += 1;
    }

    if unpacked == 0 || !target.is_dir() {
        return Err(fail(format!("No files unpacked into {}", target.display())));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, data) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &str)]) {
        let encoder = flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_archive_kind_from_name() {
        assert_eq!(ArchiveKind::from_path(Path::new("/d/S1A_X.zip")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("LC08_X.tar.gz")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path(Path::new("LC08_X.TGZ")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path(Path::new("LC08_X.tar")), None);
        assert_eq!(ArchiveKind::from_path(Path::new("LC08_X.zip.part")), None);
    }

    #[test]
    fn test_flat_tarball_lands_in_folder() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("LC08_TEST.tar.gz");
        write_tar_gz(&archive, &[("LC08_TEST_SR_B4.TIF", "II*"), ("LC08_TEST_MTL.txt", "meta")]);

        let folder = extract_archive(&archive, temp.path(), "LC08_TEST").unwrap();
        assert_eq!(folder, temp.path().join("LC08_TEST"));
        assert_eq!(fs::read(folder.join("LC08_TEST_SR_B4.TIF")).unwrap(), b"II*");
        assert!(folder.join("LC08_TEST_MTL.txt").is_file());
    }

    #[test]
    fn test_wrapped_tarball_is_not_nested() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("LC08_TEST.tar.gz");
        write_tar_gz(&archive, &[("LC08_TEST/LC08_TEST_SR_B5.TIF", "II*")]);

        let folder = extract_archive(&archive, temp.path(), "LC08_TEST").unwrap();
        assert!(folder.join("LC08_TEST_SR_B5.TIF").is_file());
        assert!(!folder.join("LC08_TEST").exists());
    }

    #[test]
    fn test_corrupt_tarball_is_extraction_error() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("LC08_BROKEN.tar.gz");
        fs::write(&archive, b"\x1f\x8b not really gzip").unwrap();

        let result = extract_archive(&archive, temp.path(), "LC08_BROKEN");
        assert!(matches!(result, Err(PipelineError::Extraction { .. })));
        assert!(archive.exists());
    }

    #[test]
    fn test_wrapped_archive_lands_in_folder() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("S1A_TEST.zip");
        write_zip(&archive, &[
            ("S1A_TEST.SAFE/manifest.safe", "<xml/>"),
            ("S1A_TEST.SAFE/measurement/s1a-vv.tiff", "II*"),
        ]);

        let folder = extract_archive(&archive, temp.path(), "S1A_TEST.SAFE").unwrap();
        assert_eq!(folder, temp.path().join("S1A_TEST.SAFE"));
        assert!(folder.join("measurement/s1a-vv.tiff").is_file());
        assert!(!folder.join("S1A_TEST.SAFE").exists());
    }

    #[test]
    fn test_flat_archive_is_wrapped_in_folder() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("LC08_TEST.zip");
        write_zip(&archive, &[("LC08_TEST_SR_B4.TIF", "II*"), ("LC08_TEST_MTL.txt", "meta")]);

        let folder = extract_archive(&archive, temp.path(), "LC08_TEST").unwrap();
        assert!(folder.join("LC08_TEST_SR_B4.TIF").is_file());
        assert!(folder.join("LC08_TEST_MTL.txt").is_file());
    }

    #[test]
    fn test_corrupt_archive_is_extraction_error() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("BROKEN.zip");
        fs::write(&archive, b"PK\x03\x04 definitely not a zip").unwrap();

        let result = extract_archive(&archive, temp.path(), "BROKEN.SAFE");
        assert!(matches!(result, Err(PipelineError::Extraction { .. })));
        assert!(archive.exists());
    }

    #[test]
    fn test_reextraction_overwrites() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("S2A_TEST.zip");
        write_zip(&archive, &[("S2A_TEST.SAFE/GRANULE/T1/IMG_DATA/T1_B04.jp2", "new")]);

        let stale = temp.path().join("S2A_TEST.SAFE/GRANULE/T1/IMG_DATA/T1_B04.jp2");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"half-written").unwrap();

        extract_archive(&archive, temp.path(), "S2A_TEST.SAFE").unwrap();
        assert_eq!(fs::read(&stale).unwrap(), b"new");
    }
}
