use crate::codec;
use crate::config::SelectorConfig;
use crate::error::{BridgeError, Result};
use crate::store::InboundStore;
use crate::tensor::{placeholder, Selection, PLACEHOLDER_SIZE};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// Extensions recognized by the directory-backed selector (lowercase)
pub const RECOGNIZED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// A source of "latest wins" images for the pipeline
///
/// Implementations never fail just because nothing is available yet; they
/// return the placeholder instead.
pub trait ImageSource {
    /// Newest image split into (RGB plane, mask plane)
    fn select_latest(&self) -> Result<Selection>;

    /// Value that changes whenever `select_latest` could return something new
    fn fingerprint(&self) -> f64;
}

/// Select the newest image held by the store, or a placeholder when empty
pub fn select_latest(store: &InboundStore, placeholder_size: u32) -> Selection {
    match store.latest() {
        Some(entry) => {
            trace!(image_id = entry.sequence_key, "Selected latest received image");
            codec::split_planes(&entry.image)
        }
        None => {
            debug!("No image received yet, using placeholder");
            placeholder(placeholder_size)
        }
    }
}

/// Store-backed image source
#[derive(Clone)]
pub struct StoreSource {
    store: Arc<InboundStore>,
    placeholder_size: u32,
}

impl StoreSource {
    pub fn new(store: Arc<InboundStore>) -> Self {
        Self {
            store,
            placeholder_size: PLACEHOLDER_SIZE,
        }
    }

    pub fn with_placeholder_size(mut self, size: u32) -> Self {
        self.placeholder_size = size;
        self
    }
}

impl ImageSource for StoreSource {
    fn select_latest(&self) -> Result<Selection> {
        Ok(select_latest(&self.store, self.placeholder_size))
    }

    /// Newest sequence key; `0` while the store is empty
    fn fingerprint(&self) -> f64 {
        self.store
            .latest()
            .map(|entry| entry.sequence_key as f64)
            .unwrap_or(0.0)
    }
}

/// A candidate image file in the watched directory
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeFileEntry {
    pub filename: String,
    pub modified: SystemTime,
}

impl BridgeFileEntry {
    /// Modification time as seconds since the Unix epoch
    pub fn modified_secs(&self) -> f64 {
        system_time_secs(self.modified)
    }
}

fn system_time_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Whether a filename carries a recognized raster extension (case-insensitive)
pub fn has_recognized_extension(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            RECOGNIZED_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// List image files in `dir`, read live from the filesystem
pub fn list_entries(dir: &Path) -> io::Result<Vec<BridgeFileEntry>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        let filename = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if !has_recognized_extension(&filename) {
            continue;
        }

        // Entries can vanish between listing and stat
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(_) => continue,
        };

        entries.push(BridgeFileEntry { filename, modified });
    }

    Ok(entries)
}

/// Newest entry by modification time; ties go to the greatest filename
pub fn newest_entry(entries: &[BridgeFileEntry]) -> Option<&BridgeFileEntry> {
    entries
        .iter()
        .max_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.filename.cmp(&b.filename))
        })
}

/// Largest modification time among image files, or the current time when
/// the directory is missing, empty or unreadable
pub fn change_fingerprint(dir: &Path) -> f64 {
    match list_entries(dir) {
        Ok(entries) => entries
            .iter()
            .map(BridgeFileEntry::modified_secs)
            .fold(None, |acc: Option<f64>, secs| {
                Some(acc.map_or(secs, |current| current.max(secs)))
            })
            .unwrap_or_else(now_secs),
        Err(_) => now_secs(),
    }
}

fn now_secs() -> f64 {
    system_time_secs(SystemTime::now())
}

/// Directory-backed image source
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    placeholder_size: u32,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            placeholder_size: PLACEHOLDER_SIZE,
        }
    }

    pub fn from_config(config: &SelectorConfig) -> Self {
        Self::new(config.input_dir.clone()).with_placeholder_size(config.placeholder_size)
    }

    pub fn with_placeholder_size(mut self, size: u32) -> Self {
        self.placeholder_size = size;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Newest image file currently in the directory
    pub fn newest(&self) -> Option<BridgeFileEntry> {
        let entries = list_entries(&self.dir).ok()?;
        newest_entry(&entries).cloned()
    }
}

impl ImageSource for DirectorySource {
    fn select_latest(&self) -> Result<Selection> {
        let Some(entry) = self.newest() else {
            debug!(dir = %self.dir.display(), "No image files found, using placeholder");
            return Ok(placeholder(self.placeholder_size));
        };

        let path = self.dir.join(&entry.filename);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Selected file disappeared, using placeholder");
                return Ok(placeholder(self.placeholder_size));
            }
            Err(e) => return Err(BridgeError::Io(e)),
        };

        let (image, mode) = codec::decode(&bytes)?;
        debug!(
            filename = %entry.filename,
            mode = mode.as_str(),
            width = image.width(),
            height = image.height(),
            "Selected newest image file"
        );

        Ok(codec::split_planes(&image))
    }

    fn fingerprint(&self) -> f64 {
        change_fingerprint(&self.dir)
    }
}

/// Caller-side cache of the last selection.
///
/// The selection is recomputed whenever the source fingerprint changes or
/// the manual counter is bumped with [`SelectionCache::invalidate`].
pub struct SelectionCache<S> {
    source: S,
    manual_counter: u64,
    cached: Option<CachedSelection>,
    recomputations: u64,
}

struct CachedSelection {
    fingerprint: f64,
    manual_counter: u64,
    selection: Selection,
}

impl<S: ImageSource> SelectionCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            manual_counter: 0,
            cached: None,
            recomputations: 0,
        }
    }

    /// Current selection, recomputed only when stale
    pub fn get(&mut self) -> Result<&Selection> {
        let fingerprint = self.source.fingerprint();
        let manual_counter = self.manual_counter;

        let cached = match self.cached.take() {
            Some(cached)
                if cached.fingerprint == fingerprint && cached.manual_counter == manual_counter =>
            {
                cached
            }
            _ => {
                let selection = self.source.select_latest()?;
                self.recomputations += 1;
                trace!(fingerprint, manual_counter, "Selection recomputed");
                CachedSelection {
                    fingerprint,
                    manual_counter,
                    selection,
                }
            }
        };

        Ok(&self.cached.insert(cached).selection)
    }

    /// Force the next `get` to recompute
    pub fn invalidate(&mut self) {
        self.manual_counter += 1;
    }

    /// Number of times the selection has been computed
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
