//! Capacity probe for the shared storage backend.
//!
//! Reads raw filesystem size with `statvfs(2)` and subtracts the space held
//! back for disk images. When images share the workload filesystem, the live
//! size of the image corpus is subtracted too. Nothing is cached: every call
//! re-reads the filesystem.

use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::config::SchedulerConfig;

const GIB: u64 = 1 << 30;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("statvfs {path}: {source}")]
    Statvfs {
        path: PathBuf,
        source: nix::Error,
    },

    #[error("scanning image corpus {path}: {source}")]
    ImageCorpus {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("invalid image name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Raw block counters of a filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub block_size: u64,
}

impl FsStats {
    // NB: allow() because the block count type is u32 on macOS.
    #[allow(clippy::useless_conversion, clippy::unnecessary_cast)]
    pub fn read(path: &Path) -> ProbeResult<Self> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|source| ProbeError::Statvfs {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            blocks: u64::from(stat.blocks()),
            block_size: stat.block_size() as u64,
        })
    }

    /// Total size in whole gigabytes, rounded down.
    pub fn total_gb(&self) -> u64 {
        let bytes = u128::from(self.blocks) * u128::from(self.block_size);
        u64::try_from(bytes / u128::from(GIB)).unwrap_or(u64::MAX)
    }
}

enum StatSource {
    Statvfs,
    Mock(FsStats),
}

/// Image files sitting directly in a directory, selected by name.
#[derive(Debug, Clone)]
pub struct ImageCorpus {
    dir: PathBuf,
    name_pattern: Regex,
}

impl ImageCorpus {
    pub fn new(dir: impl Into<PathBuf>, name_pattern: Regex) -> Self {
        Self {
            dir: dir.into(),
            name_pattern,
        }
    }

    /// Sum of sizes of matching regular files. Subdirectories are not entered.
    pub fn measure_bytes(&self) -> ProbeResult<u64> {
        let mut total = 0u64;
        for entry in walkdir::WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|source| ProbeError::ImageCorpus {
                path: self.dir.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if !self.name_pattern.is_match(name) {
                continue;
            }
            let metadata = entry.metadata().map_err(|source| ProbeError::ImageCorpus {
                path: entry.path().to_path_buf(),
                source,
            })?;
            total = total.saturating_add(metadata.len());
        }
        Ok(total)
    }
}

/// One capacity reading, all in gigabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReading {
    pub raw_gb: u64,
    pub reserved_image_gb: u64,
    /// Measured image corpus, rounded up. Zero unless images share storage.
    pub image_corpus_gb: u64,
}

impl ProbeReading {
    /// Space left for workloads. Negative when reservations exceed the disk.
    pub fn available_gb(&self) -> i64 {
        to_i64(self.raw_gb)
            .saturating_sub(to_i64(self.reserved_image_gb))
            .saturating_sub(to_i64(self.image_corpus_gb))
    }
}

pub struct CapacityProbe {
    shared_storage: PathBuf,
    reserved_image_gb: u64,
    corpus: Option<ImageCorpus>,
    source: StatSource,
}

impl CapacityProbe {
    pub fn new(shared_storage: impl Into<PathBuf>, reserved_image_gb: u64) -> Self {
        Self {
            shared_storage: shared_storage.into(),
            reserved_image_gb,
            corpus: None,
            source: StatSource::Statvfs,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> ProbeResult<Self> {
        let mut probe = Self::new(&config.shared_storage_folder, config.disk_images_size_gb);
        if config.images_share_storage {
            let pattern = Regex::new(&config.image_name_pattern)?;
            probe = probe.with_image_corpus(ImageCorpus::new(config.image_dir(), pattern));
        }
        Ok(probe)
    }

    /// Subtract the live size of `corpus` from every reading.
    pub fn with_image_corpus(mut self, corpus: ImageCorpus) -> Self {
        self.corpus = Some(corpus);
        self
    }

    /// Use fixed block counters instead of calling `statvfs`.
    pub fn with_mock_stats(mut self, stats: FsStats) -> Self {
        self.source = StatSource::Mock(stats);
        self
    }

    pub fn read(&self) -> ProbeResult<ProbeReading> {
        let stats = match &self.source {
            StatSource::Statvfs => FsStats::read(&self.shared_storage)?,
            StatSource::Mock(stats) => *stats,
        };
        let image_corpus_gb = match &self.corpus {
            Some(corpus) => corpus.measure_bytes()?.div_ceil(GIB),
            None => 0,
        };
        let reading = ProbeReading {
            raw_gb: stats.total_gb(),
            reserved_image_gb: self.reserved_image_gb,
            image_corpus_gb,
        };
        debug!(
            path = ?self.shared_storage,
            raw_gb = reading.raw_gb,
            image_corpus_gb,
            available_gb = reading.available_gb(),
            "shared storage probed"
        );
        Ok(reading)
    }

    /// Gigabytes available to instances and volumes right now.
    pub fn available_capacity(&self) -> ProbeResult<i64> {
        Ok(self.read()?.available_gb())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
