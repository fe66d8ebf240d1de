use fs2::FileExt;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, RetrievalError};
use crate::index::FlatIndex;

const FORMAT_VERSION: u32 = 1;
const CHUNKS_SUFFIX: &str = "_chunks.bin";

/// SHA-256 over an index and its chunk texts. Both files of a bundle carry it.
pub type Generation = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct BundleHeader {
    format_version: u32,
    generation: Generation,
    count: u64,
}

#[derive(Serialize)]
struct IndexRecordRef<'a> {
    header: BundleHeader,
    index: &'a FlatIndex,
}

#[derive(Deserialize)]
struct IndexRecord {
    header: BundleHeader,
    index: FlatIndex,
}

#[derive(Serialize)]
struct ChunkRecordRef<'a> {
    header: BundleHeader,
    chunks: &'a [String],
}

#[derive(Serialize, Deserialize)]
struct ChunkRecord {
    header: BundleHeader,
    chunks: Vec<String>,
}

/// An index together with the chunk texts its rows point at.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub index: FlatIndex,
    pub chunks: Vec<String>,
    pub generation: Generation,
}

impl Bundle {
    pub fn into_parts(self) -> (FlatIndex, Vec<String>) {
        (self.index, self.chunks)
    }

    pub fn generation_hex(&self) -> String {
        self.generation.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Two-file bundle on disk: the serialized index at `index_path` and the
/// chunk texts beside it (`doc.index` pairs with `doc_chunks.bin`).
///
/// Saves swap both files in under an exclusive lock on `<file name>.lock`;
/// loads read both under a shared lock, so a cooperating reader sees one
/// complete generation or the other.
#[derive(Debug, Clone)]
pub struct IndexStore {
    index_path: PathBuf,
    chunks_path: PathBuf,
    lock_path: PathBuf,
}

impl IndexStore {
    pub fn new(index_path: impl AsRef<Path>) -> Result<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        let file_name = index_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                RetrievalError::InvalidArgument(format!(
                    "index path '{}' has no file name",
                    index_path.display()
                ))
            })?;

        Ok(Self {
            chunks_path: chunks_path_for(&index_path),
            lock_path: index_path.with_file_name(format!("{}.lock", file_name)),
            index_path,
        })
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn chunks_path(&self) -> &Path {
        &self.chunks_path
    }

    pub fn exists(&self) -> bool {
        self.index_path.is_file() && self.chunks_path.is_file()
    }

    /// Replaces whatever bundle is at this path. After an error the on-disk
    /// state is unknown and the bundle has to be rebuilt.
    pub fn save(&self, index: &FlatIndex, chunks: &[String]) -> Result<Generation> {
        if chunks.len() != index.len() {
            return Err(RetrievalError::InvariantViolation(format!(
                "refusing to save {} chunks against {} vectors",
                chunks.len(),
                index.len()
            )));
        }

        if let Some(parent) = self.index_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                RetrievalError::io(format!("creating directory '{}'", parent.display()), e)
            })?;
        }

        let generation = generation_of(index, chunks);
        let header = BundleHeader {
            format_version: FORMAT_VERSION,
            generation,
            count: chunks.len() as u64,
        };
        let index_bytes = bincode::serialize(&IndexRecordRef { header, index })
            .map_err(|e| encode_failure("index", e))?;
        let chunk_bytes = bincode::serialize(&ChunkRecordRef { header, chunks })
            .map_err(|e| encode_failure("chunks", e))?;

        let _lock = BundleLock::exclusive(&self.lock_path)?;
        let index_tmp = tmp_path(&self.index_path);
        let chunks_tmp = tmp_path(&self.chunks_path);

        let swapped = write_file(&index_tmp, &index_bytes)
            .and_then(|_| write_file(&chunks_tmp, &chunk_bytes))
            .and_then(|_| rename(&index_tmp, &self.index_path))
            .and_then(|_| rename(&chunks_tmp, &self.chunks_path));
        if swapped.is_err() {
            let _ = fs::remove_file(&index_tmp);
            let _ = fs::remove_file(&chunks_tmp);
        }
        swapped?;

        log::info!(
            "Saved bundle of {} chunks to {} and {}",
            chunks.len(),
            self.index_path.display(),
            self.chunks_path.display()
        );
        Ok(generation)
    }

    pub fn load(&self) -> Result<Bundle> {
        for path in [&self.index_path, &self.chunks_path] {
            if !path.is_file() {
                return Err(RetrievalError::NotFound(path.clone()));
            }
        }

        let lock = BundleLock::shared(&self.lock_path)?;
        if lock.is_none() {
            log::debug!(
                "No lock file at {}, reading without a lock",
                self.lock_path.display()
            );
        }
        let IndexRecord {
            header: index_header,
            index,
        } = read_index_record(&self.index_path)?;
        let ChunkRecord {
            header: chunk_header,
            chunks,
        } = read_chunk_record(&self.chunks_path)?;

        if chunks.is_empty() {
            return Err(RetrievalError::EmptyResult(format!(
                "chunk file '{}' holds no chunks",
                self.chunks_path.display()
            )));
        }
        index.validate().map_err(RetrievalError::Corrupt)?;

        for header in [&index_header, &chunk_header] {
            if header.format_version != FORMAT_VERSION {
                return Err(RetrievalError::Corrupt(format!(
                    "unsupported bundle format version {}",
                    header.format_version
                )));
            }
        }
        if chunks.len() != index.len() {
            return Err(RetrievalError::Corrupt(format!(
                "{} chunks do not match {} indexed vectors",
                chunks.len(),
                index.len()
            )));
        }
        if index_header.count != index.len() as u64 || chunk_header.count != chunks.len() as u64 {
            return Err(RetrievalError::Corrupt(
                "bundle header count disagrees with its payload".into(),
            ));
        }
        if index_header.generation != chunk_header.generation {
            return Err(RetrievalError::Corrupt(
                "index and chunk files belong to different generations".into(),
            ));
        }
        let generation = generation_of(&index, &chunks);
        if generation != index_header.generation {
            return Err(RetrievalError::Corrupt("bundle checksum mismatch".into()));
        }

        log::debug!(
            "Loaded bundle of {} chunks ({} dimensions) from {}",
            chunks.len(),
            index.dimensions(),
            self.index_path.display()
        );
        Ok(Bundle {
            index,
            chunks,
            generation,
        })
    }
}

pub fn chunks_path_for(index_path: &Path) -> PathBuf {
    let stem = index_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    index_path.with_file_name(format!("{}{}", stem, CHUNKS_SUFFIX))
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

fn generation_of(index: &FlatIndex, chunks: &[String]) -> Generation {
    let mut hasher = Sha256::new();
    hasher.update((index.dimensions() as u64).to_le_bytes());
    for value in index.raw_data() {
        hasher.update(value.to_le_bytes());
    }
    hasher.update((chunks.len() as u64).to_le_bytes());
    for chunk in chunks {
        hasher.update((chunk.len() as u64).to_le_bytes());
        hasher.update(chunk.as_bytes());
    }
    hasher.finalize().into()
}

fn encode_failure(what: &str, err: bincode::Error) -> RetrievalError {
    RetrievalError::io(
        format!("encoding {}", what),
        io::Error::new(io::ErrorKind::InvalidData, err),
    )
}

fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => RetrievalError::NotFound(path.to_path_buf()),
        _ => RetrievalError::io(format!("opening '{}'", path.display()), e),
    })
}

fn read_index_record(path: &Path) -> Result<IndexRecord> {
    let file = open_existing(path)?;
    let len = file
        .metadata()
        .map_err(|e| RetrievalError::io(format!("reading metadata of '{}'", path.display()), e))?
        .len();
    if len == 0 {
        return Err(RetrievalError::Corrupt(format!(
            "index file '{}' is empty",
            path.display()
        )));
    }

    let mmap = unsafe { Mmap::map(&file) }
        .map_err(|e| RetrievalError::io(format!("mapping '{}'", path.display()), e))?;
    bincode::deserialize(&mmap).map_err(|e| {
        RetrievalError::Corrupt(format!("index file '{}': {}", path.display(), e))
    })
}

fn read_chunk_record(path: &Path) -> Result<ChunkRecord> {
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => RetrievalError::NotFound(path.to_path_buf()),
        _ => RetrievalError::io(format!("reading '{}'", path.display()), e),
    })?;
    bincode::deserialize(&bytes).map_err(|e| {
        RetrievalError::Corrupt(format!("chunk file '{}': {}", path.display(), e))
    })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)
        .map_err(|e| RetrievalError::io(format!("creating '{}'", path.display()), e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| RetrievalError::io(format!("writing '{}'", path.display()), e))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| {
        RetrievalError::io(
            format!("renaming '{}' to '{}'", from.display(), to.display()),
            e,
        )
    })
}

struct BundleLock {
    file: File,
}

impl BundleLock {
    fn exclusive(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| RetrievalError::io(format!("opening lock '{}'", path.display()), e))?;
        FileExt::lock_exclusive(&file)
            .map_err(|e| RetrievalError::io(format!("locking '{}'", path.display()), e))?;
        Ok(Self { file })
    }

    /// Read-only, so bundles on read-only volumes stay loadable. `None` when
    /// no save through a lock has happened at this path yet.
    fn shared(path: &Path) -> Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RetrievalError::io(
                    format!("opening lock '{}'", path.display()),
                    e,
                ))
            }
        };
        FileExt::lock_shared(&file)
            .map_err(|e| RetrievalError::io(format!("locking '{}'", path.display()), e))?;
        Ok(Some(Self { file }))
    }
}

impl Drop for BundleLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
