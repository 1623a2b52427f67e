//! Capture to disk and replay from disk.
//!
//! Archives store complete packet frames exactly as received; they know
//! nothing about decoded structure. Each category is one append-only file of
//! concatenated frames named after the category prefix, e.g. `track.bin`.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use mesak_frame::{decode, Category, CompleteFrame, FrameError, PacketReader, TypedPacket};

use crate::error::Result;

/// Write side of a capture.
pub trait Archive: Send + Sync {
    fn write_frame(&self, category: Category, frame: &[u8]) -> Result<()>;
}

/// Read side of a capture.
pub trait FrameSource {
    /// Next stored frame of `category`, or `None` when exhausted.
    fn read_frame(&mut self, category: Category) -> Result<Option<CompleteFrame>>;
}

/// File name used for `category` inside an archive directory.
pub fn file_name(category: Category) -> String {
    format!("{}.bin", category.prefix())
}

/// Directory archive with one append-only file per category.
#[derive(Debug)]
pub struct DirArchive {
    dir: PathBuf,
    files: Mutex<[Option<File>; Category::COUNT]>,
}

impl DirArchive {
    /// Use `dir` as archive root, creating it if needed.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: Mutex::new(Default::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, category: Category) -> PathBuf {
        self.dir.join(file_name(category))
    }
}

impl Archive for DirArchive {
    fn write_frame(&self, category: Category, frame: &[u8]) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = &mut files[category.index()];
        if slot.is_none() {
            let path = self.path_for(category);
            tracing::debug!(path = %path.display(), "opening archive file");
            *slot = Some(OpenOptions::new().create(true).append(true).open(path)?);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(frame)?;
        }
        Ok(())
    }
}

/// Reads frames back from a [`DirArchive`] directory.
pub struct DirSource {
    dir: PathBuf,
    readers: [Option<PacketReader<BufReader<File>>>; Category::COUNT],
    exhausted: [bool; Category::COUNT],
}

impl DirSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("archive directory {} not found", dir.display()),
            )
            .into());
        }
        Ok(Self {
            dir,
            readers: Default::default(),
            exhausted: [false; Category::COUNT],
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn reader(&mut self, category: Category) -> Result<Option<&mut PacketReader<BufReader<File>>>> {
        let index = category.index();
        if self.exhausted[index] {
            return Ok(None);
        }
        if self.readers[index].is_none() {
            let path = self.dir.join(file_name(category));
            if !path.exists() {
                self.exhausted[index] = true;
                return Ok(None);
            }
            let file = File::open(path)?;
            self.readers[index] = Some(PacketReader::new(BufReader::new(file), category));
        }
        Ok(self.readers[index].as_mut())
    }
}

impl FrameSource for DirSource {
    fn read_frame(&mut self, category: Category) -> Result<Option<CompleteFrame>> {
        loop {
            let Some(reader) = self.reader(category)? else {
                return Ok(None);
            };
            match reader.read_frame() {
                Ok(frame) => return Ok(Some(frame)),
                Err(FrameError::ConnectionClosed) => {
                    if !reader.is_idle() {
                        tracing::warn!(category = %category, "archive ends with a partial packet");
                    }
                    self.exhausted[category.index()] = true;
                    return Ok(None);
                }
                Err(err) if err.is_recoverable() => {
                    tracing::warn!(category = %category, error = %err, "skipping corrupt archive data");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Decoded, per-category playback of an archive.
pub struct Replay<S = DirSource> {
    source: S,
    peeked: [Option<TypedPacket>; Category::COUNT],
}

impl Replay<DirSource> {
    /// Replay the archive stored in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(DirSource::open(dir)?))
    }
}

impl<S: FrameSource> Replay<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            peeked: Default::default(),
        }
    }

    /// Next packet of `category`. Frames that fail to decode are skipped.
    pub fn get_data(&mut self, category: Category) -> Result<Option<TypedPacket>> {
        if let Some(packet) = self.peeked[category.index()].take() {
            return Ok(Some(packet));
        }
        self.next_decoded(category)
    }

    /// Skip the next packet of `category`. Returns false when none is left.
    pub fn seek(&mut self, category: Category) -> Result<bool> {
        Ok(self.get_data(category)?.is_some())
    }

    /// True when no packet of `category` remains.
    pub fn is_empty(&mut self, category: Category) -> Result<bool> {
        let index = category.index();
        if self.peeked[index].is_none() {
            self.peeked[index] = self.next_decoded(category)?;
        }
        Ok(self.peeked[index].is_none())
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    fn next_decoded(&mut self, category: Category) -> Result<Option<TypedPacket>> {
        while let Some(frame) = self.source.read_frame(category)? {
            match decode(frame, category) {
                Ok(packet) => return Ok(Some(packet)),
                Err(err) => {
                    tracing::warn!(category = %category, error = %err, "dropping undecodable archived packet");
                }
            }
        }
        Ok(None)
    }
}
