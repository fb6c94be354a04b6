use crate::types::{ArtifactHashes, ArtifactName};
use crate::utils::retry_interrupted;
use fs4::FileExt;
use std::{
    fs,
    fs::File,
    io,
    io::{Read, Seek, SeekFrom, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
};

/// Types that can be used as keys of a [`FileStore`].
pub trait CacheKey {
    /// Returns the relative path under which the data for this key is stored.
    fn key(&self) -> PathBuf;
}

impl<T: CacheKey + ?Sized> CacheKey for &T {
    fn key(&self) -> PathBuf {
        (*self).key()
    }
}

impl CacheKey for [u8] {
    fn key(&self) -> PathBuf {
        let hash = rattler_digest::compute_bytes_digest::<rattler_digest::Sha256>(self);
        bytes_to_path_suffix(hash.as_slice())
    }
}

// Some filesystems don't cope well with a single directory containing lots of files, so
// hashed keys are dispersed over nested directories. With depth 3 and a fanout of 64 the
// entries spread over 64**3 = 262144 directories:
//   ${BASE}/${CHAR}/${CHAR}/${CHAR}/${ENTRY}
const DIR_NEST_DEPTH: usize = 3;

fn bytes_to_path_suffix(bytes: &[u8]) -> PathBuf {
    let mut path = PathBuf::new();
    let enc = data_encoding::BASE64URL_NOPAD.encode(bytes);
    for i in 0..DIR_NEST_DEPTH {
        path.push(&enc[i..i + 1]);
    }
    path.push(&enc[DIR_NEST_DEPTH..]);
    path
}

impl CacheKey for ArtifactHashes {
    fn key(&self) -> PathBuf {
        let mut path = PathBuf::new();
        if let Some(sha256) = &self.sha256 {
            path.push("sha256");
            path.push(bytes_to_path_suffix(sha256.as_slice()))
        } else {
            unreachable!("should never construct a cache key from an empty hash set")
        }
        path
    }
}

// Artifacts are stored under human-readable paths so a cache inspection shows what is
// taking the space: {normalized-name}/{version}/{filename}.
impl CacheKey for ArtifactName {
    fn key(&self) -> PathBuf {
        self.cache_key()
    }
}

/// A file-locked store of immutable files on the local filesystem, shared between
/// concurrent resolver runs and between processes.
///
/// Writers stream into a temporary file on the same filesystem and atomically rename it
/// into place, so a reader observes either no file or a complete file, never a partial
/// one. A per-key exclusive lock makes sure exactly one writer fills a missing entry while
/// other interested parties wait. Entries are never modified once present.
#[derive(Debug)]
pub struct FileStore {
    base: PathBuf,
    tmp: PathBuf,
}

impl FileStore {
    /// Constructs a new instance rooted at the given `base` directory.
    pub fn new(base: &Path) -> io::Result<Self> {
        fs::create_dir_all(base)?;

        // Canonicalize now that the directory is known to exist
        let base = base.canonicalize()?;

        // The temporary directory lives inside the base directory to guarantee both are on
        // the same filesystem, which the atomic rename needs.
        let tmp = base.join(".tmp");
        fs::create_dir_all(&tmp)?;

        Ok(Self { base, tmp })
    }

    /// Gets readable access to the data with the specified key. If no such entry exists
    /// the function `f` is called to populate it.
    pub fn get_or_set<K: CacheKey, F>(&self, key: &K, f: F) -> io::Result<impl Read + Seek>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let lock = self.lock(key)?;
        if let Some(reader) = lock.reader() {
            // Safe to detach from the lock: an existing entry is immutable.
            Ok(reader.detach_unlocked())
        } else {
            let mut writer = lock.begin()?;
            f(&mut writer)?;
            Ok(writer.commit()?.detach_unlocked())
        }
    }

    /// Like [`FileStore::get_or_set`] but returns the path of the final file instead of a
    /// reader. The path is valid indefinitely: entries are immutable and never expire.
    pub fn get_or_set_path<K: CacheKey, F>(&self, key: &K, f: F) -> io::Result<PathBuf>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let lock = self.lock(key)?;
        if !lock.path.is_file() {
            let mut writer = lock.begin()?;
            f(&mut writer)?;
            writer.commit()?;
        }
        Ok(lock.path.clone())
    }

    /// Gets readable access to the data with the specified key. Returns `None` if no such
    /// key exists in the store.
    pub fn get<K: CacheKey>(&self, key: &K) -> Option<impl Read + Seek> {
        if let Some(lock) = self.lock_if_exists(key) {
            if let Some(reader) = lock.reader() {
                return Some(reader.detach_unlocked());
            }
        }
        None
    }

    /// Locks a certain file in the cache for exclusive access.
    pub fn lock<K: CacheKey>(&self, key: &K) -> io::Result<FileLock> {
        let path = self.base.join(key.key());
        let lock = lock(&path, LockMode::Lock)?;
        Ok(FileLock {
            tmp: self.tmp.clone(),
            _lock_file: lock,
            path,
        })
    }

    /// Locks a certain file in the cache for exclusive access, but only if it exists.
    ///
    /// Separate from [`FileStore::lock`] so that merely probing for an entry does not
    /// create piles of empty directories.
    pub fn lock_if_exists<K: CacheKey>(&self, key: &K) -> Option<FileLock> {
        let path = self.base.join(key.key());
        lock(&path, LockMode::IfExists).ok().map(|lock| FileLock {
            tmp: self.tmp.clone(),
            _lock_file: lock,
            path,
        })
    }
}

/// Writes a new entry. Created from a [`FileLock`]; the lifetime ties the writer to the
/// exclusive lock. The data goes to a temporary file that is atomically persisted to the
/// final location by [`LockedWriter::commit`].
pub struct LockedWriter<'a> {
    path: &'a Path,
    f: tempfile::NamedTempFile,
}

impl<'a> Write for LockedWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.f.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.f.flush()
    }
}

impl<'a> Seek for LockedWriter<'a> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.f.seek(pos)
    }
}

impl<'a> LockedWriter<'a> {
    /// Persist the written content to its final path. Returns a [`LockedReader`] for
    /// reading it back.
    pub fn commit(self) -> io::Result<LockedReader<'a>> {
        self.f.as_file().sync_data()?;
        let mut file = self.f.persist(self.path)?;
        file.rewind()?;
        Ok(LockedReader {
            file,
            _data: Default::default(),
        })
    }
}

/// Reads an entry while the corresponding [`FileLock`] is held.
pub struct LockedReader<'a> {
    file: File,
    _data: PhantomData<&'a ()>,
}

impl<'a> Read for LockedReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl<'a> Seek for LockedReader<'a> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl<'a> LockedReader<'a> {
    /// Returns the underlying file, dropping the tie to the lock. Only sound because
    /// committed entries are immutable.
    pub fn detach_unlocked(self) -> File {
        self.file
    }
}

/// Holds the per-key lock of a [`FileStore`] entry; grants readable or writable access.
pub struct FileLock {
    /// The directory for temporary files.
    tmp: PathBuf,

    /// The lock-file. Exclusive access lasts as long as this stays open.
    _lock_file: File,

    /// The path of the file that is actually locked.
    path: PathBuf,
}

impl FileLock {
    /// The path of the locked file. May not exist yet.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates a reader for the locked file, or `None` if it does not exist yet.
    pub fn reader(&self) -> Option<LockedReader> {
        Some(LockedReader {
            file: File::open(&self.path).ok()?,
            _data: Default::default(),
        })
    }

    /// Starts writing the contents of the file. Call [`LockedWriter::commit`] to persist.
    pub fn begin(&self) -> io::Result<LockedWriter> {
        Ok(LockedWriter {
            path: &self.path,
            f: tempfile::NamedTempFile::new_in(&self.tmp)?,
        })
    }

    /// Removes the file from the store.
    pub fn remove(self) -> io::Result<()> {
        fs::remove_file(self.path)?;
        Ok(())
    }
}

#[derive(Eq, PartialEq)]
enum LockMode {
    Lock,
    IfExists,
}

/// Creates and locks a `.lock` file next to the file at `path`. Only a single process can
/// hold the lock at a time.
fn lock(path: &Path, mode: LockMode) -> io::Result<File> {
    let lock_path = path.with_extension(".lock");

    // On windows the file must be opened writable to deny access to other processes.
    let mut open_options = fs::OpenOptions::new();
    open_options.write(true);

    // Only create parent directories when actually locking; probing must stay free of
    // side effects.
    if mode == LockMode::Lock {
        let dir = lock_path
            .parent()
            .expect("expected the file to be rooted in some folder");
        std::fs::create_dir_all(dir)?;
        open_options.create(true);
    }

    let lock = open_options.open(&lock_path)?;

    // On unix this is a thin wrapper around flock(2), which doesn't handle EINTR, so keep
    // retrying when that happens.
    retry_interrupted(|| lock.lock_exclusive())?;

    Ok(lock)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        let hello = b"Hello, world!".as_slice();

        let mut read_back = Vec::new();
        store
            .get_or_set(&hello, |w| w.write_all(hello))
            .unwrap()
            .read_to_end(&mut read_back)
            .unwrap();
        assert_eq!(read_back, hello);
    }

    #[test]
    fn test_get_or_set_path_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        let key = b"some-key".as_slice();

        let path1 = store
            .get_or_set_path(&key, |w| w.write_all(b"payload"))
            .unwrap();
        // the writer must not run again for an existing entry
        let path2 = store
            .get_or_set_path(&key, |_| panic!("entry already present"))
            .unwrap();
        assert_eq!(path1, path2);
        assert_eq!(fs::read(&path1).unwrap(), b"payload");
    }

    #[test]
    fn test_missing_entry_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.get(&b"nothing here".as_slice()).is_none());
    }

    #[tokio::test]
    async fn test_locking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entry");
        let path2 = path.clone();

        let notify = Arc::new(Notify::new());
        let notify2 = notify.clone();
        let notify3 = notify.clone();

        let one = tokio::spawn(async move {
            let _lock = lock(&path, LockMode::Lock).unwrap();
            notify2.notify_one();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        });

        let two = tokio::spawn(async move {
            notify3.notified().await;
            // blocks until the first lock is dropped
            tokio::task::spawn_blocking(move || lock(&path2, LockMode::Lock))
                .await
                .unwrap()
                .unwrap();
        });

        let (a, b) = tokio::join!(one, two);
        a.unwrap();
        b.unwrap();
    }
}
