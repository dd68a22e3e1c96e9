//! Segment mappings
//!
//! [`Mapping`] owns `size_of::<T>()` bytes of a named segment. The mode marker
//! decides cleanup: a [`Creator`] unmaps and unlinks the name, an [`Opener`]
//! only unmaps.

use super::{Result, ShmError};
use crate::disruptor::SharedRegion;
use rustix::fd::OwnedFd;
use rustix::fs::{fstat, ftruncate, Mode};
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm;
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::Deref;
use std::ptr::{null_mut, NonNull};
use tracing::{debug, info, warn};

const NAME_MAX: usize = 255;

/// Cleanup behaviour of a [`Mapping`]
pub trait MappingMode {
    /// Whether dropping the mapping removes the segment's name
    const UNLINK_ON_DROP: bool;
}

/// Marker for the process that created the segment
#[derive(Debug)]
pub struct Creator;

impl MappingMode for Creator {
    const UNLINK_ON_DROP: bool = true;
}

/// Marker for processes that opened an existing segment
#[derive(Debug)]
pub struct Opener;

impl MappingMode for Opener {
    const UNLINK_ON_DROP: bool = false;
}

/// A named segment sized for one `T`, mapped read-write
///
/// The mapping hands out raw memory only. What lives in it is up to the
/// caller; see [`MappedRegion`] for the typed wrapper.
pub struct Mapping<T, M: MappingMode> {
    ptr: NonNull<T>,
    name: String,
    _mode: PhantomData<M>,
}

fn validate_name(name: &str) -> Result<()> {
    let reason = if !name.starts_with('/') {
        "name must start with '/'"
    } else if name[1..].contains('/') {
        "name must not contain another '/'"
    } else if name.len() > NAME_MAX {
        "name must be at most 255 bytes"
    } else {
        return Ok(());
    };
    Err(ShmError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

fn map_segment<T>(fd: &OwnedFd, name: &str) -> Result<NonNull<T>> {
    // SAFETY: a fresh shared mapping of a descriptor whose size was checked
    // or set to `size_of::<T>()`. It aliases nothing else in this process
    // and is page aligned, which satisfies any alignment of `T`.
    let raw = unsafe {
        mmap(
            null_mut(),
            size_of::<T>(),
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
    }
    .map_err(|error| ShmError::posix("mmap", name, error))?;

    NonNull::new(raw.cast::<T>()).ok_or_else(|| ShmError::posix("mmap", name, Errno::FAULT))
}

impl<T> Mapping<T, Creator> {
    /// Create the segment `name`, sized for `T` and zero filled
    ///
    /// # Errors
    /// `InvalidName` for a name `shm_open` would reject, `Posix` if any
    /// system call fails (`EEXIST` when the name is taken). A failure after
    /// the segment was created unlinks it again.
    pub fn create(name: &str) -> Result<Self> {
        validate_name(name)?;

        let fd = shm::open(
            name,
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(|error| ShmError::posix("shm_open", name, error))?;

        let mapped = ftruncate(&fd, size_of::<T>() as u64)
            .map_err(|error| ShmError::posix("ftruncate", name, error))
            .and_then(|()| map_segment::<T>(&fd, name));
        let ptr = match mapped {
            Ok(ptr) => ptr,
            Err(error) => {
                drop(fd);
                let _ = shm::unlink(name);
                return Err(error);
            }
        };

        debug!(name, size = size_of::<T>(), "shared memory created");
        Ok(Self {
            ptr,
            name: name.to_string(),
            _mode: PhantomData,
        })
    }
}

impl<T> Mapping<T, Opener> {
    /// Map the existing segment `name`
    ///
    /// # Errors
    /// `InvalidName`, `Posix` (`ENOENT` when nothing has that name) or
    /// `SizeMismatch` when the segment was created for another type.
    pub fn open(name: &str) -> Result<Self> {
        validate_name(name)?;

        let fd = shm::open(name, shm::OFlags::RDWR, Mode::empty())
            .map_err(|error| ShmError::posix("shm_open", name, error))?;

        let stat = fstat(&fd).map_err(|error| ShmError::posix("fstat", name, error))?;
        let expected = size_of::<T>();
        if stat.st_size != expected as i64 {
            return Err(ShmError::SizeMismatch {
                name: name.to_string(),
                expected,
                actual: stat.st_size,
            });
        }

        let ptr = map_segment::<T>(&fd, name)?;
        debug!(name, size = expected, "shared memory opened");
        Ok(Self {
            ptr,
            name: name.to_string(),
            _mode: PhantomData,
        })
    }
}

impl<T, M: MappingMode> Mapping<T, M> {
    /// Start of the mapped bytes in this process
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// The segment's name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T, M: MappingMode> Drop for Mapping<T, M> {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from `mmap` with exactly this length and nothing
        // borrowed from the mapping outlives `self`.
        if let Err(error) = unsafe { munmap(self.ptr.as_ptr().cast(), size_of::<T>()) } {
            warn!(name = %self.name, %error, "munmap failed");
        }
        if M::UNLINK_ON_DROP {
            if let Err(error) = shm::unlink(self.name.as_str()) {
                warn!(name = %self.name, %error, "shm_unlink failed");
            }
        }
    }
}

impl<T, M: MappingMode> fmt::Debug for Mapping<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("name", &self.name)
            .field("ptr", &self.ptr)
            .field("unlink_on_drop", &M::UNLINK_ON_DROP)
            .finish()
    }
}

/// A [`SharedRegion`] living in a named segment
///
/// Dereferences to the region, so [`SharedRegion::open_writer`] and
/// [`SharedRegion::join`] work the same as on a heap region. Producers and
/// consumers borrow from it and cannot outlive the mapping.
pub struct MappedRegion<T, const N: usize, const R: usize, M: MappingMode> {
    mapping: Mapping<SharedRegion<T, N, R>, M>,
}

// SAFETY: the region is only reached through `&SharedRegion`, which is itself
// shareable across threads; the mapping stays valid until drop.
unsafe impl<T, const N: usize, const R: usize, M: MappingMode> Send for MappedRegion<T, N, R, M> where
    SharedRegion<T, N, R>: Sync
{
}
unsafe impl<T, const N: usize, const R: usize, M: MappingMode> Sync for MappedRegion<T, N, R, M> where
    SharedRegion<T, N, R>: Sync
{
}

impl<T, const N: usize, const R: usize> MappedRegion<T, N, R, Creator>
where
    T: Copy + Default + Send + Sync,
{
    /// Create the segment `name` and initialise an empty region in it
    ///
    /// Open it from other processes only after this returns.
    ///
    /// # Errors
    /// See [`Mapping::create`].
    pub fn create(name: &str) -> Result<Self> {
        let mapping = Mapping::<SharedRegion<T, N, R>, Creator>::create(name)?;
        // SAFETY: the mapping is writable, page aligned, sized for the region
        // and stays mapped as long as `self`.
        unsafe { SharedRegion::init_in_place(mapping.as_ptr()) };
        info!(name, capacity = N, reader_slots = R, "shared region created");
        Ok(Self { mapping })
    }
}

impl<T, const N: usize, const R: usize> MappedRegion<T, N, R, Opener>
where
    T: Copy + Default + Send + Sync,
{
    /// Map the region another process created under `name`
    ///
    /// # Errors
    /// See [`Mapping::open`].
    pub fn open(name: &str) -> Result<Self> {
        let mapping = Mapping::<SharedRegion<T, N, R>, Opener>::open(name)?;
        info!(name, "shared region opened");
        Ok(Self { mapping })
    }
}

impl<T, const N: usize, const R: usize, M: MappingMode> MappedRegion<T, N, R, M> {
    /// The segment's name
    pub fn name(&self) -> &str {
        self.mapping.name()
    }

    /// Where the region sits in this process
    pub fn as_ptr(&self) -> *const SharedRegion<T, N, R> {
        self.mapping.as_ptr()
    }
}

impl<T, const N: usize, const R: usize, M> Deref for MappedRegion<T, N, R, M>
where
    T: Copy + Default + Send + Sync,
    M: MappingMode,
{
    type Target = SharedRegion<T, N, R>;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the creator initialised the region before any opener could
        // see the name, and the mapping lives as long as `self`.
        unsafe { SharedRegion::attach(self.mapping.as_ptr()) }
    }
}

impl<T, const N: usize, const R: usize, M: MappingMode> fmt::Debug for MappedRegion<T, N, R, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("mapping", &self.mapping)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{BusySpin, DisruptorError};
    use std::time::Duration;

    type Region = MappedRegion<u64, 8, 2, Creator>;
    type Attached = MappedRegion<u64, 8, 2, Opener>;

    fn unique_name(tag: &str) -> String {
        format!("/shmcast-test-{}-{tag}", std::process::id())
    }

    /// Create a segment, or `None` where this sandbox forbids shared memory
    fn create_or_skip(name: &str) -> Option<Region> {
        let _ = shm::unlink(name);
        match Region::create(name) {
            Ok(region) => Some(region),
            Err(error)
                if [Errno::ACCESS, Errno::NOENT, Errno::PERM]
                    .iter()
                    .any(|errno| error.errno() == Some(*errno)) =>
            {
                eprintln!("skipping: {error}");
                None
            }
            Err(error) => panic!("creating {name}: {error}"),
        }
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("/shmcast").is_ok());
        assert!(validate_name("/shmcast-demo_1").is_ok());
        assert!(matches!(
            validate_name("shmcast"),
            Err(ShmError::InvalidName { .. })
        ));
        assert!(validate_name("/shm/cast").is_err());
        assert!(validate_name(&format!("/{}", "x".repeat(NAME_MAX))).is_err());
    }

    #[test]
    fn test_open_missing_segment_fails() {
        let name = unique_name("missing");
        let _ = shm::unlink(name.as_str());
        let error = Attached::open(&name).unwrap_err();
        assert_eq!(error.errno(), Some(Errno::NOENT));
    }

    #[test]
    fn test_create_rejects_taken_name() {
        let name = unique_name("taken");
        let Some(_region) = create_or_skip(&name) else {
            return;
        };
        assert_eq!(Region::create(&name).unwrap_err().errno(), Some(Errno::EXIST));
    }

    #[test]
    fn test_open_rejects_other_layout() {
        let name = unique_name("layout");
        let Some(_region) = create_or_skip(&name) else {
            return;
        };
        let error = MappedRegion::<u64, 16, 2, Opener>::open(&name).unwrap_err();
        assert!(matches!(error, ShmError::SizeMismatch { .. }));
    }

    #[test]
    fn test_two_mappings_share_one_region() {
        let name = unique_name("share");
        let Some(created) = create_or_skip(&name) else {
            return;
        };
        let opened = Attached::open(&name).unwrap();
        assert_ne!(created.as_ptr(), opened.as_ptr());

        // Joined through one mapping, fed through the other
        let mut consumer = opened.join(BusySpin).unwrap();
        let mut producer = created.open_writer(BusySpin).unwrap();
        assert_eq!(created.reader_count(), 1);

        for value in 0..20u64 {
            producer.publish(value * 3).unwrap();
            assert_eq!(consumer.recv_timeout(Duration::from_secs(1)), Ok(value * 3));
        }
        assert_eq!(opened.writer_position(), 19);

        created.close();
        assert_eq!(consumer.recv(), Err(DisruptorError::Alert));
        drop(consumer);
        assert_eq!(created.reader_count(), 0);
    }

    #[test]
    fn test_creator_unlinks_on_drop() {
        let name = unique_name("unlink");
        let Some(created) = create_or_skip(&name) else {
            return;
        };
        let opened = Attached::open(&name).unwrap();
        drop(created);

        // The name is gone but the opener's mapping still works
        assert_eq!(Attached::open(&name).unwrap_err().errno(), Some(Errno::NOENT));
        assert_eq!(opened.reader_count(), 0);
        assert!(opened.open_writer(BusySpin).is_ok());
    }
}
