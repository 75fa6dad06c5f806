//! Ephemeral shared-memory pools for overlay pixel buffers.
//!
//! Each pool is backed by a POSIX shared-memory object created under a randomly generated name
//! name, immediately unlinked from the filesystem namespace after open so the file
//! descriptor is the only remaining handle — nothing else on the system can find it by name.

use std::os::fd::{AsFd, OwnedFd};

use anyhow::{bail, Context, Result};
use wayland_client::protocol::{wl_shm, wl_shm_pool};
use wayland_client::{Connection, Dispatch, QueueHandle};

use crate::random::RandomSource;

/// How many times `shm_open` may fail (name collision or `EINTR`) before giving up.
const MAX_CREATE_RETRIES: u32 = 100;

/// A `wl_shm_pool` backed by an anonymous, unlinked shared-memory file.
pub struct ShmPool {
    fd: OwnedFd,
    pub wl_pool: wl_shm_pool::WlShmPool,
    size: i32,
    data: *mut u8,
}

impl ShmPool {
    /// Creates a pool of at least `size` bytes, retrying transient failures up to
    /// [`MAX_CREATE_RETRIES`] times before treating the condition as fatal.
    pub fn create<D>(
        shm: &wl_shm::WlShm,
        qh: &QueueHandle<D>,
        rng: &mut RandomSource,
        size: i32,
    ) -> Result<Self>
    where
        D: Dispatch<wl_shm_pool::WlShmPool, ()> + 'static,
    {
        let fd = Self::open_retrying(rng, size)?;
        let wl_pool = shm.create_pool(fd.as_fd(), size, qh, ());

        let data = unsafe {
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                size as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                std::os::fd::AsRawFd::as_raw_fd(&fd),
                0,
            );
            if ptr == libc::MAP_FAILED {
                bail!("mmap of shared-memory pool failed: {}", std::io::Error::last_os_error());
            }
            ptr as *mut u8
        };

        Ok(Self {
            fd,
            wl_pool,
            size,
            data,
        })
    }

    fn open_retrying(rng: &mut RandomSource, size: i32) -> Result<OwnedFd> {
        let mut last_err = None;
        for _ in 0..MAX_CREATE_RETRIES {
            let name = rng.shm_name().context("random source unavailable")?;
            match shm_open_create(&name, size) {
                Ok(fd) => return Ok(fd),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| std::io::Error::other("exhausted shm retries")))
            .context("failed to create shared-memory object after retrying")
    }

    /// Writes `bytes` at `offset` in the pool, matching an overlay's pixel buffer contents.
    ///
    /// # Safety contract
    /// Callers must ensure `offset + bytes.len() <= size` (checked) and that no other write is
    /// concurrently in flight — true by construction since the daemon is single-threaded.
    pub fn write_at(&mut self, offset: i32, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len() as i32)
            .filter(|&e| e <= self.size)
            .context("write out of bounds of shm pool")?;
        let _ = end;
        unsafe {
            let dst = self.data.add(offset as usize);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        Ok(())
    }
}

impl Drop for ShmPool {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.data as *mut libc::c_void, self.size as usize);
        }
        self.wl_pool.destroy();
    }
}

fn shm_open_create(name: &str, size: i32) -> std::io::Result<OwnedFd> {
    use std::ffi::CString;
    use std::os::fd::FromRawFd;

    let cname = CString::new(name).expect("shm name has no interior NUL");
    let raw = unsafe {
        libc::shm_open(
            cname.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            0o600,
        )
    };
    if raw < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // Unlink immediately: the fd is the only remaining handle from here on.
    unsafe {
        libc::shm_unlink(cname.as_ptr());
    }

    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    retrying_ftruncate(&fd, size)?;
    Ok(fd)
}

fn retrying_ftruncate(fd: &OwnedFd, size: i32) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;
    loop {
        let rv = unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) };
        if rv == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
