//! Device buffers and mapped host transfers.
//!
//! Every transfer maps the buffer on the session queue, copies, and unmaps.
//! Unmap is always attempted once a map has succeeded.

use std::ptr::NonNull;

use tracing::{debug, error};

use crate::backend::{MapAccess, MemFlags, MemId};
use crate::env::{AccelEnv, SessionHandles};
use crate::error::{AccelError, Result};

/// Most planes a single image transfer may carry.
pub const MAX_IMAGE_PLANES: usize = 8;

/// Device memory owned by the caller.
#[derive(Debug, Default)]
pub struct DeviceBuffer {
    mem: Option<MemId>,
    size: usize,
}

impl DeviceBuffer {
    pub fn mem(&self) -> Option<MemId> {
        self.mem
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_null(&self) -> bool {
        self.mem.is_none()
    }
}

impl AccelEnv {
    fn transfer_handles(&self) -> Result<SessionHandles> {
        self.session_handles().ok_or_else(|| {
            error!("buffer operation without an initialized environment");
            AccelError::InvalidConfiguration("environment is not initialized".to_string())
        })
    }

    pub fn create_buffer(
        &self,
        size: usize,
        flags: MemFlags,
        host_data: Option<&[u8]>,
    ) -> Result<DeviceBuffer> {
        if let Some(data) = host_data {
            if data.len() > size {
                return Err(AccelError::InvalidArgument(format!(
                    "host data is {} bytes, buffer is {}",
                    data.len(),
                    size
                )));
            }
        }
        let handles = self.transfer_handles()?;
        let mem = self
            .backend()
            .create_buffer(handles.context, flags, size, host_data)
            .map_err(|status| {
                error!(size, status = %status, "could not create buffer");
                AccelError::backend("clCreateBuffer", status)
            })?;
        debug!(mem = %mem, size, "buffer created");
        Ok(DeviceBuffer {
            mem: Some(mem),
            size,
        })
    }

    /// Release and null out `buffer`. Null buffers are ignored.
    pub fn release_buffer(&self, buffer: &mut DeviceBuffer) {
        let Some(mem) = buffer.mem.take() else {
            return;
        };
        buffer.size = 0;
        if let Err(status) = self.backend().release_buffer(mem) {
            error!(mem = %mem, status = %status, "could not release buffer");
        }
    }

    /// Copy `src` to the start of `buffer`.
    pub fn write(&self, buffer: &mut DeviceBuffer, src: &[u8]) -> Result<()> {
        check_range(buffer, 0, src.len())?;
        self.with_mapped_write(buffer, 0, src.len(), |mapped| {
            mapped.copy_from_slice(src);
        })
    }

    /// Copy the start of `buffer` into `dst`.
    pub fn read(&self, dst: &mut [u8], buffer: &DeviceBuffer) -> Result<()> {
        check_range(buffer, 0, dst.len())?;
        self.with_mapped_read(buffer, 0, dst.len(), |mapped| {
            dst.copy_from_slice(mapped);
        })
    }

    /// Copy `planes` back to back into `buffer` starting at `dst_offset`.
    pub fn write_image(
        &self,
        buffer: &mut DeviceBuffer,
        dst_offset: usize,
        planes: &[&[u8]],
    ) -> Result<()> {
        let total = image_extent(buffer, dst_offset, planes.iter().map(|p| p.len()))?;
        self.with_mapped_write(buffer, dst_offset, total, |mapped| {
            let mut at = 0;
            for plane in planes {
                mapped[at..at + plane.len()].copy_from_slice(plane);
                at += plane.len();
            }
        })
    }

    /// Fill `planes` in order from the start of `buffer`.
    pub fn read_image(&self, planes: &mut [&mut [u8]], buffer: &DeviceBuffer) -> Result<()> {
        self.read_image_at(planes, buffer, 0)
    }

    /// Fill `planes` in order from `buffer`, starting at `src_offset`.
    pub fn read_image_at(
        &self,
        planes: &mut [&mut [u8]],
        buffer: &DeviceBuffer,
        src_offset: usize,
    ) -> Result<()> {
        let total = image_extent(buffer, src_offset, planes.iter().map(|p| p.len()))?;
        self.with_mapped_read(buffer, src_offset, total, |mapped| {
            let mut at = 0;
            for plane in planes.iter_mut() {
                let len = plane.len();
                plane.copy_from_slice(&mapped[at..at + len]);
                at += len;
            }
        })
    }

    /// Map `len` bytes at `offset` for reading and hand them to `f`.
    fn with_mapped_read<F>(&self, buffer: &DeviceBuffer, offset: usize, len: usize, f: F) -> Result<()>
    where
        F: FnOnce(&[u8]),
    {
        self.mapped(buffer, MapAccess::Read, offset, len, |ptr| {
            // SAFETY: the backend guarantees `len` readable bytes with no
            // live write mapping until the unmap that follows `f`.
            f(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) })
        })
    }

    /// Map `len` bytes at `offset` for writing and hand them to `f`.
    fn with_mapped_write<F>(
        &self,
        buffer: &mut DeviceBuffer,
        offset: usize,
        len: usize,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut [u8]),
    {
        self.mapped(buffer, MapAccess::Write, offset, len, |ptr| {
            // SAFETY: a write mapping is exclusive and valid for `len` bytes
            // until the unmap that follows `f`. `&mut buffer` rules out a
            // second transfer on this handle meanwhile.
            f(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) })
        })
    }

    /// Map, run `f`, then unmap. Unmap runs whenever the map succeeded.
    fn mapped<F>(
        &self,
        buffer: &DeviceBuffer,
        access: MapAccess,
        offset: usize,
        len: usize,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(NonNull<u8>),
    {
        let mem = buffer.mem.ok_or_else(|| {
            AccelError::InvalidArgument("buffer has been released".to_string())
        })?;
        if len == 0 {
            return Ok(());
        }
        let handles = self.transfer_handles()?;
        let backend = self.backend();

        let ptr = backend
            .map_buffer(handles.queue, mem, access, offset, len)
            .map_err(|status| {
                error!(mem = %mem, offset, len, status = %status, "could not map buffer");
                AccelError::backend("clEnqueueMapBuffer", status)
            })?;

        f(ptr);

        backend
            .unmap_buffer(handles.queue, mem, ptr)
            .map_err(|status| {
                error!(mem = %mem, status = %status, "could not unmap buffer");
                AccelError::backend("clEnqueueUnmapMemObject", status)
            })
    }
}

fn check_range(buffer: &DeviceBuffer, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= buffer.size => Ok(()),
        _ => Err(AccelError::InvalidArgument(format!(
            "transfer of {} bytes at offset {} exceeds buffer of {} bytes",
            len, offset, buffer.size
        ))),
    }
}

/// Total byte count of an image transfer, validated against the buffer.
fn image_extent(
    buffer: &DeviceBuffer,
    offset: usize,
    mut plane_sizes: impl ExactSizeIterator<Item = usize>,
) -> Result<usize> {
    let count = plane_sizes.len();
    if count > MAX_IMAGE_PLANES {
        return Err(AccelError::InvalidArgument(format!(
            "{} planes given, at most {} supported",
            count, MAX_IMAGE_PLANES
        )));
    }
    let total = plane_sizes
        .try_fold(0usize, |acc, n| acc.checked_add(n))
        .ok_or_else(|| AccelError::InvalidArgument("plane sizes overflow".to_string()))?;
    check_range(buffer, offset, total)?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{HostBackend, HostFault};

    const SRC: &str = "__kernel void noop() {}\n";

    fn ready() -> (Arc<HostBackend>, AccelEnv) {
        let backend = Arc::new(HostBackend::default());
        let env = AccelEnv::new(backend.clone());
        env.register_kernel_source(SRC).unwrap();
        env.initialize(None).unwrap();
        (backend, env)
    }

    #[test]
    fn test_requires_session() {
        let env = AccelEnv::new(Arc::new(HostBackend::default()));
        assert!(matches!(
            env.create_buffer(16, MemFlags::READ_WRITE, None),
            Err(AccelError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_host_data_copied_at_creation() {
        let (_backend, env) = ready();
        let mut buf = env
            .create_buffer(8, MemFlags::READ_ONLY | MemFlags::COPY_HOST_PTR, Some(&[9; 4]))
            .unwrap();
        let mut out = [0u8; 8];
        env.read(&mut out, &buf).unwrap();
        assert_eq!(out, [9, 9, 9, 9, 0, 0, 0, 0]);
        env.release_buffer(&mut buf);
        assert!(buf.is_null());
        env.uninitialize();
    }

    #[test]
    fn test_oversized_transfers_rejected() {
        let (_backend, env) = ready();
        let mut buf = env.create_buffer(4, MemFlags::READ_WRITE, None).unwrap();
        assert!(matches!(
            env.write(&mut buf, &[0; 5]),
            Err(AccelError::InvalidArgument(_))
        ));
        assert!(matches!(
            env.create_buffer(2, MemFlags::COPY_HOST_PTR, Some(&[1, 2, 3])),
            Err(AccelError::InvalidArgument(_))
        ));
        env.release_buffer(&mut buf);
        env.uninitialize();
    }

    #[test]
    fn test_too_many_planes() {
        let (_backend, env) = ready();
        let mut buf = env.create_buffer(64, MemFlags::READ_WRITE, None).unwrap();
        let plane: &[u8] = &[0u8; 1];
        let planes = vec![plane; MAX_IMAGE_PLANES + 1];
        assert!(matches!(
            env.write_image(&mut buf, 0, &planes),
            Err(AccelError::InvalidArgument(_))
        ));
        env.release_buffer(&mut buf);
        env.uninitialize();
    }

    #[test]
    fn test_unmap_failure_reported_and_buffer_unmapped() {
        let (backend, env) = ready();
        let mut buf = env.create_buffer(4, MemFlags::READ_WRITE, None).unwrap();
        backend.inject_fault(HostFault::Unmap);
        assert!(matches!(
            env.write(&mut buf, &[1, 2, 3, 4]),
            Err(AccelError::Backend { .. })
        ));
        backend.clear_faults();
        env.release_buffer(&mut buf);
        assert_eq!(backend.live_buffers(), 0);
        env.uninitialize();
    }

    #[test]
    fn test_read_maps_shared_while_writes_exclusive() {
        let (backend, env) = ready();
        let mut buf = env.create_buffer(8, MemFlags::READ_WRITE, None).unwrap();
        env.write(&mut buf, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        // A read inside a read: both mappings are shared.
        let mut outer = [0u8; 8];
        let mut inner = [0u8; 4];
        env.with_mapped_read(&buf, 0, 8, |mapped| {
            outer.copy_from_slice(mapped);
            env.read(&mut inner, &buf).unwrap();
        })
        .unwrap();
        assert_eq!(outer, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(inner, [1, 2, 3, 4]);

        // Any map of the same memory fails while a write mapping is live,
        // even through a second handle.
        let alias = DeviceBuffer {
            mem: buf.mem,
            size: buf.size,
        };
        let mut nested = None;
        env.with_mapped_write(&mut buf, 0, 8, |mapped| {
            mapped.fill(0xAA);
            let mut out = [0u8; 8];
            nested = Some(env.read(&mut out, &alias));
        })
        .unwrap();
        assert!(matches!(
            nested,
            Some(Err(AccelError::Backend { .. }))
        ));

        let mut out = [0u8; 8];
        env.read(&mut out, &buf).unwrap();
        assert_eq!(out, [0xAA; 8]);
        env.release_buffer(&mut buf);
        assert_eq!(backend.live_buffers(), 0);
        env.uninitialize();
    }

    #[test]
    fn test_map_failure() {
        let (backend, env) = ready();
        let mut buf = env.create_buffer(4, MemFlags::READ_WRITE, None).unwrap();
        backend.inject_fault(HostFault::Map);
        let mut out = [0u8; 4];
        assert!(matches!(
            env.read(&mut out, &buf),
            Err(AccelError::Backend { .. })
        ));
        backend.clear_faults();
        env.release_buffer(&mut buf);
        env.uninitialize();
    }
}
