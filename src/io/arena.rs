use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::io;

use tracing::{debug, info, warn};

use crate::buffer::{Dequeued, Type};
use crate::device::Driver;
use crate::error::{Error, Result};
use crate::memory::{Memory, SlotMemory, UserPtr, STRATEGIES};

/// One buffer's worth of bookkeeping
#[derive(Debug)]
pub struct Slot {
    index: u32,
    bytes_used: AtomicU32,
    memory: SlotMemory,
}

impl Slot {
    fn new(index: u32, memory: SlotMemory) -> Self {
        Slot {
            index,
            bytes_used: AtomicU32::new(0),
            memory,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Valid bytes written by the driver on the last dequeue
    pub fn bytes_used(&self) -> u32 {
        self.bytes_used.load(Ordering::Acquire)
    }

    pub fn memory(&self) -> &SlotMemory {
        &self.memory
    }

    /// The valid part of the buffer
    pub fn payload(&self) -> &[u8] {
        let bytes = self.memory.bytes();
        let used = (self.bytes_used() as usize).min(bytes.len());
        &bytes[..used]
    }
}

/// Manage driver buffers
///
/// Buffers are requested with the first memory strategy the driver accepts, populated and
/// queued. Either all `count` buffers end up queued or nothing stays allocated. All buffers are
/// released in the Drop impl.
pub struct Arena<D: Driver + ?Sized> {
    dev: Arc<D>,
    typ: Type,
    /// Strategy of the outstanding driver allocation, `None` once released
    memory: Option<Memory>,
    slots: Vec<Slot>,
}

impl<D: Driver + ?Sized> Arena<D> {
    /// Requests, populates and queues `count` buffers
    ///
    /// # Arguments
    ///
    /// * `dev` - Device to allocate on
    /// * `typ` - Buffer type of the session
    /// * `count` - Exact number of buffers, the driver must grant all of them
    /// * `size` - Bytes per buffer for userspace allocations, usually the size image
    pub fn allocate(dev: Arc<D>, typ: Type, count: u32, size: u32) -> Result<Self> {
        if count == 0 {
            return Err(Error::BadParam("buffer count must not be zero".to_string()));
        }

        let mut arena = Arena {
            dev,
            typ,
            memory: None,
            slots: Vec::new(),
        };

        let mut granted = None;
        for memory in STRATEGIES.iter().copied() {
            match arena.dev.request_buffers(typ, memory, count) {
                Ok(n) => {
                    granted = Some((memory, n));
                    break;
                }
                Err(e) => debug!("{} buffers rejected: {}", memory, e),
            }
        }
        let (memory, granted) = granted.ok_or(Error::NoBuffers {
            requested: count,
            granted: 0,
        })?;
        arena.memory = Some(memory);

        if granted != count {
            warn!("asked for {} {} buffers, got {}", count, memory, granted);
            arena.unwind();
            return Err(Error::NoBuffers {
                requested: count,
                granted,
            });
        }

        if let Err(e) = arena.populate(count, size) {
            arena.unwind();
            return Err(e);
        }

        info!("allocated {} {} buffers", count, memory);
        Ok(arena)
    }

    fn populate(&mut self, count: u32, size: u32) -> Result<()> {
        let memory = self.memory.unwrap_or(Memory::Mmap);
        for index in 0..count {
            let slot = match memory {
                Memory::Mmap => {
                    let info = self
                        .dev
                        .query_buffer(self.typ, memory, index)
                        .map_err(|e| Error::api("VIDIOC_QUERYBUF", e))?;
                    let region = self
                        .dev
                        .map(&info)
                        .map_err(|source| Error::MapFail { index, source })?;
                    SlotMemory::Mapped(region)
                }
                Memory::UserPtr => {
                    let buf = UserPtr::alloc(size as usize).ok_or_else(|| Error::MapFail {
                        index,
                        source: io::Error::from(io::ErrorKind::OutOfMemory),
                    })?;
                    SlotMemory::User(buf)
                }
                // TODO: export the buffers with VIDIOC_EXPBUF once a consumer can import them
                Memory::DmaBuf | Memory::Overlay => SlotMemory::Exported(None),
            };
            self.slots.push(Slot::new(index, slot));

            if memory == Memory::Mmap || memory == Memory::UserPtr {
                self.queue(index)
                    .map_err(|e| Error::api("VIDIOC_QBUF", e))?;
            }
        }

        if memory == Memory::DmaBuf {
            warn!("{} buffers are left unpopulated", memory);
        }
        Ok(())
    }

    fn unwind(&mut self) {
        if let Err(e) = self.release() {
            warn!("failed to release buffers: {}", e);
        }
    }

    /// Unmaps or frees every slot and releases the driver allocation
    ///
    /// Calling this more than once is a no-op.
    pub fn release(&mut self) -> Result<()> {
        let memory = match self.memory.take() {
            Some(memory) => memory,
            None => return Ok(()),
        };

        for slot in self.slots.drain(..) {
            if let SlotMemory::Mapped(region) = slot.memory {
                if let Err(e) = self.dev.unmap(region) {
                    warn!("failed to unmap buffer {}: {}", slot.index, e);
                }
            }
        }

        // free all buffers by requesting 0
        self.dev
            .request_buffers(self.typ, memory, 0)
            .map(|_| ())
            .map_err(|e| Error::api("VIDIOC_REQBUFS", e))
    }

    /// Hands one buffer back to the driver
    pub fn queue(&self, index: u32) -> io::Result<()> {
        let slot = self
            .slots
            .get(index as usize)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no such buffer"))?;
        self.dev.queue(self.typ, index, &slot.memory)
    }

    /// Queues every buffer, as needed after streaming was turned off
    pub fn queue_all(&self) -> Result<()> {
        if self.memory == Some(Memory::DmaBuf) {
            return Ok(());
        }
        for slot in &self.slots {
            self.dev
                .queue(self.typ, slot.index, &slot.memory)
                .map_err(|e| Error::api("VIDIOC_QBUF", e))?;
        }
        Ok(())
    }

    /// Records a dequeue and returns the valid bytes of the buffer
    pub fn record(&self, buf: &Dequeued) -> Option<&[u8]> {
        let slot = self.slots.get(buf.index as usize)?;
        slot.bytes_used.store(buf.bytes_used, Ordering::Release);
        Some(slot.payload())
    }

    /// Valid bytes of a buffer as of its last dequeue
    pub fn payload(&self, index: u32) -> Option<&[u8]> {
        self.slots.get(index as usize).map(Slot::payload)
    }

    pub fn slot(&self, index: u32) -> Option<&Slot> {
        self.slots.get(index as usize)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Strategy in use, `None` after release
    pub fn memory(&self) -> Option<Memory> {
        self.memory
    }

    pub fn typ(&self) -> Type {
        self.typ
    }
}

impl<D: Driver + ?Sized> Drop for Arena<D> {
    fn drop(&mut self) {
        self.unwind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Format, FourCC};
    use crate::mock::{Call, MockDevice};

    const SIZE: u32 = 640 * 480 * 2;

    fn mock() -> MockDevice {
        MockDevice::new()
            .with_max_buffers(8)
            .with_format(Format::new(640, 480, FourCC::YUYV))
    }

    fn zero_requests(dev: &MockDevice) -> usize {
        dev.calls()
            .iter()
            .filter(|call| matches!(call, Call::RequestBuffers(_, 0)))
            .count()
    }

    #[test]
    fn eight_mapped_buffers_are_queued() {
        let dev = Arc::new(mock());
        let arena = Arena::allocate(dev.clone(), Type::VideoCapture, 8, SIZE).unwrap();

        assert_eq!(arena.len(), 8);
        assert_eq!(arena.memory(), Some(Memory::Mmap));
        assert!(arena
            .slots()
            .iter()
            .all(|slot| matches!(slot.memory(), SlotMemory::Mapped(r) if r.len() == SIZE as usize)));
        assert_eq!(dev.queued(), (0..8).collect::<Vec<_>>());
        assert_eq!(dev.live_mappings(), 8);
        assert!(!dev.calls().contains(&Call::StreamOn));
    }

    #[test]
    fn all_or_nothing_for_every_count() {
        for n in 1..=8 {
            let dev = Arc::new(mock());
            let mut arena = Arena::allocate(dev.clone(), Type::VideoCapture, n, SIZE).unwrap();
            assert_eq!(arena.len(), n as usize);
            assert_eq!(dev.queued().len(), n as usize);
            arena.release().unwrap();
            assert_eq!(dev.live_mappings(), 0);

            let dev = Arc::new(mock().fail_map_at(n - 1));
            let err = Arena::allocate(dev.clone(), Type::VideoCapture, n, SIZE)
                .err()
                .unwrap();
            assert_eq!(err.code(), -5);
            assert_eq!(dev.live_mappings(), 0);
            assert_eq!(dev.granted(), 0);
            assert_eq!(zero_requests(&dev), 1);
        }
    }

    #[test]
    fn release_is_idempotent() {
        let dev = Arc::new(mock());
        let mut arena = Arena::allocate(dev.clone(), Type::VideoCapture, 4, SIZE).unwrap();

        arena.release().unwrap();
        arena.release().unwrap();
        assert!(arena.is_empty());
        assert_eq!(arena.memory(), None);
        drop(arena);

        assert_eq!(zero_requests(&dev), 1);
        assert_eq!(dev.calls().iter().filter(|c| matches!(c, Call::Unmap(_))).count(), 4);
    }

    #[test]
    fn drop_releases() {
        let dev = Arc::new(mock());
        let arena = Arena::allocate(dev.clone(), Type::VideoCapture, 3, SIZE).unwrap();
        drop(arena);
        assert_eq!(dev.live_mappings(), 0);
        assert_eq!(dev.calls().last(), Some(&Call::RequestBuffers(Memory::Mmap, 0)));
    }

    #[test]
    fn falls_back_to_userptr() {
        let dev = Arc::new(mock().reject_memory(Memory::Mmap));
        let arena = Arena::allocate(dev.clone(), Type::VideoCapture, 2, SIZE).unwrap();

        assert_eq!(arena.memory(), Some(Memory::UserPtr));
        assert!(arena
            .slots()
            .iter()
            .all(|slot| matches!(slot.memory(), SlotMemory::User(b) if b.len() == SIZE as usize)));
        assert_eq!(dev.queued(), vec![0, 1]);
        assert_eq!(dev.live_mappings(), 0);
    }

    #[test]
    fn dmabuf_slots_stay_unpopulated() {
        let dev = Arc::new(
            mock()
                .reject_memory(Memory::Mmap)
                .reject_memory(Memory::UserPtr),
        );
        let arena = Arena::allocate(dev.clone(), Type::VideoCapture, 2, SIZE).unwrap();

        assert_eq!(arena.memory(), Some(Memory::DmaBuf));
        assert!(arena
            .slots()
            .iter()
            .all(|slot| matches!(slot.memory(), SlotMemory::Exported(None))));
        assert!(dev.queued().is_empty());
        assert!(arena.queue_all().is_ok());
    }

    #[test]
    fn no_strategy_accepted() {
        let dev = Arc::new(
            mock()
                .reject_memory(Memory::Mmap)
                .reject_memory(Memory::UserPtr)
                .reject_memory(Memory::DmaBuf),
        );
        let err = Arena::allocate(dev.clone(), Type::VideoCapture, 2, SIZE)
            .err()
            .unwrap();
        assert_eq!(err.code(), -6);
        assert_eq!(zero_requests(&dev), 0);
    }

    #[test]
    fn short_grant_is_released() {
        let dev = Arc::new(mock().with_max_buffers(4));
        let err = Arena::allocate(dev.clone(), Type::VideoCapture, 8, SIZE)
            .err()
            .unwrap();

        assert!(matches!(
            err,
            Error::NoBuffers {
                requested: 8,
                granted: 4
            }
        ));
        assert_eq!(dev.calls().last(), Some(&Call::RequestBuffers(Memory::Mmap, 0)));
        assert_eq!(dev.granted(), 0);
    }

    #[test]
    fn failed_query_or_queue_unwinds() {
        let dev = Arc::new(mock().fail_query_at(2));
        let err = Arena::allocate(dev.clone(), Type::VideoCapture, 4, SIZE)
            .err()
            .unwrap();
        assert_eq!(err.code(), -4);
        assert_eq!(dev.live_mappings(), 0);

        let dev = Arc::new(mock().fail_queue_at(1));
        let err = Arena::allocate(dev.clone(), Type::VideoCapture, 4, SIZE)
            .err()
            .unwrap();
        assert_eq!(err.code(), -4);
        assert_eq!(dev.live_mappings(), 0);
        assert_eq!(dev.granted(), 0);
    }

    #[test]
    fn failed_userptr_queue_unwinds() {
        let dev = Arc::new(mock().reject_memory(Memory::Mmap).fail_queue_at(1));
        let err = Arena::allocate(dev.clone(), Type::VideoCapture, 4, SIZE)
            .err()
            .unwrap();

        assert_eq!(err.code(), -4);
        assert_eq!(dev.granted(), 0);
        assert_eq!(
            dev.calls().last(),
            Some(&Call::RequestBuffers(Memory::UserPtr, 0))
        );
        assert!(!dev.calls().iter().any(|c| matches!(c, Call::Map(_))));
    }

    #[test]
    fn zero_count_is_rejected() {
        let dev = Arc::new(mock());
        let err = Arena::allocate(dev.clone(), Type::VideoCapture, 0, SIZE)
            .err()
            .unwrap();
        assert_eq!(err.code(), -1);
        assert!(dev.calls().is_empty());
    }

    #[test]
    fn record_sets_payload() {
        let dev = Arc::new(mock());
        let arena = Arena::allocate(dev.clone(), Type::VideoCapture, 2, SIZE).unwrap();

        let payload = arena
            .record(&Dequeued {
                index: 1,
                bytes_used: 100,
                sequence: 0,
                timestamp: Default::default(),
            })
            .unwrap();
        assert_eq!(payload.len(), 100);
        assert_eq!(arena.slot(1).map(Slot::bytes_used), Some(100));
        assert_eq!(arena.payload(0).map(<[u8]>::len), Some(0));
        assert!(arena.payload(7).is_none());
    }
}
