/// Lock-free single-producer single-consumer (SPSC) ring buffer for PCM.
///
///   - The feeding thread (network layer or host) WRITES samples (producer)
///   - The render callback READS samples (consumer)
///   - NO MUTEX is ever used, only atomic read/write positions
///   - The render callback NEVER blocks, even if the buffer is empty
///
/// `discard` is a consumer-side operation: it skips everything currently
/// readable and is safe while the producer keeps writing.
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct RingBuffer {
    /// Sample storage. Fixed-size, allocated once.
    buffer: Box<[UnsafeCell<f32>]>,
    /// Write position (only modified by the producer).
    write_pos: AtomicUsize,
    /// Read position (only modified by the consumer).
    read_pos: AtomicUsize,
    /// Always a power of 2 so positions can be masked.
    capacity: usize,
    mask: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "Ring buffer capacity must be power of 2"
        );

        Self {
            buffer: (0..capacity).map(|_| UnsafeCell::new(0.0)).collect(),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            capacity,
            mask: capacity - 1,
        }
    }

    /// Smallest power-of-two buffer that holds at least `samples` samples.
    pub fn with_min_capacity(samples: usize) -> Self {
        Self::new(Self::capacity_for(samples))
    }

    /// Samples a [`RingBuffer::with_min_capacity`] buffer can hold at once.
    pub fn usable_for(samples: usize) -> usize {
        Self::capacity_for(samples) - 1
    }

    fn capacity_for(samples: usize) -> usize {
        samples.saturating_add(1).max(2).next_power_of_two()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write samples (producer only). Returns how many were written; the rest
    /// is dropped when the buffer is full.
    pub fn write(&self, data: &[f32]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        // Keep one slot empty to distinguish full from empty.
        let used = write.wrapping_sub(read);
        let available = self.capacity - 1 - used;
        let to_write = data.len().min(available);

        if to_write == 0 {
            return 0;
        }

        for (i, sample) in data[..to_write].iter().enumerate() {
            let idx = (write + i) & self.mask;
            // SAFETY: single producer; slots in write..write+to_write are not
            // readable until write_pos is published below.
            unsafe {
                *self.buffer[idx].get() = *sample;
            }
        }

        self.write_pos
            .store(write.wrapping_add(to_write), Ordering::Release);

        to_write
    }

    /// Read up to `output.len()` samples (consumer only). Never blocks.
    pub fn read(&self, output: &mut [f32]) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);

        let available = write.wrapping_sub(read);
        let to_read = output.len().min(available);

        if to_read == 0 {
            return 0;
        }

        for (i, out) in output[..to_read].iter_mut().enumerate() {
            let idx = (read + i) & self.mask;
            // SAFETY: single consumer; the Acquire load of write_pos makes the
            // producer's writes to these slots visible.
            *out = unsafe { *self.buffer[idx].get() };
        }

        self.read_pos
            .store(read.wrapping_add(to_read), Ordering::Release);

        to_read
    }

    /// Number of samples available to read.
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// Number of samples that can be written.
    pub fn available_write(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.capacity - 1 - write.wrapping_sub(read)
    }

    /// Drop everything currently readable (consumer only).
    pub fn discard(&self) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write, Ordering::Release);
        write.wrapping_sub(read)
    }
}

// SAFETY: slots are only touched through the atomic-guarded positions:
// write_pos is only modified by the producer, read_pos only by the consumer,
// and Acquire/Release ordering publishes sample data before positions.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}
