/*!
Ring buffer protocol over shared memory.

The memory is only ever touched through [`ProducerView`] (host) and
[`ConsumerView`] (PRU side, or a simulation of it), so each field has exactly
one writer. Line data is written with relaxed stores and published by a
release store of the command byte; the reader acquires the command before it
looks at the data.
*/

use super::{ChannelError, ChannelStatus, PruError, RingBackend, ScanCommand, ScanLineSender};
use crate::protocol::{ERROR_REGISTER_OFFSET, QUEUE_LEN, SCANLINE_DATA_SIZE, SCANLINE_ITEM_SIZE, SHARED_MEMORY_SIZE};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, error, info};

#[inline]
fn command_offset(slot: usize) -> usize {
    debug_assert!(slot < QUEUE_LEN);
    slot * SCANLINE_ITEM_SIZE
}

#[inline]
fn data_range(slot: usize) -> std::ops::Range<usize> {
    let start = command_offset(slot) + 1;
    start..start + SCANLINE_DATA_SIZE
}

/// Shared memory on the heap, for simulations and tests
pub struct HeapMemory {
    cells: Box<[AtomicU8]>,
}

impl HeapMemory {
    pub fn new() -> Self {
        Self::with_size(SHARED_MEMORY_SIZE)
    }

    pub fn with_size(size: usize) -> Self {
        Self {
            cells: (0..size).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn cells(&self) -> &[AtomicU8] {
        &self.cells
    }
}

impl Default for HeapMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Host side of the ring: writes line data, the fill and exit commands.
pub struct ProducerView<'a> {
    cells: &'a [AtomicU8],
}

impl<'a> ProducerView<'a> {
    pub fn new(cells: &'a [AtomicU8]) -> Self {
        debug_assert!(cells.len() >= SHARED_MEMORY_SIZE);
        Self { cells }
    }

    /// Current command byte of a slot
    pub fn command(&self, slot: usize) -> u8 {
        self.cells[command_offset(slot)].load(Ordering::Acquire)
    }

    /// Reason the consumer gave for stopping
    pub fn error_code(&self) -> u8 {
        self.cells[ERROR_REGISTER_OFFSET].load(Ordering::Acquire)
    }

    /// Write a line into a slot the consumer has drained and publish it.
    pub fn fill(&self, slot: usize, data: &[u8], advance_sled: bool) {
        debug_assert_eq!(data.len(), SCANLINE_DATA_SIZE);
        for (cell, &byte) in self.cells[data_range(slot)].iter().zip(data) {
            cell.store(byte, Ordering::Relaxed);
        }
        let command = if advance_sled {
            ScanCommand::ScanData
        } else {
            ScanCommand::ScanDataNoSled
        };
        self.cells[command_offset(slot)].store(command as u8, Ordering::Release);
    }

    pub fn request_exit(&self, slot: usize) {
        self.cells[command_offset(slot)].store(ScanCommand::Exit as u8, Ordering::Release);
    }

    /// Mark all slots empty and clear the error register. Only valid before
    /// the consumer is started.
    pub fn reset(&self) {
        for cell in &self.cells[..SHARED_MEMORY_SIZE] {
            cell.store(0, Ordering::Release);
        }
    }
}

/// Consumer side of the ring: drains slots, acknowledges exit and reports
/// errors.
pub struct ConsumerView<'a> {
    cells: &'a [AtomicU8],
}

impl<'a> ConsumerView<'a> {
    pub fn new(cells: &'a [AtomicU8]) -> Self {
        debug_assert!(cells.len() >= SHARED_MEMORY_SIZE);
        Self { cells }
    }

    pub fn command(&self, slot: usize) -> u8 {
        self.cells[command_offset(slot)].load(Ordering::Acquire)
    }

    /// Copy the data of a published slot. `command()` must have been
    /// observed as a scan command first.
    pub fn read_line(&self, slot: usize, out: &mut [u8]) {
        for (byte, cell) in out.iter_mut().zip(&self.cells[data_range(slot)]) {
            *byte = cell.load(Ordering::Relaxed);
        }
    }

    /// Hand a drained slot back to the producer
    pub fn complete(&self, slot: usize) {
        self.cells[command_offset(slot)].store(ScanCommand::Empty as u8, Ordering::Release);
    }

    /// Signal that the consumer stopped
    pub fn finish(&self, slot: usize) {
        self.cells[command_offset(slot)].store(ScanCommand::Done as u8, Ordering::Release);
    }

    /// Set the error register; must happen before `finish()`.
    pub fn report_error(&self, error: PruError) {
        self.cells[ERROR_REGISTER_OFFSET].store(error.code(), Ordering::Release);
    }
}

/// Ring buffer producer over any [`RingBackend`]
pub struct RingChannel<B: RingBackend> {
    backend: B,
    slot: usize,
    status: ChannelStatus,
    lines_sent: u64,
}

impl<B: RingBackend> RingChannel<B> {
    /// Take over the backend memory and clear the ring. The consumer must
    /// only be started afterwards.
    pub fn new(backend: B) -> Result<Self, ChannelError> {
        let actual = backend.cells().len();
        if actual < SHARED_MEMORY_SIZE {
            return Err(ChannelError::SharedMemorySize {
                required: SHARED_MEMORY_SIZE,
                actual,
            });
        }
        ProducerView::new(backend.cells()).reset();
        Ok(Self {
            backend,
            slot: 0,
            status: ChannelStatus::Running,
            lines_sent: 0,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn view(&self) -> ProducerView<'_> {
        ProducerView::new(self.backend.cells())
    }

    fn ensure_running(&self) -> Result<(), ChannelError> {
        match self.status {
            ChannelStatus::Running => Ok(()),
            ChannelStatus::Shutdown => Err(ChannelError::NotRunning),
            ChannelStatus::Failed(code) => Err(ChannelError::Coprocessor(code)),
        }
    }

    /// Block until `slot` holds `expected`. Seeing `Done` instead means the
    /// consumer stopped on its own; the channel is failed from then on.
    fn wait_until(&mut self, slot: usize, expected: ScanCommand) -> Result<(), ChannelError> {
        loop {
            let command = self.view().command(slot);
            if command == expected as u8 {
                return Ok(());
            }
            if command == ScanCommand::Done as u8 {
                let code = PruError::from_code(self.view().error_code());
                error!("❌ PRU stopped while waiting on slot {}: {}", slot, code);
                self.status = ChannelStatus::Failed(code);
                return Err(ChannelError::Coprocessor(code));
            }
            self.backend.wait_event()?;
        }
    }

    fn drain_and_stop(&mut self) -> Result<(), ChannelError> {
        let slot = self.slot;
        self.wait_until(slot, ScanCommand::Empty)?;
        self.view().request_exit(slot);
        self.wait_until(slot, ScanCommand::Done)
    }
}

impl<B: RingBackend> ScanLineSender for RingChannel<B> {
    fn enqueue(&mut self, line: &[u8], advance_sled: bool) -> Result<(), ChannelError> {
        self.ensure_running()?;
        if line.len() != SCANLINE_DATA_SIZE {
            return Err(ChannelError::LineSize {
                expected: SCANLINE_DATA_SIZE,
                actual: line.len(),
            });
        }
        let slot = self.slot;
        self.wait_until(slot, ScanCommand::Empty)?;
        self.view().fill(slot, line, advance_sled);
        self.slot = (slot + 1) % QUEUE_LEN;
        self.lines_sent += 1;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), ChannelError> {
        match self.status {
            ChannelStatus::Shutdown => return Ok(()),
            ChannelStatus::Failed(code) => {
                self.backend.release()?;
                return Err(ChannelError::Coprocessor(code));
            }
            ChannelStatus::Running => {}
        }

        debug!("Draining ring after {} lines", self.lines_sent);
        let drained = self.drain_and_stop();
        let released = self.backend.release();
        drained?;
        released?;
        self.status = ChannelStatus::Shutdown;
        info!("🏁 Finished scanning: {} lines sent", self.lines_sent);
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status
    }

    fn lines_sent(&self) -> u64 {
        self.lines_sent
    }

    fn is_hardware(&self) -> bool {
        self.backend.is_hardware()
    }
}
