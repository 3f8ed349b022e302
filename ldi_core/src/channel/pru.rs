/*!
PRU bring-up through the `uio_pruss` kernel driver.

The whole PRU subsystem is mapped from the UIO device. PRU0 runs the scan
firmware; its data RAM holds the ring buffer and it signals the host with
system event 19, routed through the interrupt controller to host interrupt
2, which the driver exposes as `/dev/uio0`.
*/

use super::{ChannelError, RingBackend, RingChannel};
use crate::protocol::SHARED_MEMORY_SIZE;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU8;
use tracing::{debug, info, warn};

/// Offsets inside the PRU subsystem mapping
const PRU0_DATARAM: usize = 0x0_0000;
const PRU0_DATARAM_SIZE: usize = 0x2000;
const PRU_INTC: usize = 0x2_0000;
const PRU0_CONTROL: usize = 0x2_2000;
const PRU0_IRAM: usize = 0x3_4000;
const PRU0_IRAM_SIZE: usize = 0x2000;

/// Interrupt controller registers, relative to `PRU_INTC`
const INTC_GER: usize = 0x10;
const INTC_SICR: usize = 0x24;
const INTC_HIEISR: usize = 0x34;
const INTC_SECR0: usize = 0x280;
const INTC_ESR0: usize = 0x300;
const INTC_CMR: usize = 0x400;
const INTC_HMR: usize = 0x800;
const INTC_SIPR0: usize = 0xD00;
const INTC_SITR0: usize = 0xD80;
const INTC_HIER: usize = 0x1500;

/// PRU0 to ARM system event and its route to the host
const PRU0_ARM_EVENT: u32 = 19;
const EVENT_CHANNEL: u32 = 2;
const HOST_INTERRUPT: u32 = 2;

/// PRU control register values
const CONTROL_DISABLE: u32 = 1;
const CONTROL_ENABLE: u32 = 2;

/// Read the size of map0 of a UIO device from sysfs, e.g. `0x00080000`.
pub fn read_map_size(path: &Path) -> Result<usize, ChannelError> {
    let text = fs::read_to_string(path).map_err(|e| ChannelError::device(path.display().to_string(), e))?;
    let digits = text.trim().trim_start_matches("0x");
    usize::from_str_radix(digits, 16).map_err(|e| {
        ChannelError::device(
            path.display().to_string(),
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })
}

/// Sysfs size file belonging to a UIO device node
fn map_size_path(uio_device: &Path) -> PathBuf {
    let name = uio_device.file_name().unwrap_or_default();
    Path::new("/sys/class/uio").join(name).join("maps/map0/size")
}

/// Pad the firmware image to whole 32-bit instruction words.
fn firmware_words(image: &[u8]) -> Result<Vec<u32>, ChannelError> {
    if image.is_empty() {
        return Err(ChannelError::Firmware("image is empty".into()));
    }
    if image.len() > PRU0_IRAM_SIZE {
        return Err(ChannelError::Firmware(format!(
            "image has {} bytes, instruction RAM only {}",
            image.len(),
            PRU0_IRAM_SIZE
        )));
    }
    Ok(image
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect())
}

/// Mapped PRU subsystem with PRU0 running the scan firmware
pub struct PruBackend {
    uio: File,
    map: MmapMut,
    enabled: bool,
}

impl PruBackend {
    /// Map the PRU subsystem and route the PRU0 event to the host. The PRU is
    /// not started yet.
    pub fn open(uio_device: &Path) -> Result<Self, ChannelError> {
        let device_name = uio_device.display().to_string();
        let uio = OpenOptions::new()
            .read(true)
            .write(true)
            .open(uio_device)
            .map_err(|e| ChannelError::device(&device_name, e))?;
        let size = read_map_size(&map_size_path(uio_device))?;
        if size < PRU0_IRAM + PRU0_IRAM_SIZE {
            return Err(ChannelError::device(
                &device_name,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("map0 has only {size:#x} bytes"),
                ),
            ));
        }

        // SAFETY: the mapping is device memory owned by this process for the
        // lifetime of the backend; nothing else maps it.
        let map = unsafe { MmapOptions::new().len(size).map_mut(&uio) }
            .map_err(|e| ChannelError::device(&device_name, e))?;
        debug!("Mapped {:#x} bytes of PRU memory from {}", size, device_name);

        let mut backend = Self {
            uio,
            map,
            enabled: false,
        };
        backend.write_reg(PRU0_CONTROL, CONTROL_DISABLE);
        backend.init_interrupts();
        Ok(backend)
    }

    fn write_reg(&mut self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.map.len());
        // SAFETY: offset is in bounds and word aligned, the mapping is page
        // aligned.
        unsafe { std::ptr::write_volatile(self.map.as_mut_ptr().add(offset).cast::<u32>(), value) }
    }

    fn read_reg(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.map.len());
        // SAFETY: see write_reg()
        unsafe { std::ptr::read_volatile(self.map.as_ptr().add(offset).cast::<u32>()) }
    }

    fn init_interrupts(&mut self) {
        let event = PRU0_ARM_EVENT as usize;
        // Active high, pulse type
        self.write_reg(PRU_INTC + INTC_SIPR0, 0xFFFF_FFFF);
        self.write_reg(PRU_INTC + INTC_SITR0, 0);

        // Each CMR/HMR register holds four 8-bit mappings.
        let cmr = PRU_INTC + INTC_CMR + (event / 4) * 4;
        let shift = (event % 4) * 8;
        let value = (self.read_reg(cmr) & !(0xFF << shift)) | (EVENT_CHANNEL << shift);
        self.write_reg(cmr, value);

        let hmr = PRU_INTC + INTC_HMR + (EVENT_CHANNEL as usize / 4) * 4;
        let shift = (EVENT_CHANNEL as usize % 4) * 8;
        let value = (self.read_reg(hmr) & !(0xFF << shift)) | (HOST_INTERRUPT << shift);
        self.write_reg(hmr, value);

        self.write_reg(PRU_INTC + INTC_SECR0, 1 << PRU0_ARM_EVENT);
        self.write_reg(PRU_INTC + INTC_ESR0, 1 << PRU0_ARM_EVENT);
        let hier = self.read_reg(PRU_INTC + INTC_HIER);
        self.write_reg(PRU_INTC + INTC_HIER, hier | (1 << HOST_INTERRUPT));
        self.write_reg(PRU_INTC + INTC_GER, 1);
    }

    /// Upload the firmware into PRU0 instruction RAM and start it.
    pub fn start(&mut self, firmware: &Path) -> Result<(), ChannelError> {
        let image = fs::read(firmware).map_err(|e| ChannelError::device(firmware.display().to_string(), e))?;
        let words = firmware_words(&image)?;
        self.write_reg(PRU0_CONTROL, CONTROL_DISABLE);
        for (i, word) in words.iter().enumerate() {
            self.write_reg(PRU0_IRAM + i * 4, *word);
        }
        self.write_reg(PRU0_CONTROL, CONTROL_ENABLE);
        self.enabled = true;
        info!("🚀 PRU0 started with {} ({} bytes)", firmware.display(), image.len());
        Ok(())
    }

    fn disable(&mut self) {
        if self.enabled {
            self.write_reg(PRU0_CONTROL, CONTROL_DISABLE);
            self.enabled = false;
            debug!("PRU0 disabled");
        }
    }
}

impl RingBackend for PruBackend {
    fn cells(&self) -> &[AtomicU8] {
        // SAFETY: data RAM lies inside the mapping, AtomicU8 has the layout
        // of u8 and every access to the ring goes through atomics.
        unsafe {
            std::slice::from_raw_parts(
                self.map.as_ptr().add(PRU0_DATARAM).cast::<AtomicU8>(),
                SHARED_MEMORY_SIZE.min(PRU0_DATARAM_SIZE),
            )
        }
    }

    fn wait_event(&mut self) -> Result<(), ChannelError> {
        // Blocks until the interrupt fires; the value is the event count.
        let mut count = [0u8; 4];
        self.uio.read_exact(&mut count)?;
        self.write_reg(PRU_INTC + INTC_SICR, PRU0_ARM_EVENT);
        self.write_reg(PRU_INTC + INTC_HIEISR, HOST_INTERRUPT);
        Ok(())
    }

    fn release(&mut self) -> Result<(), ChannelError> {
        self.disable();
        Ok(())
    }

    fn is_hardware(&self) -> bool {
        true
    }
}

impl Drop for PruBackend {
    fn drop(&mut self) {
        if self.enabled {
            warn!("PRU0 still running on drop, disabling");
            self.disable();
        }
    }
}

/// Open the delivery channel on the real PRU: map memory, clear the ring,
/// then load and start the firmware.
pub fn open_channel(uio_device: &Path, firmware: &Path) -> Result<RingChannel<PruBackend>, ChannelError> {
    let backend = PruBackend::open(uio_device)?;
    let mut channel = RingChannel::new(backend)?;
    channel.backend_mut().start(firmware)?;
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_map_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0x00080000").unwrap();
        assert_eq!(read_map_size(file.path()).unwrap(), 0x80000);
    }

    #[test]
    fn test_read_map_size_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "lots").unwrap();
        assert!(matches!(read_map_size(file.path()), Err(ChannelError::Device { .. })));
    }

    #[test]
    fn test_map_size_path() {
        assert_eq!(
            map_size_path(Path::new("/dev/uio0")),
            PathBuf::from("/sys/class/uio/uio0/maps/map0/size")
        );
    }

    #[test]
    fn test_firmware_words_are_padded() {
        let words = firmware_words(&[1, 0, 0, 0, 0xaa, 0xbb]).unwrap();
        assert_eq!(words, vec![1, 0xbbaa]);
    }

    #[test]
    fn test_firmware_size_limits() {
        assert!(matches!(firmware_words(&[]), Err(ChannelError::Firmware(_))));
        assert!(firmware_words(&vec![0; PRU0_IRAM_SIZE]).is_ok());
        assert!(matches!(
            firmware_words(&vec![0; PRU0_IRAM_SIZE + 1]),
            Err(ChannelError::Firmware(_))
        ));
    }

    #[test]
    fn test_missing_device_names_path() {
        let err = PruBackend::open(Path::new("/nonexistent/uio7")).err().unwrap();
        assert!(err.to_string().contains("/nonexistent/uio7"));
    }
}
