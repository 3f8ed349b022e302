/*!
Direct access to the AM335x GPIO banks through `/dev/mem`.
*/

use anyhow::{bail, Context, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use tracing::debug;

const GPIO_BANK_BASES: [u64; 4] = [0x44e0_7000, 0x4804_c000, 0x481a_c000, 0x481a_e000];
const GPIO_MMAP_SIZE: usize = 0x2000;

const GPIO_OE: usize = 0x134;
const GPIO_DATAIN: usize = 0x138;
const GPIO_CLEARDATAOUT: usize = 0x190;
const GPIO_SETDATAOUT: usize = 0x194;

/// Clock module, with one clock control register per GPIO bank
const CM_BASE: u64 = 0x44e0_0000;
const CM_SIZE: usize = 0x4000;
const CM_GPIO_CLKCTRL: [usize; 4] = [0x408, 0xac, 0xb0, 0xb4];
const CLKCTRL_IDLEST: u32 = 3 << 16;
const CLKCTRL_MODULEMODE_ENABLE: u32 = 2;

const DEV_MEM: &str = "/dev/mem";

/// One GPIO line, named by bank and bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pin {
    bank: u8,
    bit: u8,
}

impl Pin {
    pub const fn new(bank: u8, bit: u8) -> Self {
        Self { bank, bit }
    }

    pub fn bank(&self) -> usize {
        usize::from(self.bank)
    }

    pub fn mask(&self) -> u32 {
        1 << self.bit
    }
}

/// Sled stepper and end switches
pub mod pins {
    use super::Pin;

    pub const SLED_STEP: Pin = Pin::new(1, 16);
    pub const SLED_DIR: Pin = Pin::new(1, 18);
    /// Active low
    pub const SLED_ENABLE: Pin = Pin::new(1, 19);
    pub const END_SWITCH_FRONT: Pin = Pin::new(0, 31);
    pub const END_SWITCH_BACK: Pin = Pin::new(1, 28);
}

fn map_registers(dev_mem: &File, base: u64, len: usize) -> Result<MmapMut> {
    // SAFETY: physical register window; the kernel keeps it valid while
    // mapped and only volatile accesses are made through it.
    unsafe { MmapOptions::new().offset(base).len(len).map_mut(dev_mem) }
        .with_context(|| format!("Cannot map {len:#x} bytes at {base:#x} of {DEV_MEM}"))
}

fn read_register(map: &MmapMut, offset: usize) -> u32 {
    debug_assert!(offset % 4 == 0 && offset + 4 <= map.len());
    // SAFETY: offset is word aligned and inside the mapping.
    unsafe { std::ptr::read_volatile(map.as_ptr().add(offset).cast::<u32>()) }
}

fn write_register(map: &mut MmapMut, offset: usize, value: u32) {
    debug_assert!(offset % 4 == 0 && offset + 4 <= map.len());
    // SAFETY: see read_register()
    unsafe { std::ptr::write_volatile(map.as_mut_ptr().add(offset).cast::<u32>(), value) }
}

/// Mapped GPIO banks; unmapped on drop
pub struct GpioMap {
    banks: Vec<MmapMut>,
}

impl GpioMap {
    /// Enable the bank clocks and map all banks. Needs root.
    pub fn open() -> Result<Self> {
        let dev_mem = OpenOptions::new()
            .read(true)
            .write(true)
            .open(DEV_MEM)
            .with_context(|| format!("Cannot open {DEV_MEM}; running as root?"))?;

        enable_bank_clocks(&dev_mem)?;
        let banks = GPIO_BANK_BASES
            .iter()
            .map(|&base| map_registers(&dev_mem, base, GPIO_MMAP_SIZE))
            .collect::<Result<Vec<_>>>()?;
        debug!("Mapped {} GPIO banks", banks.len());
        Ok(Self { banks })
    }

    /// Switch `pin` to output.
    pub fn make_output(&mut self, pin: Pin) {
        let map = &mut self.banks[pin.bank()];
        let oe = read_register(map, GPIO_OE);
        write_register(map, GPIO_OE, oe & !pin.mask());
    }

    pub fn set(&mut self, pin: Pin) {
        write_register(&mut self.banks[pin.bank()], GPIO_SETDATAOUT, pin.mask());
    }

    pub fn clear(&mut self, pin: Pin) {
        write_register(&mut self.banks[pin.bank()], GPIO_CLEARDATAOUT, pin.mask());
    }

    /// Input level of `pin`
    pub fn get(&self, pin: Pin) -> bool {
        read_register(&self.banks[pin.bank()], GPIO_DATAIN) & pin.mask() != 0
    }
}

fn enable_bank_clocks(dev_mem: &File) -> Result<()> {
    let mut cm = map_registers(dev_mem, CM_BASE, CM_SIZE)?;
    for (bank, &offset) in CM_GPIO_CLKCTRL.iter().enumerate() {
        if read_register(&cm, offset) & CLKCTRL_IDLEST == 0 {
            continue;
        }
        debug!("Enabling clock of GPIO bank {}", bank);
        let value = read_register(&cm, offset);
        write_register(&mut cm, offset, value | CLKCTRL_MODULEMODE_ENABLE);
        let mut polls = 0u32;
        while read_register(&cm, offset) & CLKCTRL_IDLEST != 0 {
            polls += 1;
            if polls > 1_000_000 {
                bail!("GPIO bank {bank} clock does not come up");
            }
            std::hint::spin_loop();
        }
    }
    Ok(())
}
