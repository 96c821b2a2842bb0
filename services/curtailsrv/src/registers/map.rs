//! Shared register map
//!
//! Both banks live behind one `parking_lot::RwLock`. Every public operation
//! validates the span against the layout before it touches storage, so a
//! failed call never leaves a partial mutation behind.

use parking_lot::RwLock;

use super::codec::{self, BitPosition, MAX_BIT_POSITION};
use super::layout::{Bank, DecodedPoint, Encoding, RegisterLayout};
use crate::config::RegisterConfig;
use crate::error::{CurtailError, Result};

#[derive(Debug)]
struct Banks {
    input: Vec<u16>,
    holding: Vec<u16>,
}

impl Banks {
    fn new(register_count: u16) -> Self {
        Self {
            input: vec![0; usize::from(register_count)],
            holding: vec![0; usize::from(register_count)],
        }
    }

    fn get(&self, bank: Bank) -> &[u16] {
        match bank {
            Bank::Input => &self.input,
            Bank::Holding => &self.holding,
        }
    }

    fn get_mut(&mut self, bank: Bank) -> &mut [u16] {
        match bank {
            Bank::Input => &mut self.input,
            Bank::Holding => &mut self.holding,
        }
    }
}

/// In-memory model of the virtual device's registers
#[derive(Debug)]
pub struct RegisterMap {
    layout: RegisterLayout,
    banks: RwLock<Banks>,
}

impl RegisterMap {
    /// All words start at zero
    pub fn new(layout: RegisterLayout) -> Self {
        let banks = Banks::new(layout.register_count());
        Self {
            layout,
            banks: RwLock::new(banks),
        }
    }

    /// Build the layout from configuration and apply the initial values
    pub fn from_config(config: &RegisterConfig) -> Result<Self> {
        let map = Self::new(RegisterLayout::from_config(config)?);
        map.set_input_f32(map.layout.points().power_cap, config.initial_power_cap)?;
        Ok(map)
    }

    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    fn span_count(bank: Bank, address: u16, words: &[u16]) -> Result<u16> {
        u16::try_from(words.len()).map_err(|_| CurtailError::OutOfRange {
            bank,
            address,
            count: u16::MAX,
        })
    }

    /// Read `count` words starting at `address`
    pub fn read(&self, bank: Bank, address: u16, count: u16) -> Result<Vec<u16>> {
        self.layout.covered(bank, address, count)?;
        let start = usize::from(address);
        let banks = self.banks.read();
        Ok(banks.get(bank)[start..start + usize::from(count)].to_vec())
    }

    /// Master-path write
    ///
    /// Input targets are rejected before any range check. A holding write
    /// that covers the echo source is mirrored into the echo target under
    /// the same lock.
    pub fn write(&self, bank: Bank, address: u16, words: &[u16]) -> Result<()> {
        if bank == Bank::Input {
            return Err(CurtailError::ReadOnlyViolation { bank, address });
        }
        let count = Self::span_count(bank, address, words)?;
        self.layout.covered(bank, address, count)?;

        let echo = self.layout.echo();
        let end = u32::from(address) + u32::from(count);
        let mirrored = (u32::from(address) <= u32::from(echo.source)
            && u32::from(echo.source) < end)
            .then(|| usize::from(echo.source - address));

        let mut banks = self.banks.write();
        let start = usize::from(address);
        banks.get_mut(bank)[start..start + words.len()].copy_from_slice(words);
        if let Some(offset) = mirrored {
            // covered() guarantees the whole source entry lies inside the span
            let width = self
                .layout
                .entry_at(Bank::Holding, u32::from(echo.source))
                .map_or(0, |e| usize::from(e.width()));
            let target = usize::from(echo.target);
            banks.input[target..target + width].copy_from_slice(&words[offset..offset + width]);
        }
        Ok(())
    }

    /// Device-path write into the input bank
    pub fn set_input_words(&self, address: u16, words: &[u16]) -> Result<()> {
        let count = Self::span_count(Bank::Input, address, words)?;
        self.layout.covered(Bank::Input, address, count)?;
        let start = usize::from(address);
        let mut banks = self.banks.write();
        banks.input[start..start + words.len()].copy_from_slice(words);
        Ok(())
    }

    pub fn read_f32(&self, bank: Bank, address: u16) -> Result<f32> {
        let words = self.read(bank, address, 2)?;
        codec::decode_f32(&words)
    }

    pub fn set_input_f32(&self, address: u16, value: f32) -> Result<()> {
        self.set_input_words(address, &codec::encode_f32(value))
    }

    fn check_bitfield(&self, bank: Bank, address: u16, bit: BitPosition) -> Result<()> {
        if bit > MAX_BIT_POSITION {
            return Err(CurtailError::OutOfRange {
                bank,
                address,
                count: 1,
            });
        }
        let entries = self.layout.covered(bank, address, 1)?;
        match entries.first().map(|e| &e.encoding) {
            Some(Encoding::Bitfield(_)) => Ok(()),
            _ => Err(CurtailError::incomplete(format!(
                "{} register {} is not a bitfield",
                bank, address
            ))),
        }
    }

    pub fn read_bit(&self, bank: Bank, address: u16, bit: BitPosition) -> Result<bool> {
        self.check_bitfield(bank, address, bit)?;
        let word = self.banks.read().get(bank)[usize::from(address)];
        codec::extract_bit(word, bit)
    }

    /// Set one bit, preserving the rest of the register
    pub fn set_bit(&self, bank: Bank, address: u16, bit: BitPosition, value: bool) -> Result<()> {
        self.check_bitfield(bank, address, bit)?;
        let mut banks = self.banks.write();
        let slot = &mut banks.get_mut(bank)[usize::from(address)];
        *slot = codec::set_bit(*slot, bit, value)?;
        Ok(())
    }

    /// Name and decode the entries covered by a span
    pub fn decode(&self, bank: Bank, address: u16, words: &[u16]) -> Result<Vec<DecodedPoint>> {
        self.layout.decode(bank, address, words)
    }

    /// Copy of a whole bank
    pub fn snapshot(&self, bank: Bank) -> Vec<u16> {
        self.banks.read().get(bank).to_vec()
    }
}
