//! Register layout definitions
//!
//! The layout is built from configuration once, validated, and never
//! changes afterwards. Every span check the register map and the gateway
//! perform goes through it.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::codec::{self, BitPosition, MAX_BIT_POSITION};
use crate::config::RegisterConfig;
use crate::error::{CurtailError, Result};

/// Register bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bank {
    /// Read-only to the master, fed by the device
    Input,
    /// Read-write, fed by the master
    Holding,
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bank::Input => write!(f, "input"),
            Bank::Holding => write!(f, "holding"),
        }
    }
}

/// A named boolean inside a bitfield register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedBit {
    pub name: String,
    pub bit: BitPosition,
}

impl NamedBit {
    pub fn new(name: impl Into<String>, bit: BitPosition) -> Self {
        Self {
            name: name.into(),
            bit,
        }
    }
}

/// Word encoding of a register entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// IEEE 754 single precision, big-endian word order
    Float32Be,
    /// Independent booleans sharing one register
    Bitfield(Vec<NamedBit>),
}

impl Encoding {
    /// Number of 16-bit words the encoding occupies
    pub fn width(&self) -> u16 {
        match self {
            Encoding::Float32Be => 2,
            Encoding::Bitfield(_) => 1,
        }
    }
}

/// One addressable unit of the virtual device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEntry {
    pub name: String,
    pub bank: Bank,
    pub address: u16,
    pub encoding: Encoding,
}

impl RegisterEntry {
    pub fn float(name: impl Into<String>, bank: Bank, address: u16) -> Self {
        Self {
            name: name.into(),
            bank,
            address,
            encoding: Encoding::Float32Be,
        }
    }

    pub fn bitfield(name: impl Into<String>, bank: Bank, address: u16, bits: Vec<NamedBit>) -> Self {
        Self {
            name: name.into(),
            bank,
            address,
            encoding: Encoding::Bitfield(bits),
        }
    }

    pub fn width(&self) -> u16 {
        self.encoding.width()
    }

    /// One past the last address the entry occupies
    pub fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.width())
    }

    pub fn contains(&self, address: u32) -> bool {
        u32::from(self.address) <= address && address < self.end()
    }

    fn is_float(&self) -> bool {
        matches!(self.encoding, Encoding::Float32Be)
    }

    fn has_bit(&self, bit: BitPosition) -> bool {
        match &self.encoding {
            Encoding::Bitfield(bits) => bits.iter().any(|b| b.bit == bit),
            Encoding::Float32Be => false,
        }
    }
}

/// Register + bit offset of a boolean point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitPoint {
    pub address: u16,
    pub bit: BitPosition,
}

/// Holding entry whose writes are mirrored into an input entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoRule {
    pub source: u16,
    pub target: u16,
}

/// Addresses the control and reporting loops work with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutPoints {
    pub aggregate_power: u16,
    pub power_cap: u16,
    pub auxiliary: u16,
    pub status: u16,
    pub call_activated: BitPoint,
    pub operating: BitPoint,
    pub ready: BitPoint,
    pub available_power: u16,
    pub setpoint_echo: u16,
    pub setpoint: u16,
    pub activation: BitPoint,
}

/// Decoded value of one entry
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Float(f32),
    Bits(Vec<(String, bool)>),
}

/// Entry name plus its decoded value, used for audit records
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPoint {
    pub name: String,
    pub address: u16,
    pub value: PointValue,
}

impl fmt::Display for DecodedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            PointValue::Float(v) => write!(f, "{}={}", self.name, v),
            PointValue::Bits(bits) => {
                write!(f, "{}={{", self.name)?;
                for (i, (name, value)) in bits.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", name, u8::from(*value))?;
                }
                write!(f, "}}")
            },
        }
    }
}

/// Validated register layout
#[derive(Debug, Clone)]
pub struct RegisterLayout {
    register_count: u16,
    entries: Vec<RegisterEntry>,
    points: LayoutPoints,
    echo: EchoRule,
}

impl RegisterLayout {
    /// Build the standard layout from configured addresses
    pub fn from_config(config: &RegisterConfig) -> Result<Self> {
        let bits = &config.status_bits;
        let entries = vec![
            RegisterEntry::float("aggregate_power", Bank::Input, config.aggregate_power),
            RegisterEntry::float("power_cap", Bank::Input, config.power_cap),
            RegisterEntry::float("auxiliary", Bank::Input, config.auxiliary),
            RegisterEntry::bitfield(
                "status",
                Bank::Input,
                config.status,
                vec![
                    NamedBit::new("call_activated", bits.call_activated),
                    NamedBit::new("operating", bits.operating),
                    NamedBit::new("ready", bits.ready),
                ],
            ),
            RegisterEntry::float("available_power", Bank::Input, config.available_power),
            RegisterEntry::float("setpoint_echo", Bank::Input, config.setpoint_echo),
            RegisterEntry::float("setpoint", Bank::Holding, config.setpoint),
            RegisterEntry::bitfield(
                "activation",
                Bank::Holding,
                config.activation,
                vec![NamedBit::new("poll_enabled", config.activation_bit)],
            ),
        ];

        let points = LayoutPoints {
            aggregate_power: config.aggregate_power,
            power_cap: config.power_cap,
            auxiliary: config.auxiliary,
            status: config.status,
            call_activated: BitPoint {
                address: config.status,
                bit: bits.call_activated,
            },
            operating: BitPoint {
                address: config.status,
                bit: bits.operating,
            },
            ready: BitPoint {
                address: config.status,
                bit: bits.ready,
            },
            available_power: config.available_power,
            setpoint_echo: config.setpoint_echo,
            setpoint: config.setpoint,
            activation: BitPoint {
                address: config.activation,
                bit: config.activation_bit,
            },
        };

        let echo = EchoRule {
            source: config.setpoint,
            target: config.setpoint_echo,
        };

        Self::new(config.register_count, entries, points, echo)
    }

    /// Validate and assemble a layout
    pub fn new(
        register_count: u16,
        mut entries: Vec<RegisterEntry>,
        points: LayoutPoints,
        echo: EchoRule,
    ) -> Result<Self> {
        if register_count == 0 {
            return Err(CurtailError::config("register_count must be greater than 0"));
        }

        for entry in &entries {
            if entry.end() > u32::from(register_count) {
                return Err(CurtailError::config(format!(
                    "Entry '{}' at {} {} exceeds register count {}",
                    entry.name, entry.bank, entry.address, register_count
                )));
            }
            if let Encoding::Bitfield(bits) = &entry.encoding {
                for (i, named) in bits.iter().enumerate() {
                    if named.bit > MAX_BIT_POSITION {
                        return Err(CurtailError::config(format!(
                            "Bit '{}' of '{}' uses offset {} (0-15 allowed)",
                            named.name, entry.name, named.bit
                        )));
                    }
                    if bits[..i].iter().any(|other| other.bit == named.bit) {
                        return Err(CurtailError::config(format!(
                            "Bit offset {} used twice in '{}'",
                            named.bit, entry.name
                        )));
                    }
                }
            }
        }

        entries.sort_by_key(|e| (e.bank == Bank::Holding, e.address));
        for pair in entries.windows(2) {
            if pair[0].bank == pair[1].bank && pair[0].end() > u32::from(pair[1].address) {
                return Err(CurtailError::config(format!(
                    "Entries '{}' and '{}' overlap in {} bank",
                    pair[0].name, pair[1].name, pair[0].bank
                )));
            }
        }

        let layout = Self {
            register_count,
            entries,
            points,
            echo,
        };
        layout.validate_points()?;
        Ok(layout)
    }

    fn validate_points(&self) -> Result<()> {
        let p = &self.points;
        let floats = [
            (Bank::Input, p.aggregate_power, "aggregate_power"),
            (Bank::Input, p.power_cap, "power_cap"),
            (Bank::Input, p.auxiliary, "auxiliary"),
            (Bank::Input, p.available_power, "available_power"),
            (Bank::Input, p.setpoint_echo, "setpoint_echo"),
            (Bank::Holding, p.setpoint, "setpoint"),
        ];
        for (bank, address, name) in floats {
            match self.entry_starting_at(bank, address) {
                Some(entry) if entry.is_float() => {},
                _ => {
                    return Err(CurtailError::config(format!(
                        "Point '{}' needs a float entry at {} {}",
                        name, bank, address
                    )))
                },
            }
        }

        let bit_points = [
            (Bank::Input, p.call_activated, "call_activated"),
            (Bank::Input, p.operating, "operating"),
            (Bank::Input, p.ready, "ready"),
            (Bank::Holding, p.activation, "activation"),
        ];
        for (bank, point, name) in bit_points {
            match self.entry_starting_at(bank, point.address) {
                Some(entry) if entry.has_bit(point.bit) => {},
                _ => {
                    return Err(CurtailError::config(format!(
                        "Point '{}' needs bit {} of a bitfield at {} {}",
                        name, point.bit, bank, point.address
                    )))
                },
            }
        }

        let source = self.entry_starting_at(Bank::Holding, self.echo.source);
        let target = self.entry_starting_at(Bank::Input, self.echo.target);
        match (source, target) {
            (Some(s), Some(t)) if s.encoding.width() == t.encoding.width() => Ok(()),
            _ => Err(CurtailError::config(format!(
                "Echo rule holding {} -> input {} needs matching entries",
                self.echo.source, self.echo.target
            ))),
        }
    }

    pub fn register_count(&self) -> u16 {
        self.register_count
    }

    pub fn entries(&self) -> &[RegisterEntry] {
        &self.entries
    }

    pub fn points(&self) -> &LayoutPoints {
        &self.points
    }

    pub fn echo(&self) -> EchoRule {
        self.echo
    }

    /// Entry that covers `address`, if any
    pub fn entry_at(&self, bank: Bank, address: u32) -> Option<&RegisterEntry> {
        self.entries
            .iter()
            .find(|e| e.bank == bank && e.contains(address))
    }

    fn entry_starting_at(&self, bank: Bank, address: u16) -> Option<&RegisterEntry> {
        self.entries
            .iter()
            .find(|e| e.bank == bank && e.address == address)
    }

    /// Entries covered by a span, in address order
    ///
    /// Fails with `OutOfRange` when the span is empty, reaches past the
    /// register count or touches an undefined address, and with
    /// `IncompleteEncoding` when it starts or ends inside a float.
    pub fn covered(&self, bank: Bank, address: u16, count: u16) -> Result<Vec<&RegisterEntry>> {
        let out_of_range = CurtailError::OutOfRange {
            bank,
            address,
            count,
        };
        let end = u32::from(address) + u32::from(count);
        if count == 0 || end > u32::from(self.register_count) {
            return Err(out_of_range);
        }

        let mut covered = Vec::new();
        let mut cursor = u32::from(address);
        while cursor < end {
            let entry = self
                .entry_at(bank, cursor)
                .ok_or_else(|| out_of_range.clone())?;
            if u32::from(entry.address) != cursor {
                return Err(CurtailError::incomplete(format!(
                    "span {}+{} starts inside '{}'",
                    address, count, entry.name
                )));
            }
            if entry.end() > end {
                return Err(CurtailError::incomplete(format!(
                    "span {}+{} ends inside '{}'",
                    address, count, entry.name
                )));
            }
            covered.push(entry);
            cursor = entry.end();
        }
        Ok(covered)
    }

    /// Decode the entries a span covers
    pub fn decode(&self, bank: Bank, address: u16, words: &[u16]) -> Result<Vec<DecodedPoint>> {
        let count = u16::try_from(words.len()).map_err(|_| CurtailError::OutOfRange {
            bank,
            address,
            count: u16::MAX,
        })?;
        let entries = self.covered(bank, address, count)?;

        let mut points = Vec::with_capacity(entries.len());
        for entry in entries {
            let offset = usize::from(entry.address - address);
            let slice = &words[offset..offset + usize::from(entry.width())];
            let value = match &entry.encoding {
                Encoding::Float32Be => PointValue::Float(codec::decode_f32(slice)?),
                Encoding::Bitfield(bits) => {
                    let mut decoded = Vec::with_capacity(bits.len());
                    for named in bits {
                        decoded.push((named.name.clone(), codec::extract_bit(slice[0], named.bit)?));
                    }
                    PointValue::Bits(decoded)
                },
            };
            points.push(DecodedPoint {
                name: entry.name.clone(),
                address: entry.address,
                value,
            });
        }
        Ok(points)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn standard() -> RegisterLayout {
        RegisterLayout::from_config(&RegisterConfig::default()).unwrap()
    }

    #[test]
    fn test_standard_layout() {
        let layout = standard();
        assert_eq!(layout.register_count(), 14);
        assert_eq!(layout.entries().len(), 8);
        assert_eq!(layout.points().setpoint, 10);
        assert_eq!(layout.points().activation, BitPoint { address: 12, bit: 0 });
        assert_eq!(layout.echo(), EchoRule { source: 10, target: 10 });
    }

    #[test]
    fn test_covered_spans() {
        let layout = standard();

        let covered = layout.covered(Bank::Input, 0, 7).unwrap();
        let names: Vec<_> = covered.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["aggregate_power", "power_cap", "auxiliary", "status"]);

        let covered = layout.covered(Bank::Holding, 10, 3).unwrap();
        assert_eq!(covered.len(), 2);
    }

    #[test]
    fn test_gap_is_out_of_range() {
        let layout = standard();
        // INPUT 7 is not defined
        assert!(matches!(
            layout.covered(Bank::Input, 6, 3),
            Err(CurtailError::OutOfRange { .. })
        ));
        // HOLDING 0 is not defined
        assert!(matches!(
            layout.covered(Bank::Holding, 0, 1),
            Err(CurtailError::OutOfRange { .. })
        ));
        assert!(matches!(
            layout.covered(Bank::Holding, 12, 0),
            Err(CurtailError::OutOfRange { .. })
        ));
        assert!(matches!(
            layout.covered(Bank::Holding, 12, 3),
            Err(CurtailError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_split_float_is_incomplete() {
        let layout = standard();
        assert!(matches!(
            layout.covered(Bank::Holding, 11, 1),
            Err(CurtailError::IncompleteEncoding(_))
        ));
        assert!(matches!(
            layout.covered(Bank::Input, 0, 1),
            Err(CurtailError::IncompleteEncoding(_))
        ));
        assert!(matches!(
            layout.covered(Bank::Input, 1, 2),
            Err(CurtailError::IncompleteEncoding(_))
        ));
    }

    #[test]
    fn test_overlap_rejected() {
        let config = RegisterConfig {
            auxiliary: 3,
            ..RegisterConfig::default()
        };
        let err = RegisterLayout::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_entry_beyond_register_count_rejected() {
        let config = RegisterConfig {
            register_count: 12,
            ..RegisterConfig::default()
        };
        assert!(RegisterLayout::from_config(&config).is_err());
    }

    #[test]
    fn test_bit_offset_validation() {
        let mut config = RegisterConfig::default();
        config.status_bits.ready = 16;
        assert!(RegisterLayout::from_config(&config).is_err());

        let mut config = RegisterConfig::default();
        config.status_bits.ready = 8;
        let err = RegisterLayout::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("used twice"));
    }

    #[test]
    fn test_decode_points() {
        let layout = standard();
        let [h, l] = codec::encode_f32(300.0);
        let points = layout.decode(Bank::Holding, 10, &[h, l, 0x0001]).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, PointValue::Float(300.0));
        assert_eq!(points[0].to_string(), "setpoint=300");
        assert_eq!(points[1].to_string(), "activation={poll_enabled:1}");

        let points = layout.decode(Bank::Input, 6, &[0x1100]).unwrap();
        assert_eq!(
            points[0].to_string(),
            "status={call_activated:0,operating:1,ready:1}"
        );
    }
}
