//! Flag-word layout and sizing.
//!
//! Each component gets at most one local and one global integer bit-field.
//! The width is the smallest standard integer strictly wider than the bit
//! count (the emitted C++ flag fields stay signed-int compatible, so one bit
//! is reserved); overflow past 63 usable bits is a hard compile error.

use crate::ir::error::ErrorLog;

/// Meaning of one bit in a component's flag word, in layout order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlagBit {
    /// Latch for the event target with this index.
    Event(usize),
    Alive,
    Newborn,
    DupGuard,
    ClearNewbornGuard,
    InactiveGuard,
}

impl FlagBit {
    pub fn cpp_name(&self, prefix: &str) -> String {
        match self {
            FlagBit::Event(i) => format!("{}_EV{}", prefix, i),
            FlagBit::Alive => format!("{}_ALIVE", prefix),
            FlagBit::Newborn => format!("{}_NEWBORN", prefix),
            FlagBit::DupGuard => format!("{}_DUPGUARD", prefix),
            FlagBit::ClearNewbornGuard => format!("{}_CLEARNEW", prefix),
            FlagBit::InactiveGuard => format!("{}_INACTIVE", prefix),
        }
    }
}

/// A sized flag word: ordered bits plus the chosen integer width in bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlagWord {
    pub bits: Vec<FlagBit>,
    pub width: u8,
}

impl FlagWord {
    pub fn cpp_type(&self) -> &'static str {
        match self.width {
            8 => "uint8_t",
            16 => "uint16_t",
            32 => "uint32_t",
            _ => "uint64_t",
        }
    }

    pub fn bit_index(&self, bit: &FlagBit) -> Option<usize> {
        self.bits.iter().position(|b| b == bit)
    }
}

/// Pick the smallest integer width strictly wider than `bits`. Zero bits
/// means no word at all; more than 63 cannot be represented.
pub fn width_for(bits: usize) -> Result<Option<u8>, ()> {
    match bits {
        0 => Ok(None),
        1..=7 => Ok(Some(8)),
        8..=15 => Ok(Some(16)),
        16..=31 => Ok(Some(32)),
        32..=63 => Ok(Some(64)),
        _ => Err(()),
    }
}

/// Build a sized flag word from the required bits, reporting flag overflow
/// as a fatal resource-exhaustion error.
pub fn build_word(bits: Vec<FlagBit>, path: &str, log: &mut ErrorLog) -> Option<FlagWord> {
    match width_for(bits.len()) {
        Ok(None) => None,
        Ok(Some(width)) => Some(FlagWord { bits, width }),
        Err(()) => {
            log.fatal(
                path,
                format!(
                    "{} flag bits exceed the largest supported integer flag word",
                    bits.len()
                ),
            );
            None
        }
    }
}
