//! Typed generator inputs.
//!
//! These arrive already validated for shape (they are produced by an external config
//! layer); the checks here cover only what the generators themselves depend on.

use num::BigUint;
use serde::{Deserialize, Serialize};

use crate::generate::{GenError, GenErrorKind};
use crate::language;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldDescriptor {
    CrandallPrime { pi: u32, delta: u64 },
    MersennePrime { pi: u32 },
    Binary { n: u32, polynomial: Polynomial },
}

/// Reduction polynomial exponents, highest first. A nested list describes a tower of
/// extensions, one polynomial per level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Polynomial {
    Flat(Vec<u32>),
    Nested(Vec<Vec<u32>>),
}

impl Polynomial {
    pub fn levels(&self) -> usize {
        match self {
            Polynomial::Flat(_) => 1,
            Polynomial::Nested(levels) => levels.len(),
        }
    }

    pub fn single_level(&self) -> Option<&[u32]> {
        match self {
            Polynomial::Flat(p) => Some(p),
            Polynomial::Nested(levels) if levels.len() == 1 => Some(&levels[0]),
            Polynomial::Nested(_) => None,
        }
    }
}

impl FieldDescriptor {
    /// Bit size of the field: π for prime fields, n for binary fields.
    pub fn bits(&self) -> u32 {
        match self {
            FieldDescriptor::CrandallPrime { pi, .. } | FieldDescriptor::MersennePrime { pi } => {
                *pi
            }
            FieldDescriptor::Binary { n, .. } => *n,
        }
    }

    pub fn delta(&self) -> Option<u64> {
        match self {
            FieldDescriptor::CrandallPrime { delta, .. } => Some(*delta),
            FieldDescriptor::MersennePrime { .. } => Some(1),
            FieldDescriptor::Binary { .. } => None,
        }
    }

    /// p = 2^π − δ for prime fields.
    pub fn modulus(&self) -> Option<BigUint> {
        let delta = self.delta()?;
        Some((BigUint::from(1u8) << self.bits()) - BigUint::from(delta))
    }

    pub fn describe(&self) -> String {
        match self {
            FieldDescriptor::CrandallPrime { pi, delta } => format!("2^{pi}-{delta}"),
            FieldDescriptor::MersennePrime { pi } => format!("2^{pi}-1"),
            FieldDescriptor::Binary { n, .. } => format!("GF(2^{n})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimbLayout {
    #[serde(default)]
    pub widths: Vec<u32>,
    pub wordsize: u32,
}

impl LimbLayout {
    pub fn numlimbs(&self) -> usize {
        self.widths.len()
    }

    pub fn total_bits(&self) -> u32 {
        self.widths.iter().sum()
    }

    /// Bit offset of each limb, with the total appended.
    pub fn offsets(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.widths.len() + 1);
        let mut acc = 0;
        out.push(0);
        for w in &self.widths {
            acc += w;
            out.push(acc);
        }
        out
    }

    pub fn mask(&self, i: usize) -> u64 {
        low_mask(self.widths[i])
    }

    pub fn validate(&self, field_bits: u32) -> Result<(), GenError> {
        if self.wordsize != 32 && self.wordsize != 64 {
            return Err(GenError::new(
                GenErrorKind::UnsupportedConfiguration,
                format!("word size must be 32 or 64, got {}", self.wordsize),
            ));
        }
        let max_limbs = language::limits::max_limbs();
        if self.widths.len() < 2 || self.widths.len() > max_limbs {
            return Err(GenError::new(
                GenErrorKind::UnsupportedConfiguration,
                format!(
                    "limb count must be within 2..={max_limbs}, got {}",
                    self.widths.len()
                ),
            ));
        }
        if let Some(w) = self.widths.iter().find(|w| **w == 0 || **w > self.wordsize) {
            return Err(GenError::new(
                GenErrorKind::UnsupportedConfiguration,
                format!(
                    "limb width {w} does not fit word size {}",
                    self.wordsize
                ),
            ));
        }
        if self.total_bits() < field_bits {
            return Err(GenError::new(
                GenErrorKind::UnsupportedConfiguration,
                format!(
                    "limb widths sum to {} bits, field needs {field_bits}",
                    self.total_bits()
                ),
            ));
        }
        let top = self.offsets()[self.widths.len() - 1];
        if top >= field_bits {
            return Err(GenError::new(
                GenErrorKind::UnsupportedConfiguration,
                format!("top limb starts at bit {top}, past the field size {field_bits}"),
            ));
        }
        Ok(())
    }
}

pub fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMode {
    /// The message goes through the external transform before unpacking.
    #[default]
    Explicit,
    /// Encoding byte and masks are applied inline while unpacking.
    Implicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// The byte lands above the message: V = M + byte·2^(8·blocksize).
    #[default]
    High,
    /// The message is shifted up and the byte fills the low bits.
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingSpec {
    pub blocksize: usize,
    pub keysize: usize,
    pub mode: EncodingMode,
    /// Encoding byte; zero means none.
    pub byte: u8,
    pub placement: Placement,
    /// Per-limb masks (per 64-bit lane for binary fields). Empty means all ones; a
    /// single entry applies to every limb.
    pub masks: Vec<u64>,
    pub encode_last_only: bool,
    /// Key clamp as a hexadecimal integer, e.g. `0ffffffc0ffffffc0ffffffc0fffffff`.
    pub key_clamp: Option<String>,
}

impl Default for EncodingSpec {
    fn default() -> Self {
        Self {
            blocksize: 16,
            keysize: 16,
            mode: EncodingMode::Explicit,
            byte: 0,
            placement: Placement::High,
            masks: Vec::new(),
            encode_last_only: false,
            key_clamp: None,
        }
    }
}

impl EncodingSpec {
    pub fn byte_bits(&self) -> u32 {
        8 - self.byte.leading_zeros()
    }

    /// Mask for limb (or lane) `i`; explicit encodings never mask.
    pub fn limb_mask(&self, i: usize) -> u64 {
        if self.mode == EncodingMode::Explicit {
            return u64::MAX;
        }
        match self.masks.as_slice() {
            [] => u64::MAX,
            [m] => *m,
            ms => ms.get(i).copied().unwrap_or(u64::MAX),
        }
    }

    pub fn key_clamp_value(&self) -> Result<Option<BigUint>, GenError> {
        let Some(hex) = &self.key_clamp else {
            return Ok(None);
        };
        let digits = hex.trim_start_matches("0x");
        BigUint::parse_bytes(digits.as_bytes(), 16)
            .map(Some)
            .ok_or_else(|| {
                GenError::new(
                    GenErrorKind::UnsupportedConfiguration,
                    format!("key clamp is not a hexadecimal integer: {hex:?}"),
                )
            })
    }

    /// Bits an encoded block occupies: the message plus the encoding byte.
    pub fn encoded_bits(&self) -> u32 {
        (self.blocksize as u32) * 8 + self.byte_bits()
    }

    pub fn validate(&self, numlimbs: usize) -> Result<(), GenError> {
        if self.blocksize == 0 || self.keysize == 0 {
            return Err(GenError::new(
                GenErrorKind::UnsupportedConfiguration,
                "block size and key size must be positive".to_string(),
            ));
        }
        if self.masks.len() > 1 && self.masks.len() != numlimbs {
            return Err(GenError::new(
                GenErrorKind::UnsupportedConfiguration,
                format!(
                    "encoding mask list has {} entries, expected 1 or {numlimbs}",
                    self.masks.len()
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MulMethod {
    #[default]
    Schoolbook,
    Karatsuba,
}

/// Which intermediate values need double-width storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CarryWidth {
    /// An intra-limb carry can exceed the native word.
    pub doublecarry: bool,
    /// The top carry times the fold factor can exceed the native word.
    pub doublecarryover: bool,
    /// A δ-scaled operand limb can exceed the native word.
    pub doublecarry_temp: bool,
}

impl CarryWidth {
    pub fn union(self, other: CarryWidth) -> CarryWidth {
        CarryWidth {
            doublecarry: self.doublecarry || other.doublecarry,
            doublecarryover: self.doublecarryover || other.doublecarryover,
            doublecarry_temp: self.doublecarry_temp || other.doublecarry_temp,
        }
    }

    /// True when every flag set in `other` is also set here.
    pub fn covers(self, other: CarryWidth) -> bool {
        (self.doublecarry || !other.doublecarry)
            && (self.doublecarryover || !other.doublecarryover)
            && (self.doublecarry_temp || !other.doublecarry_temp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MultiplicationSpec {
    pub method: MulMethod,
    pub precompute: bool,
    /// Flags forced on regardless of the bound analysis.
    pub force: CarryWidth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorInput {
    pub field: FieldDescriptor,
    pub limbs: LimbLayout,
    #[serde(default)]
    pub encoding: EncodingSpec,
    #[serde(default)]
    pub multiplication: MultiplicationSpec,
}
