// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Packet registers and bit ranges.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The number of 32-bit Nicira extension registers a packet carries.
pub const NX_REG_COUNT: usize = 16;

/// The width of each Nicira extension register, in bits.
pub const NX_REG_BITS: u16 = 32;

/// One of the packet-scoped scratch registers `reg0` .. `reg15`.
///
/// Registers survive across resubmits for the lifetime of a single
/// packet's traversal of the pipeline and are the only way for two
/// non-adjacent tables to share per-packet state.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct NxReg(u8);

impl NxReg {
    /// Create a register reference.
    ///
    /// # Panics
    ///
    /// When `id` names a register that doesn't exist. In a `const`
    /// context this is a compile error.
    pub const fn new(id: u8) -> Self {
        assert!((id as usize) < NX_REG_COUNT, "no such NX register");
        Self(id)
    }

    pub const fn try_new(id: u8) -> Option<Self> {
        if (id as usize) < NX_REG_COUNT { Some(Self(id)) } else { None }
    }

    pub const fn id(self) -> u8 {
        self.0
    }

    /// The name used in match syntax, e.g. `reg0`.
    pub fn reg(self) -> String {
        format!("reg{}", self.0)
    }

    /// The name used in action syntax, e.g. `NXM_NX_REG0`.
    pub fn nxm(self) -> String {
        format!("NXM_NX_REG{}", self.0)
    }
}

impl TryFrom<u8> for NxReg {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::try_new(id).ok_or_else(|| format!("no such NX register: {id}"))
    }
}

impl From<NxReg> for u8 {
    fn from(reg: NxReg) -> u8 {
        reg.0
    }
}

impl Display for NxReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "reg{}", self.0)
    }
}

/// An inclusive range of bits `[start..end]` within a field.
///
/// A range is field agnostic; whether it fits the field it is applied
/// to is checked when the owning flow is finalized.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(try_from = "RawBitRange")]
pub struct BitRange {
    start: u8,
    end: u8,
}

/// The unchecked serialized form of a [`BitRange`].
#[derive(Deserialize)]
struct RawBitRange {
    start: u8,
    end: u8,
}

impl TryFrom<RawBitRange> for BitRange {
    type Error = String;

    fn try_from(raw: RawBitRange) -> Result<Self, Self::Error> {
        Self::try_new(raw.start, raw.end).ok_or_else(|| {
            format!("bad bit range [{}..{}]", raw.start, raw.end)
        })
    }
}

impl BitRange {
    /// The largest field any range may address: `ct_label`.
    pub const MAX_BITS: u16 = 128;

    /// Create a range.
    ///
    /// # Panics
    ///
    /// When `start > end` or `end` is past the widest field. In a
    /// `const` context this is a compile error.
    pub const fn new(start: u8, end: u8) -> Self {
        assert!(start <= end, "bit range start after end");
        assert!((end as u16) < Self::MAX_BITS, "bit range too wide");
        Self { start, end }
    }

    pub const fn try_new(start: u8, end: u8) -> Option<Self> {
        if start <= end && (end as u16) < Self::MAX_BITS {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// The whole of a field `bits` wide.
    pub const fn full(bits: u16) -> Self {
        assert!(bits > 0 && bits <= Self::MAX_BITS, "bad field width");
        Self { start: 0, end: (bits - 1) as u8 }
    }

    pub const fn start(self) -> u8 {
        self.start
    }

    pub const fn end(self) -> u8 {
        self.end
    }

    pub const fn width(self) -> u16 {
        (self.end - self.start) as u16 + 1
    }

    /// Does the range lie wholly within a field `bits` wide?
    pub const fn fits(self, bits: u16) -> bool {
        (self.end as u16) < bits
    }

    /// Does `value` fit in the range without truncation?
    pub fn holds(self, value: u128) -> bool {
        self.width() >= 128 || value >> self.width() == 0
    }

    /// The mask of the unshifted value, `width` low bits set.
    pub fn value_mask(self) -> u128 {
        if self.width() >= 128 {
            u128::MAX
        } else {
            (1u128 << self.width()) - 1
        }
    }

    /// The mask of the range in place within its field.
    pub fn field_mask(self) -> u128 {
        self.value_mask() << self.start
    }

    /// Extract the range from a whole-field value.
    pub fn extract(self, field: u128) -> u128 {
        (field >> self.start) & self.value_mask()
    }

    /// Replace the range within a whole-field value.
    pub fn deposit(self, field: u128, value: u128) -> u128 {
        (field & !self.field_mask())
            | ((value & self.value_mask()) << self.start)
    }
}

impl Display for BitRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}..{}]", self.start, self.end)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reg_names() {
        let r = NxReg::new(1);
        assert_eq!(r.reg(), "reg1");
        assert_eq!(r.nxm(), "NXM_NX_REG1");
        assert!(NxReg::try_new(16).is_none());
    }

    #[test]
    fn range_masks() {
        let hi = BitRange::new(16, 31);
        assert_eq!(hi.width(), 16);
        assert_eq!(hi.field_mask(), 0xffff_0000);
        assert_eq!(hi.deposit(0x0000_0002, 0x1), 0x0001_0002);
        assert_eq!(hi.extract(0x0001_0002), 0x1);

        let lo = BitRange::new(0, 15);
        assert_eq!(lo.deposit(0x0001_0002, 0x1), 0x0001_0001);
        assert!(lo.holds(0xffff));
        assert!(!lo.holds(0x1_0000));
    }

    #[test]
    fn range_bounds() {
        assert!(BitRange::try_new(4, 3).is_none());
        assert!(BitRange::try_new(0, 128).is_none());
        assert!(BitRange::new(0, 47).fits(48));
        assert!(!BitRange::new(16, 47).fits(32));
        assert_eq!(BitRange::full(128).value_mask(), u128::MAX);
    }

    #[test]
    fn deserialize_checks_bounds() {
        let r: BitRange =
            serde_json::from_str(r#"{"start":16,"end":31}"#).unwrap();
        assert_eq!(r, BitRange::new(16, 31));
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"start":16,"end":31}"#);

        assert!(serde_json::from_str::<BitRange>(r#"{"start":5,"end":3}"#).is_err());
        assert!(serde_json::from_str::<BitRange>(r#"{"start":0,"end":128}"#).is_err());

        assert_eq!(serde_json::from_str::<NxReg>("1").unwrap(), NxReg::new(1));
        assert_eq!(serde_json::to_string(&NxReg::new(1)).unwrap(), "1");
        assert!(serde_json::from_str::<NxReg>("16").is_err());
    }
}
