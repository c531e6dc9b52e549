//! Axis identifiers and participation flags.
//!
//! Axes are addressed by `Axis` and stored in fixed `[f64; AXES]` arrays
//! indexed by `Axis::index()`. Participation of an axis in a move is tracked
//! with the `AxisFlags` bitflags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::consts::AXES;

/// Machine axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
    A = 3,
    B = 4,
    C = 5,
}

impl Axis {
    /// All axes in index order.
    pub const ALL: [Axis; AXES] = [Axis::X, Axis::Y, Axis::Z, Axis::A, Axis::B, Axis::C];

    /// Primary linear axes; the only ones a probe move may use.
    pub const LINEAR: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::X),
            1 => Some(Self::Y),
            2 => Some(Self::Z),
            3 => Some(Self::A),
            4 => Some(Self::B),
            5 => Some(Self::C),
            _ => None,
        }
    }

    /// Lowercase axis letter, as used in reports.
    #[inline]
    pub const fn as_char(self) -> char {
        match self {
            Self::X => 'x',
            Self::Y => 'y',
            Self::Z => 'z',
            Self::A => 'a',
            Self::B => 'b',
            Self::C => 'c',
        }
    }

    #[inline]
    pub const fn is_linear(self) -> bool {
        matches!(self, Self::X | Self::Y | Self::Z)
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char().to_ascii_uppercase())
    }
}

bitflags! {
    /// Axes participating in a move.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AxisFlags: u8 {
        const X = 0x01;
        const Y = 0x02;
        const Z = 0x04;
        const A = 0x08;
        const B = 0x10;
        const C = 0x20;
    }
}

impl AxisFlags {
    /// Linear axes mask (X | Y | Z).
    pub const LINEAR: Self = Self::from_bits_truncate(0x07);

    /// Rotary axes mask (A | B | C).
    pub const ROTARY: Self = Self::from_bits_truncate(0x38);

    #[inline]
    pub const fn from_axis(axis: Axis) -> Self {
        Self::from_bits_truncate(1 << axis as u8)
    }

    #[inline]
    pub const fn contains_axis(&self, axis: Axis) -> bool {
        self.contains(Self::from_axis(axis))
    }

    pub fn set_axis(&mut self, axis: Axis, value: bool) {
        self.set(Self::from_axis(axis), value);
    }

    /// Build flags from a per-axis boolean vector.
    pub fn from_bools(flags: &[bool; AXES]) -> Self {
        let mut out = Self::empty();
        for axis in Axis::ALL {
            out.set_axis(axis, flags[axis.index()]);
        }
        out
    }

    /// Iterate the participating axes in index order.
    pub fn axes(self) -> impl Iterator<Item = Axis> {
        Axis::ALL.into_iter().filter(move |a| self.contains_axis(*a))
    }
}

/// Euclidean distance between two axis vectors.
pub fn axis_vector_length(a: &[f64; AXES], b: &[f64; AXES]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (q - p) * (q - p))
        .sum::<f64>()
        .sqrt()
}
