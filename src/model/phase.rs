//! Grid phases and per-phase current triples.

use std::fmt;
use std::ops::{Add, AddAssign, Index, IndexMut, Mul};

use serde::{Deserialize, Serialize};

/// One of the three grid (or station) phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    One,
    Two,
    Three,
}

impl Phase {
    /// All phases in enumeration order.
    pub const ALL: [Phase; 3] = [Phase::One, Phase::Two, Phase::Three];

    /// Zero-based index (0, 1, 2).
    pub fn index(self) -> usize {
        match self {
            Phase::One => 0,
            Phase::Two => 1,
            Phase::Three => 2,
        }
    }

    /// One-based phase number (1, 2, 3).
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    /// Phase for a zero-based index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.number())
    }
}

/// A value per phase, usually amperes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseCurrents(pub [f64; 3]);

impl PhaseCurrents {
    pub fn new(p1: f64, p2: f64, p3: f64) -> Self {
        Self([p1, p2, p3])
    }

    /// Same value on every phase.
    pub fn uniform(value: f64) -> Self {
        Self([value; 3])
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn max(&self) -> f64 {
        self.0.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Iterates `(phase, value)` pairs in phase order.
    pub fn iter(&self) -> impl Iterator<Item = (Phase, f64)> + '_ {
        Phase::ALL.iter().map(move |&p| (p, self[p]))
    }
}

impl Index<Phase> for PhaseCurrents {
    type Output = f64;

    fn index(&self, phase: Phase) -> &f64 {
        &self.0[phase.index()]
    }
}

impl IndexMut<Phase> for PhaseCurrents {
    fn index_mut(&mut self, phase: Phase) -> &mut f64 {
        &mut self.0[phase.index()]
    }
}

impl Add for PhaseCurrents {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl AddAssign for PhaseCurrents {
    fn add_assign(&mut self, rhs: Self) {
        for p in Phase::ALL {
            self[p] += rhs[p];
        }
    }
}

impl Mul<f64> for PhaseCurrents {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self(self.0.map(|v| v * rhs))
    }
}

impl fmt::Display for PhaseCurrents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.2}, {:.2}, {:.2}]", self.0[0], self.0[1], self.0[2])
    }
}
