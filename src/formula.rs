//! Molecular formulas as element histograms.
//!
//! Formulas keep their hydrogen count separate from the heavy-element
//! histogram because fragment-to-peak matching compares heavy-atom
//! skeletons and treats hydrogen differences as rearrangements.

use std::{collections::BTreeMap, fmt, str::FromStr};

use thiserror::Error;

use crate::molecule::Element;

/// Thrown by [`MolecularFormula::from_str`] for strings that are not a
/// sequence of element symbols with optional counts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid molecular formula: {0:?}")]
pub struct ParseFormulaError(pub String);

/// An element histogram with an explicit hydrogen count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MolecularFormula {
    counts: BTreeMap<Element, u32>,
    hydrogens: u32,
}

impl MolecularFormula {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` atoms of `element`; hydrogen goes to the hydrogen count.
    pub fn add(&mut self, element: Element, n: u32) {
        if element == Element::H {
            self.hydrogens += n;
        } else if n > 0 {
            *self.counts.entry(element).or_insert(0) += n;
        }
    }

    pub fn count(&self, element: Element) -> u32 {
        if element == Element::H {
            self.hydrogens
        } else {
            self.counts.get(&element).copied().unwrap_or(0)
        }
    }

    pub fn hydrogens(&self) -> u32 {
        self.hydrogens
    }

    /// Total number of atoms, hydrogens included.
    pub fn num_atoms(&self) -> u32 {
        self.counts.values().sum::<u32>() + self.hydrogens
    }

    pub fn is_empty(&self) -> bool {
        self.num_atoms() == 0
    }

    /// The same formula with all hydrogens removed.
    pub fn without_hydrogen(&self) -> Self {
        Self {
            counts: self.counts.clone(),
            hydrogens: 0,
        }
    }

    /// `true` iff both formulas have the same heavy-element histogram.
    pub fn same_skeleton(&self, other: &Self) -> bool {
        self.counts == other.counts
    }

    /// Signed hydrogen difference `self - other`.
    pub fn hydrogen_difference(&self, other: &Self) -> i64 {
        self.hydrogens as i64 - other.hydrogens as i64
    }
}

impl fmt::Display for MolecularFormula {
    /// Hill order: carbon, then hydrogen, then everything else
    /// alphabetically by symbol.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut write_one = |symbol: &str, n: u32| -> fmt::Result {
            match n {
                0 => Ok(()),
                1 => write!(f, "{symbol}"),
                _ => write!(f, "{symbol}{n}"),
            }
        };
        write_one("C", self.count(Element::C))?;
        write_one("H", self.hydrogens)?;
        let mut rest: Vec<(String, u32)> = self
            .counts
            .iter()
            .filter(|(e, _)| **e != Element::C)
            .map(|(e, n)| (e.to_string(), *n))
            .collect();
        rest.sort();
        for (symbol, n) in rest {
            write_one(&symbol, n)?;
        }
        Ok(())
    }
}

impl FromStr for MolecularFormula {
    type Err = ParseFormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut formula = MolecularFormula::new();
        let bytes = s.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if !bytes[i].is_ascii_uppercase() {
                return Err(ParseFormulaError(s.to_string()));
            }
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_lowercase() {
                i += 1;
            }
            let element = Element::from_str(&s[start..i])
                .map_err(|_| ParseFormulaError(s.to_string()))?;
            let digits_start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let n = if digits_start == i {
                1
            } else {
                s[digits_start..i]
                    .parse::<u32>()
                    .map_err(|_| ParseFormulaError(s.to_string()))?
            };
            formula.add(element, n);
        }
        Ok(formula)
    }
}
