//! V2000 molfile parsing.
//!
//! Explicit hydrogen atoms are folded into the hydrogen count of their
//! heavy neighbor; heavy atoms short of their default valence get the
//! difference as implicit hydrogens. The fragmenter therefore always
//! works on a heavy-atom skeleton.

use std::{fs, io, path::Path};

use thiserror::Error;

use crate::molecule::{Atom, Bond, Element, MolecularGraph};

#[derive(Debug, Error)]
pub enum MolfileError {
    #[error("molfile is truncated at line {0}")]
    Truncated(usize),
    #[error("unparsable field {field:?} on line {line}")]
    BadField { line: usize, field: String },
    #[error("unknown element {symbol:?} on line {line}")]
    UnknownElement { line: usize, symbol: String },
    #[error("invalid bond order {order} on line {line}")]
    BadBondOrder { line: usize, order: usize },
    #[error("bond endpoint {atom} out of range on line {line}")]
    BadBondEndpoint { line: usize, atom: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Parse the first molecule of a V2000 molfile.
pub fn parse_molfile_str(contents: &str) -> Result<MolecularGraph, MolfileError> {
    let lines: Vec<&str> = contents.lines().collect();
    let counts = lines.get(3).ok_or(MolfileError::Truncated(4))?;
    let num_atoms = parse_field(counts, 0..3, 4)?;
    let num_bonds = parse_field(counts, 3..6, 4)?;

    let atom_start = 4;
    let bond_start = atom_start + num_atoms;
    if lines.len() < bond_start + num_bonds {
        return Err(MolfileError::Truncated(lines.len() + 1));
    }

    let mut elements = Vec::with_capacity(num_atoms);
    for (i, line) in lines[atom_start..bond_start].iter().enumerate() {
        let lineno = atom_start + i + 1;
        let symbol = slice(line, 31..34).trim();
        let element: Element = symbol.parse().map_err(|_| MolfileError::UnknownElement {
            line: lineno,
            symbol: symbol.to_string(),
        })?;
        elements.push(element);
    }

    let mut bonds = Vec::with_capacity(num_bonds);
    for (i, line) in lines[bond_start..bond_start + num_bonds].iter().enumerate() {
        let lineno = bond_start + i + 1;
        let u: usize = parse_field(line, 0..3, lineno)?;
        let v: usize = parse_field(line, 3..6, lineno)?;
        let order: usize = parse_field(line, 6..9, lineno)?;
        for endpoint in [u, v] {
            if endpoint == 0 || endpoint > num_atoms {
                return Err(MolfileError::BadBondEndpoint {
                    line: lineno,
                    atom: endpoint,
                });
            }
        }
        let bond =
            Bond::try_from(order).map_err(|_| MolfileError::BadBondOrder { line: lineno, order })?;
        bonds.push((u - 1, v - 1, bond));
    }

    Ok(build(elements, bonds))
}

/// Read and parse a molfile from disk.
pub fn parse_molfile(path: &Path) -> Result<MolecularGraph, MolfileError> {
    parse_molfile_str(&fs::read_to_string(path)?)
}

/// Fold explicit hydrogens into their neighbors and derive implicit
/// hydrogens from the remaining valence.
fn build(elements: Vec<Element>, bonds: Vec<(usize, usize, Bond)>) -> MolecularGraph {
    let n = elements.len();
    let mut hydrogens = vec![0u8; n];
    let mut order_sum = vec![0.0f64; n];
    for &(u, v, bond) in &bonds {
        if elements[v] == Element::H && elements[u] != Element::H {
            hydrogens[u] += 1;
        }
        if elements[u] == Element::H && elements[v] != Element::H {
            hydrogens[v] += 1;
        }
        order_sum[u] += bond.order();
        order_sum[v] += bond.order();
    }

    // Remap heavy atoms to contiguous indices.
    let mut remap = vec![usize::MAX; n];
    let mut heavy = Vec::new();
    for (i, &element) in elements.iter().enumerate() {
        if element != Element::H {
            remap[i] = heavy.len();
            heavy.push(i);
        }
    }
    // A molecule of only explicit hydrogens keeps them as graph nodes.
    if heavy.is_empty() {
        let atoms = elements.iter().map(|&e| Atom::new(e, 0)).collect();
        return MolecularGraph::new(atoms, bonds);
    }

    let atoms = heavy
        .iter()
        .map(|&i| {
            let implicit = (elements[i].valence() as f64 - order_sum[i]).max(0.0) as u8;
            Atom::new(elements[i], hydrogens[i] + implicit)
        })
        .collect();
    let heavy_bonds = bonds
        .iter()
        .filter(|&&(u, v, _)| elements[u] != Element::H && elements[v] != Element::H)
        .map(|&(u, v, bond)| (remap[u], remap[v], bond))
        .collect();
    MolecularGraph::new(atoms, heavy_bonds)
}

fn slice(line: &str, range: std::ops::Range<usize>) -> &str {
    let end = range.end.min(line.len());
    let start = range.start.min(end);
    &line[start..end]
}

fn parse_field(line: &str, range: std::ops::Range<usize>, lineno: usize) -> Result<usize, MolfileError> {
    let field = slice(line, range).trim();
    field.parse().map_err(|_| MolfileError::BadField {
        line: lineno,
        field: field.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETHANOL: &str = "\
ethanol
  test

  3  2  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    0.0000    0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0  0  0  0
  2  3  1  0  0  0  0
M  END
";

    const METHANE_EXPLICIT: &str = "\
methane
  test

  5  4  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    0.0000    0.0000    0.0000 H   0  0  0  0  0  0  0  0  0  0  0  0
    0.0000    0.0000    0.0000 H   0  0  0  0  0  0  0  0  0  0  0  0
    0.0000    0.0000    0.0000 H   0  0  0  0  0  0  0  0  0  0  0  0
    0.0000    0.0000    0.0000 H   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0  0  0  0
  1  3  1  0  0  0  0
  1  4  1  0  0  0  0
  1  5  1  0  0  0  0
M  END
";

    #[test]
    fn implicit_hydrogens_fill_the_valence() {
        let mol = parse_molfile_str(ETHANOL).unwrap();
        assert_eq!(mol.natoms(), 3);
        assert_eq!(mol.nbonds(), 2);
        assert_eq!(mol.atom(0).hydrogens(), 3);
        assert_eq!(mol.atom(1).hydrogens(), 2);
        assert_eq!(mol.atom(2).hydrogens(), 1);
        assert_eq!(mol.formula().to_string(), "C2H6O");
    }

    #[test]
    fn explicit_hydrogens_fold_into_neighbors() {
        let mol = parse_molfile_str(METHANE_EXPLICIT).unwrap();
        assert_eq!(mol.natoms(), 1);
        assert_eq!(mol.nbonds(), 0);
        assert_eq!(mol.atom(0).hydrogens(), 4);
        assert_eq!(mol.formula().to_string(), "CH4");
    }

    const METHANE_PARTIAL: &str = "\
methane
  test

  2  1  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    0.0000    0.0000    0.0000 H   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0  0  0  0
M  END
";

    #[test]
    fn explicit_and_implicit_hydrogens_combine() {
        let mol = parse_molfile_str(METHANE_PARTIAL).unwrap();
        assert_eq!(mol.natoms(), 1);
        // One explicit hydrogen plus three filling the valence.
        assert_eq!(mol.atom(0).hydrogens(), 4);
        assert_eq!(mol.formula().to_string(), "CH4");
    }

    #[test]
    fn truncated_and_garbled_files_are_errors() {
        assert!(matches!(
            parse_molfile_str("just one line"),
            Err(MolfileError::Truncated(_))
        ));
        let garbled = ETHANOL.replace("  1  2  1", "  1  9  1");
        assert!(matches!(
            parse_molfile_str(&garbled),
            Err(MolfileError::BadBondEndpoint { atom: 9, .. })
        ));
    }
}
