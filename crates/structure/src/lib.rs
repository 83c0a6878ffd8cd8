//! Periodic atomic structures with per-atom Hubbard parameters

use std::{error::Error, fmt::Display};

use nalgebra as na;

pub mod atom;
pub use atom::*;

#[cfg(test)]
mod tests;

pub type Vec3 = na::Vector3<f64>;
pub type Mat3 = na::Matrix3<f64>;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum StructureError {
    ParseAtom(String),
    UnknownSymbol(String),
    LengthMismatch { expected: usize, got: usize },
    IndexOutOfRange { index: usize, natoms: usize },
    SingularCell,
}

impl Display for StructureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructureError::ParseAtom(line) => {
                write!(f, "failed to parse atom from `{line}`")
            }
            StructureError::UnknownSymbol(s) => {
                write!(f, "unknown atomic symbol `{s}`")
            }
            StructureError::LengthMismatch { expected, got } => write!(
                f,
                "expected one value per atom ({expected}), found {got}"
            ),
            StructureError::IndexOutOfRange { index, natoms } => {
                write!(f, "atom {index} out of range for {natoms} atoms")
            }
            StructureError::SingularCell => {
                write!(f, "cell vectors are linearly dependent")
            }
        }
    }
}

impl Error for StructureError {}

/// A distinct combination of element and per-atom parameters. pw.x assigns
/// Hubbard parameters and starting magnetizations per species, so two atoms
/// only share a species if all of these agree
#[derive(Debug, Clone, PartialEq)]
pub struct Species {
    pub atomic_number: usize,

    /// the label written to the pw.x input, the symbol with a numeric suffix
    /// when more than one species shares the element
    pub label: String,

    pub tag: usize,
    pub magmom: f64,
    pub hubbard_u: f64,
    pub hubbard_alpha: f64,
}

impl Species {
    fn from_atom(atom: &Atom) -> Self {
        Self {
            atomic_number: atom.atomic_number,
            label: atom.label().to_owned(),
            tag: atom.tag,
            magmom: atom.magmom,
            hubbard_u: atom.hubbard_u,
            hubbard_alpha: atom.hubbard_alpha,
        }
    }

    fn matches(&self, atom: &Atom) -> bool {
        self.atomic_number == atom.atomic_number
            && self.tag == atom.tag
            && self.magmom.to_bits() == atom.magmom.to_bits()
            && self.hubbard_u.to_bits() == atom.hubbard_u.to_bits()
            && self.hubbard_alpha.to_bits() == atom.hubbard_alpha.to_bits()
    }

    pub fn symbol(&self) -> &'static str {
        NUMBER_TO_SYMBOL[self.atomic_number]
    }
}

/// A periodic structure. The rows of `cell` are the lattice vectors in Å
#[derive(Clone, Debug, PartialEq)]
pub struct Structure {
    pub cell: Mat3,
    pub atoms: Vec<Atom>,
}

impl Structure {
    pub fn new(cell: Mat3, atoms: Vec<Atom>) -> Self {
        Self { cell, atoms }
    }

    /// parse one atom per non-blank line, in the format accepted by [Atom]'s
    /// [std::str::FromStr] implementation
    pub fn parse_atoms(s: &str) -> Result<Vec<Atom>, StructureError> {
        s.lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::parse)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    fn check_len(&self, got: usize) -> Result<(), StructureError> {
        if got != self.atoms.len() {
            return Err(StructureError::LengthMismatch {
                expected: self.atoms.len(),
                got,
            });
        }
        Ok(())
    }

    /// return a copy of `self` with `atoms[i]` replaced by `atoms[order[i]]`.
    /// every per-atom parameter moves with its atom
    pub fn reorder(&self, order: &[usize]) -> Result<Self, StructureError> {
        self.check_len(order.len())?;
        let mut atoms = Vec::with_capacity(order.len());
        for &i in order {
            let atom = self.atoms.get(i).ok_or(
                StructureError::IndexOutOfRange {
                    index: i,
                    natoms: self.len(),
                },
            )?;
            atoms.push(*atom);
        }
        Ok(Self {
            cell: self.cell,
            atoms,
        })
    }

    /// translate every atom in `self` by `vec`
    pub fn translate(&mut self, vec: Vec3) -> &mut Self {
        for atom in self.atoms.iter_mut() {
            *atom += vec;
        }
        self
    }

    /// translate `self` so that the atom at `index` sits at the origin
    pub fn center_on(
        &mut self,
        index: usize,
    ) -> Result<&mut Self, StructureError> {
        let pos = self
            .atoms
            .get(index)
            .ok_or(StructureError::IndexOutOfRange {
                index,
                natoms: self.len(),
            })?
            .position;
        Ok(self.translate(-pos))
    }

    pub fn set_tags(&mut self, tags: &[usize]) -> Result<(), StructureError> {
        self.check_len(tags.len())?;
        for (atom, &tag) in self.atoms.iter_mut().zip(tags) {
            atom.tag = tag;
        }
        Ok(())
    }

    pub fn set_hubbard_u(&mut self, us: &[f64]) -> Result<(), StructureError> {
        self.check_len(us.len())?;
        for (atom, &u) in self.atoms.iter_mut().zip(us) {
            atom.hubbard_u = u;
        }
        Ok(())
    }

    pub fn set_hubbard_alpha(
        &mut self,
        alphas: &[f64],
    ) -> Result<(), StructureError> {
        self.check_len(alphas.len())?;
        for (atom, &a) in self.atoms.iter_mut().zip(alphas) {
            atom.hubbard_alpha = a;
        }
        Ok(())
    }

    /// fractional coordinates of every atom, wrapped into [0, 1)
    pub fn scaled_positions(&self) -> Result<Vec<Vec3>, StructureError> {
        let inv = self
            .cell
            .try_inverse()
            .ok_or(StructureError::SingularCell)?;
        // positions are row vectors, frac = pos * cell^-1
        let inv_t = inv.transpose();
        Ok(self
            .atoms
            .iter()
            .map(|a| (inv_t * a.position).map(wrap))
            .collect())
    }

    /// the distinct species in order of first appearance
    pub fn species(&self) -> Vec<Species> {
        self.classify().0
    }

    /// the index into [Structure::species] of the species of each atom
    pub fn species_indices(&self) -> Vec<usize> {
        self.classify().1
    }

    /// the index into [Structure::species] of the species of the atom at
    /// `index`
    pub fn species_index(&self, index: usize) -> Option<usize> {
        self.classify().1.get(index).copied()
    }

    fn classify(&self) -> (Vec<Species>, Vec<usize>) {
        let mut species: Vec<Species> = Vec::new();
        let mut indices = Vec::with_capacity(self.atoms.len());
        for atom in &self.atoms {
            match species.iter().position(|s| s.matches(atom)) {
                Some(i) => indices.push(i),
                None => {
                    indices.push(species.len());
                    species.push(Species::from_atom(atom));
                }
            }
        }
        // number the labels of elements with more than one species
        for i in 0..species.len() {
            let num = species[i].atomic_number;
            let total =
                species.iter().filter(|s| s.atomic_number == num).count();
            if total > 1 {
                let nth = species[..i]
                    .iter()
                    .filter(|s| s.atomic_number == num)
                    .count();
                species[i].label =
                    format!("{}{}", species[i].symbol(), nth + 1);
            }
        }
        (species, indices)
    }
}

/// wrap a fractional coordinate into [0, 1). the second pass catches values
/// like -1e-17 that round up to exactly 1.0 on the first
fn wrap(x: f64) -> f64 {
    x.rem_euclid(1.0).rem_euclid(1.0)
}
