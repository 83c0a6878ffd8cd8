use std::{
    fmt::Display,
    ops::{Add, AddAssign},
    str::FromStr,
};

use approx::AbsDiffEq;

use crate::{StructureError, Vec3};

/// A single atom together with every per-atom parameter that has to follow it
/// when the structure is reordered
#[derive(Debug, Clone, Copy)]
pub struct Atom {
    pub atomic_number: usize,

    /// Cartesian position in Å
    pub position: Vec3,

    /// initial magnetic moment, written as the starting magnetization of the
    /// atom's species
    pub magmom: f64,

    pub hubbard_u: f64,

    pub hubbard_alpha: f64,

    /// perturbation tag. nonzero only on the representative being perturbed
    pub tag: usize,
}

/// Hubbard U given to atoms that don't specify one. pw.x only prints
/// occupations for atoms with a nonzero U, so this is small but not zero
pub const DEFAULT_HUBBARD_U: f64 = 1e-8;

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.abs_diff_eq(other, Self::default_epsilon())
    }
}

impl AbsDiffEq for Atom {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        1e-8
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() < epsilon;
        self.atomic_number == other.atomic_number
            && self.tag == other.tag
            && self.position.abs_diff_eq(&other.position, epsilon)
            && close(self.magmom, other.magmom)
            && close(self.hubbard_u, other.hubbard_u)
            && close(self.hubbard_alpha, other.hubbard_alpha)
    }
}

impl Add<Vec3> for Atom {
    type Output = Atom;

    fn add(self, rhs: Vec3) -> Self::Output {
        Atom {
            position: self.position + rhs,
            ..self
        }
    }
}

impl AddAssign<Vec3> for Atom {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:2} {:15.10} {:15.10} {:15.10}",
            self.label(),
            self.position.x,
            self.position.y,
            self.position.z
        )
    }
}

impl FromStr for Atom {
    type Err = StructureError;

    /// parse an Atom from a line like
    ///  Fe 1.0 1.0 1.0 4.0
    /// where the trailing magnetic moment is optional
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<_> = s.split_whitespace().collect();
        if !(4..=5).contains(&fields.len()) {
            return Err(StructureError::ParseAtom(s.to_owned()));
        }
        let mut nums = Vec::with_capacity(4);
        for f in &fields[1..] {
            nums.push(
                f.parse::<f64>()
                    .map_err(|_| StructureError::ParseAtom(s.to_owned()))?,
            );
        }
        let mut atom =
            Self::new_from_label(fields[0], nums[0], nums[1], nums[2])?;
        if let Some(&m) = nums.get(3) {
            atom.magmom = m;
        }
        Ok(atom)
    }
}

pub const NUMBER_TO_SYMBOL: [&str; 87] = [
    "X", "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg",
    "Al", "Si", "P", "S", "Cl", "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn",
    "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As", "Se", "Br", "Kr", "Rb",
    "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm",
    "Sm", "Eu", "Gd", "Tb", "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta",
    "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl", "Pb", "Bi", "Po", "At",
    "Rn",
];

fn symbol_to_number(s: &str) -> Option<usize> {
    NUMBER_TO_SYMBOL.iter().skip(1).position(|&x| x == s).map(|i| i + 1)
}

fn titlecase(s: &str) -> String {
    let mut cs = s.chars();
    let Some(first) = cs.next() else {
        return String::new();
    };
    let mut ret = first.to_uppercase().to_string();
    for c in cs {
        ret.push_str(&c.to_lowercase().to_string());
    }
    ret
}

impl Atom {
    pub fn new(atomic_number: usize, x: f64, y: f64, z: f64) -> Self {
        Self {
            atomic_number,
            position: Vec3::new(x, y, z),
            magmom: 0.0,
            hubbard_u: DEFAULT_HUBBARD_U,
            hubbard_alpha: 0.0,
            tag: 0,
        }
    }

    pub fn new_from_label(
        atomic_symbol: &str,
        x: f64,
        y: f64,
        z: f64,
    ) -> Result<Self, StructureError> {
        let num = symbol_to_number(atomic_symbol)
            .or_else(|| symbol_to_number(&titlecase(atomic_symbol)))
            .ok_or_else(|| {
                StructureError::UnknownSymbol(atomic_symbol.to_owned())
            })?;
        Ok(Self::new(num, x, y, z))
    }

    pub fn with_magmom(mut self, magmom: f64) -> Self {
        self.magmom = magmom;
        self
    }

    #[inline]
    pub fn label(&self) -> &'static str {
        NUMBER_TO_SYMBOL[self.atomic_number]
    }

    /// the sign of the initial magnetic moment: 1 for positive, -1 for
    /// negative, and `zero` for an exactly zero moment
    pub fn moment_sign(&self, zero: i8) -> i8 {
        if self.magmom > 0.0 {
            1
        } else if self.magmom < 0.0 {
            -1
        } else {
            zero
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titlecase() {
        assert_eq!(super::titlecase("FE"), "Fe");
        assert_eq!(super::titlecase("Fe"), "Fe");
        assert_eq!(super::titlecase("fe"), "Fe");
        assert_eq!(super::titlecase("O"), "O");
        assert_eq!(super::titlecase("o"), "O");
        assert_eq!(super::titlecase(""), "");
    }

    #[test]
    fn parse() {
        let got: Atom = " fe 0.5 -1.0 2.25 -4".parse().unwrap();
        assert_eq!(got.label(), "Fe");
        assert_eq!(got.position, Vec3::new(0.5, -1.0, 2.25));
        assert_eq!(got.magmom, -4.0);
        assert_eq!(got.hubbard_u, DEFAULT_HUBBARD_U);

        let got: Atom = "O 0 0 1".parse().unwrap();
        assert_eq!(got.magmom, 0.0);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(
            "Fe 0.0 0.0".parse::<Atom>(),
            Err(StructureError::ParseAtom("Fe 0.0 0.0".to_owned()))
        );
        assert_eq!(
            "Fe 0.0 x 0.0".parse::<Atom>(),
            Err(StructureError::ParseAtom("Fe 0.0 x 0.0".to_owned()))
        );
        assert_eq!(
            "Qq 0.0 0.0 0.0".parse::<Atom>(),
            Err(StructureError::UnknownSymbol("Qq".to_owned()))
        );
        assert!("X 0.0 0.0 0.0".parse::<Atom>().is_err());
    }

    #[test]
    fn moment_sign() {
        let atom = Atom::new(26, 0.0, 0.0, 0.0);
        assert_eq!(atom.moment_sign(0), 0);
        assert_eq!(atom.moment_sign(1), 1);
        assert_eq!(atom.with_magmom(3.0).moment_sign(0), 1);
        assert_eq!(atom.with_magmom(-0.5).moment_sign(1), -1);
    }
}
