//! Files exchanged with r.x, the post-processing program that turns the
//! occupation responses into U values

use std::{
    fmt::{Display, Write},
    fs::File,
    path::Path,
    process::{Command, Stdio},
};

use serde::Serialize;
use structure::{Mat3, Vec3};

use crate::{Error, io_err};

/// the `&input_mat` namelist read by r.x
#[derive(Clone, Debug, PartialEq)]
pub struct RxInput {
    /// the number of atoms in each group, in ascending representative order
    pub group_sizes: Vec<usize>,

    /// the number of perturbation strengths
    pub nalfa: usize,

    /// supercell size along each lattice vector
    pub sc: usize,
}

impl Display for RxInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "&input_mat")?;
        writeln!(f, "  ntyp = {}", self.group_sizes.len())?;
        for (i, na) in self.group_sizes.iter().enumerate() {
            writeln!(f, "  na({}) = {na}", i + 1)?;
        }
        writeln!(f, "  nalfa = {}", self.nalfa)?;
        writeln!(f, "  magn = .True.")?;
        writeln!(f, "  filepos = 'pos'")?;
        writeln!(f, "  back = 'no'")?;
        writeln!(f, "  filednda = 'dnda'")?;
        for n in 1..=3 {
            writeln!(f, "  n{n} = {}", self.sc)?;
        }
        writeln!(f, "&end")
    }
}

/// the names of the converged and initial response files for the 1-based
/// atom `atom` and perturbation `pert`
pub fn dn_names(atom: usize, pert: usize) -> (String, String) {
    (
        format!("dn.{atom}.da.{pert}.dat"),
        format!("dn0.{atom}.da.{pert}.dat"),
    )
}

/// one ` <alpha>  <occupation>` line per perturbation strength
pub fn dn_contents(alphas: &[f64], occupations: &[f64]) -> String {
    let mut s = String::new();
    for (a, o) in alphas.iter().zip(occupations) {
        writeln!(s, " {a}  {o}").unwrap();
    }
    s
}

/// the lattice vectors followed by the fractional position and moment sign of
/// each site
pub fn pos_contents(cell: &Mat3, sites: &[(Vec3, i8)]) -> String {
    let mut s = String::new();
    for row in cell.row_iter() {
        writeln!(s, "{} {} {}", row[0], row[1], row[2]).unwrap();
    }
    for (p, m) in sites {
        writeln!(s, "{:1.5} {:1.5} {:1.5} {m}", p.x, p.y, p.z).unwrap();
    }
    s
}

/// U for one r.x type
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TypeU {
    /// 1-based r.x type, equal to the perturbation number
    #[serde(rename = "type")]
    pub kind: usize,

    /// the original index of the representative perturbed for this type, if
    /// r.x reported no more types than there are perturbations
    pub representative: Option<usize>,

    /// U in eV
    pub u: f64,
}

/// the U values from the `  type:` lines of r.x's Umat.out
pub fn parse_umat(contents: &str) -> Vec<f64> {
    contents
        .lines()
        .filter(|line| line.starts_with("  type:"))
        .filter_map(|line| line.split_whitespace().last()?.parse().ok())
        .collect()
}

pub fn read_umat(path: &Path) -> Result<Vec<f64>, Error> {
    let contents = std::fs::read_to_string(path).map_err(io_err(path))?;
    let us = parse_umat(&contents);
    if us.is_empty() {
        return Err(Error::NoUValues(path.display().to_string()));
    }
    Ok(us)
}

/// run `exe < rx.in` in `dir`, saving its standard output to `rx.out`, and
/// wait for it to finish
pub fn run(dir: &Path, exe: &str) -> Result<(), Error> {
    let input = dir.join("rx.in");
    let stdin = File::open(&input).map_err(io_err(&input))?;
    log::info!("running {exe} in {}", dir.display());
    let out = Command::new(exe)
        .current_dir(dir)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::Io(exe.to_owned(), e.kind()))?;
    let log_file = dir.join("rx.out");
    std::fs::write(&log_file, &out.stdout).map_err(io_err(&log_file))?;
    if !out.status.success() {
        return Err(Error::Rx(
            String::from_utf8_lossy(&out.stderr).trim().to_owned(),
        ));
    }
    Ok(())
}
