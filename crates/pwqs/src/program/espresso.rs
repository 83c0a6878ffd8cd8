use std::{collections::BTreeMap, fmt::Write, path::Path, sync::OnceLock};

use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use structure::Structure;

use super::{ProgramError, Template, parse_last, read_file, write_file};


/// the line pw.x prints after a run finishes normally
const JOB_DONE: &str = "JOB DONE.";

/// keys inserted into perturbation inputs. any existing settings for them are
/// dropped so that each appears exactly once
const INSERTED_KEYS: [&str; 4] =
    ["outdir", "startingwfc", "startingpot", "diago_thr_init"];

/// The mass and pseudopotential file for one element
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pseudo {
    pub mass: f64,
    pub file: String,
}

/// A pw.x input built from a [Template] and a [Structure]
#[derive(Clone, Debug)]
pub struct Espresso {
    pub prefix: String,
    pub template: Template,
    pub structure: Structure,

    /// pseudopotentials keyed by chemical symbol
    pub pseudos: BTreeMap<String, Pseudo>,
}

static INPUT_CELL: OnceLock<[Regex; 7]> = OnceLock::new();
static OUTPUT_CELL: OnceLock<[Regex; 4]> = OnceLock::new();

impl Espresso {
    pub fn new(
        prefix: impl Into<String>,
        template: Template,
        structure: Structure,
        pseudos: BTreeMap<String, Pseudo>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            template,
            structure,
            pseudos,
        }
    }

    /// Example [Template]:
    /// ```text
    /// &control
    ///  calculation = 'scf'
    ///  prefix = '{{.prefix}}'
    ///  pseudo_dir = './'
    /// /
    /// &system
    ///  ibrav = 0
    ///  nat = {{.nat}}
    ///  ntyp = {{.ntyp}}
    ///  ecutwfc = 30
    ///  nspin = 2
    ///  lda_plus_u = .true.
    /// {{.hubbard}}
    /// /
    /// &electrons
    ///  conv_thr = 1e-8
    /// /
    /// {{.species}}
    /// {{.cell}}
    /// {{.positions}}
    /// K_POINTS automatic
    /// 4 4 4 0 0 0
    /// ```
    ///
    /// `{{.hubbard}}` becomes one `Hubbard_U(k)` and `Hubbard_alpha(k)` line
    /// for each species k, followed by a `starting_magnetization(k)` line if
    /// any atom carries a moment. The remaining directives become the
    /// ATOMIC_SPECIES, CELL_PARAMETERS, and ATOMIC_POSITIONS cards
    pub fn render(&self) -> Result<String, ProgramError> {
        let [prefix, nat, ntyp, hubbard, species, cell, positions] = INPUT_CELL
            .get_or_init(|| {
                [
                    Regex::new(r"\{\{.prefix\}\}").unwrap(),
                    Regex::new(r"\{\{.nat\}\}").unwrap(),
                    Regex::new(r"\{\{.ntyp\}\}").unwrap(),
                    Regex::new(r"\{\{.hubbard\}\}").unwrap(),
                    Regex::new(r"\{\{.species\}\}").unwrap(),
                    Regex::new(r"\{\{.cell\}\}").unwrap(),
                    Regex::new(r"\{\{.positions\}\}").unwrap(),
                ]
            });
        let kinds = self.structure.species();
        let mut body = self.template.header.clone();
        let subs = [
            (prefix, self.prefix.clone()),
            (nat, self.structure.len().to_string()),
            (ntyp, kinds.len().to_string()),
            (hubbard, self.hubbard_lines()),
            (species, self.species_card()?),
            (cell, self.cell_card()),
            (positions, self.positions_card()),
        ];
        for (re, sub) in subs {
            body = re.replace_all(&body, NoExpand(sub.trim_end())).to_string();
        }
        if !body.ends_with('\n') {
            body.push('\n');
        }
        Ok(body)
    }

    pub fn write_input(&self, path: &Path) -> Result<(), ProgramError> {
        let body = self.render()?;
        write_file(path, body)
    }

    fn hubbard_lines(&self) -> String {
        let kinds = self.structure.species();
        let mut s = String::new();
        for (k, kind) in kinds.iter().enumerate() {
            writeln!(s, " Hubbard_U({}) = {}", k + 1, kind.hubbard_u).unwrap();
        }
        for (k, kind) in kinds.iter().enumerate() {
            writeln!(s, " Hubbard_alpha({}) = {}", k + 1, kind.hubbard_alpha)
                .unwrap();
        }
        // pw.x wants starting magnetizations in [-1, 1]
        let max = kinds.iter().map(|k| k.magmom.abs()).fold(0.0, f64::max);
        if max > 0.0 {
            for (k, kind) in kinds.iter().enumerate() {
                writeln!(
                    s,
                    " starting_magnetization({}) = {}",
                    k + 1,
                    kind.magmom / max
                )
                .unwrap();
            }
        }
        s
    }

    fn species_card(&self) -> Result<String, ProgramError> {
        let mut s = String::from("ATOMIC_SPECIES\n");
        for kind in self.structure.species() {
            let sym = kind.symbol();
            let Some(Pseudo { mass, file }) = self.pseudos.get(sym) else {
                return Err(ProgramError::MissingPseudo(sym.to_owned()));
            };
            writeln!(s, "{} {mass} {file}", kind.label).unwrap();
        }
        Ok(s)
    }

    fn cell_card(&self) -> String {
        let mut s = String::from("CELL_PARAMETERS angstrom\n");
        for row in self.structure.cell.row_iter() {
            writeln!(s, "{:14.8} {:14.8} {:14.8}", row[0], row[1], row[2])
                .unwrap();
        }
        s
    }

    fn positions_card(&self) -> String {
        let kinds = self.structure.species();
        let mut s = String::from("ATOMIC_POSITIONS angstrom\n");
        for (atom, k) in self
            .structure
            .atoms
            .iter()
            .zip(self.structure.species_indices())
        {
            let p = atom.position;
            writeln!(
                s,
                "{:<4} {:14.8} {:14.8} {:14.8}",
                kinds[k].label, p.x, p.y, p.z
            )
            .unwrap();
        }
        s
    }
}

/// The occupations printed on `atom` lines of a pw.x output. `initial` holds
/// those printed after the start of the self-consistent cycle and before its
/// end, `converged` those printed after the end
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Occupations {
    pub initial: Vec<f64>,
    pub converged: Vec<f64>,
}

/// rewrite the contents of an SCF input into the input for one perturbation.
/// `species` is the 1-based index of the perturbed species and `alpha` the
/// value of its Hubbard_alpha. the calculation restarts from the SCF
/// wavefunction and potential found in `outdir`, with `ethr` as the initial
/// diagonalization threshold
pub fn perturbation_input(
    scf_input: &str,
    alpha: f64,
    species: usize,
    ethr: f64,
    outdir: &str,
) -> String {
    let target = format!("hubbard_alpha({species})");
    let mut out = String::with_capacity(scf_input.len() + 128);
    for line in scf_input.lines() {
        let key = line
            .split(|c: char| c == '=' || c.is_whitespace())
            .find(|s| !s.is_empty())
            .unwrap_or("")
            .to_lowercase();
        if INSERTED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if key == target {
            writeln!(out, " Hubbard_alpha({species}) = {alpha}").unwrap();
            continue;
        }
        writeln!(out, "{line}").unwrap();
        match key.as_str() {
            "&control" => {
                writeln!(out, " outdir = '{outdir}'").unwrap();
            }
            "&electrons" => {
                out.push_str(" startingwfc = 'file'\n");
                out.push_str(" startingpot = 'file'\n");
                writeln!(out, " diago_thr_init = {ethr:.7e}").unwrap();
            }
            _ => {}
        }
    }
    out
}

/// read the last diagonalization threshold from the pw.x output at `path`
pub fn read_ethr(path: &Path) -> Result<f64, ProgramError> {
    let contents = read_file(path)?;
    parse_ethr(&contents, &path.display().to_string())
}

/// parse the threshold from the last line starting with `     ethr` in any
/// case. `name` labels the error
pub fn parse_ethr(contents: &str, name: &str) -> Result<f64, ProgramError> {
    let [ethr, ..] = output_regexes();
    contents
        .lines()
        .rfind(|line| ethr.is_match(line))
        .and_then(|line| line.split_whitespace().nth(2))
        .and_then(|field| field.replace(',', "").parse().ok())
        .ok_or_else(|| ProgramError::EthrNotFound(name.to_owned()))
}

/// whether the pw.x output at `path` exists and reports a finished job
pub fn is_complete(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(s) => s.contains(JOB_DONE),
        Err(_) => false,
    }
}

pub fn read_occupations(path: &Path) -> Result<Occupations, ProgramError> {
    let contents = read_file(path)?;
    parse_occupations(&contents, &path.display().to_string())
}

pub fn parse_occupations(
    contents: &str,
    name: &str,
) -> Result<Occupations, ProgramError> {
    let [_, start, end, atom] = output_regexes();
    let mut ret = Occupations::default();
    let mut started = false;
    let mut finished = false;
    for line in contents.lines() {
        if start.is_match(line) {
            started = true;
        }
        if end.is_match(line) {
            finished = true;
        }
        if !atom.is_match(line) {
            continue;
        }
        if finished {
            ret.converged.push(parse_last(line, name)?);
        } else if started {
            ret.initial.push(parse_last(line, name)?);
        }
    }
    log::debug!(
        "{name}: {} initial and {} converged occupations",
        ret.initial.len(),
        ret.converged.len()
    );
    Ok(ret)
}

fn output_regexes() -> &'static [Regex; 4] {
    OUTPUT_CELL.get_or_init(|| {
        [
            Regex::new(r"(?i)^     ethr").unwrap(),
            Regex::new(r"^     Self").unwrap(),
            Regex::new(r"^     End").unwrap(),
            Regex::new(r"^atom ").unwrap(),
        ]
    })
}
