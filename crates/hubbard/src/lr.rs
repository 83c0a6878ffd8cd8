//! The linear-response campaign. Each step is idempotent: finished
//! calculations and jobs still in the queue are skipped, so a step can be
//! rerun until everything it depends on has completed

use std::{
    fmt::Display,
    fs::{File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use partition::{Perturbation, Reindex};
use pwqs::{
    program::{
        Template,
        espresso::{
            Espresso, is_complete, perturbation_input, read_ethr,
            read_occupations,
        },
    },
    queue::Queue,
};
use serde::Serialize;
use structure::Structure;

use crate::{
    Error,
    config::{Config, Mode},
    io_err,
    rx::{self, RxInput, TypeU},
};

/// the directory holding the r.x files, relative to the campaign root
pub const UCALC: &str = "Ucalc";

/// What happened to one perturbation directory in a submitting step
#[derive(Clone, Debug, PartialEq)]
pub enum Status {
    /// every output already reports a finished job
    Complete,

    /// a job recorded in `jobid` is still in the queue
    Queued,

    /// the inputs were written but not submitted
    Written,

    /// submitted with these job ids
    Submitted(Vec<String>),
}

/// The result of [Campaign::solve], written to `Ucalc/u.json`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Solution {
    pub types: Vec<TypeU>,
}

impl Display for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:>5}{:>16}{:>12}", "type", "representative", "U (eV)")?;
        for t in &self.types {
            let rep = t.representative.map(|r| r.to_string());
            writeln!(
                f,
                "{:>5}{:>16}{:>12.4}",
                t.kind,
                rep.as_deref().unwrap_or("-"),
                t.u
            )?;
        }
        Ok(())
    }
}

/// The canonical order and the perturbations it implies, as reported by the
/// `order` step
#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub order: Vec<usize>,
    pub grouped: usize,
    pub perturbations: Vec<Perturbation>,
    pub tags: Vec<Vec<usize>>,
    pub dirs: Vec<String>,
}

impl Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |v: &[usize]| {
            v.iter().map(usize::to_string).collect::<Vec<_>>().join(" ")
        };
        writeln!(f, "canonical order: {}", join(&self.order))?;
        writeln!(f, "grouped atoms: {}", self.grouped)?;
        writeln!(
            f,
            "{:>5}{:>16}{:>10}  directory",
            "pert", "representative", "position"
        )?;
        for (p, dir) in self.perturbations.iter().zip(&self.dirs) {
            writeln!(
                f,
                "{:>5}{:>16}{:>10}  {dir}",
                p.number, p.representative, p.position
            )?;
        }
        writeln!(f, "tags:")?;
        for (p, tags) in self.perturbations.iter().zip(&self.tags) {
            writeln!(f, "{:>5}: {}", p.number, join(tags))?;
        }
        Ok(())
    }
}

/// A linear-response campaign rooted at `root`, submitting through `queue`
pub struct Campaign<'a, Q: Queue> {
    config: &'a Config,
    queue: &'a Q,
    root: PathBuf,
    dry_run: bool,
}

impl<'a, Q: Queue> Campaign<'a, Q> {
    pub fn new(
        config: &'a Config,
        queue: &'a Q,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            queue,
            root: root.into(),
            dry_run: false,
        }
    }

    /// write inputs and scripts without submitting anything
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn reindex(&self) -> Result<Reindex, Error> {
        Ok(self.config.partition.reindex(self.config.structure.len())?)
    }

    /// the structure in canonical order, before tagging or centering
    fn ordered(&self, reindex: &Reindex) -> Result<Structure, Error> {
        Ok(self.config.structure.reorder(reindex.order())?)
    }

    /// the structure run for `pert`: tagged on its representative and, if
    /// requested, centered on it
    pub(crate) fn perturbed(
        &self,
        reindex: &Reindex,
        ordered: &Structure,
        pert: &Perturbation,
    ) -> Result<Structure, Error> {
        let mut s = ordered.clone();
        let tags = pert
            .number
            .checked_sub(1)
            .and_then(|nth| reindex.tags(nth))
            .ok_or(Error::NoPerturbation(pert.number))?;
        s.set_tags(&tags)?;
        if self.config.center {
            s.center_on(pert.position)?;
        }
        Ok(s)
    }

    fn basename(&self, pert: &Perturbation) -> String {
        format!("{}-{}-pert", self.config.name, pert.number)
    }

    pub fn pert_dir(&self, pert: &Perturbation) -> PathBuf {
        self.root.join(self.basename(pert))
    }

    fn scf_output(&self, pert: &Perturbation) -> PathBuf {
        self.pert_dir(pert).join(format!("{}.out", self.basename(pert)))
    }

    fn alpha_output(&self, pert: &Perturbation, alpha: f64) -> PathBuf {
        self.pert_dir(pert)
            .join("results")
            .join(format!("alpha_{alpha}.out"))
    }

    /// whether any job id recorded in `dir/jobid` is still in the queue
    fn queued(&self, dir: &Path) -> Result<bool, Error> {
        let Ok(contents) = std::fs::read_to_string(dir.join("jobid")) else {
            return Ok(false);
        };
        for line in contents.lines() {
            let Some(id) = line.split_whitespace().last() else {
                continue;
            };
            if self.queue.is_queued(id)? {
                log::info!("job {id} from {} is still queued", dir.display());
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// write `scripts` to the queue one at a time and record their ids in
    /// `dir/jobid`. nothing is submitted in a dry run
    fn submit(&self, dir: &Path, scripts: &[PathBuf]) -> Result<Status, Error> {
        if self.dry_run {
            for script in scripts {
                log::info!("not submitting {} in dry run", script.display());
            }
            return Ok(Status::Written);
        }
        let mut ids = Vec::with_capacity(scripts.len());
        for script in scripts {
            let id = self.queue.submit(script)?;
            log::info!("submitted {} as {id}", script.display());
            ids.push(id);
        }
        let jobid = dir.join("jobid");
        let mut contents = ids.join("\n");
        contents.push('\n');
        std::fs::write(&jobid, contents).map_err(io_err(&jobid))?;
        Ok(Status::Submitted(ids))
    }

    /// the canonical order, perturbation table, and tags
    pub fn order(&self) -> Result<Order, Error> {
        let reindex = self.reindex()?;
        let perturbations: Vec<_> = reindex.perturbations().collect();
        let tags = (0..perturbations.len())
            .filter_map(|i| reindex.tags(i))
            .collect();
        let dirs = perturbations.iter().map(|p| self.basename(p)).collect();
        Ok(Order {
            order: reindex.order().to_vec(),
            grouped: reindex.grouped(),
            perturbations,
            tags,
            dirs,
        })
    }

    /// write and submit the self-consistent calculation for every
    /// perturbation
    pub fn run_scf(&self) -> Result<Vec<Status>, Error> {
        let reindex = self.reindex()?;
        let ordered = self.ordered(&reindex)?;
        let mut ret = Vec::with_capacity(reindex.perturbations().len());
        for pert in reindex.perturbations() {
            let structure = self.perturbed(&reindex, &ordered, &pert)?;
            let dir = self.pert_dir(&pert);
            std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
            let base = self.basename(&pert);
            if is_complete(&self.scf_output(&pert)) {
                log::info!("SCF in {} is complete", dir.display());
                ret.push(Status::Complete);
                continue;
            }
            if self.queued(&dir)? {
                ret.push(Status::Queued);
                continue;
            }
            let input = dir.join(format!("{base}.in"));
            Espresso::new(
                self.config.prefix.clone(),
                Template::from(self.config.template.as_str()),
                structure,
                self.config.pseudos.clone(),
            )
            .write_input(&input)?;
            log::debug!("wrote {}", input.display());
            let script = dir.join(format!("{base}.{}", Q::SCRIPT_EXT));
            self.queue.write_submit_script(
                &format!("{}-{}-scf", self.config.jobname, pert.number),
                [self.queue.program_cmd(
                    &format!("{base}.in"),
                    &format!("{base}.out"),
                    true,
                )],
                &script,
            )?;
            ret.push(self.submit(&dir, &[script])?);
        }
        Ok(ret)
    }

    /// write and submit the perturbed calculations for every perturbation.
    /// each SCF calculation must be complete
    pub fn run_perts(&self) -> Result<Vec<Status>, Error> {
        let reindex = self.reindex()?;
        let ordered = self.ordered(&reindex)?;
        let prefix = &self.config.prefix;
        let mut ret = Vec::with_capacity(reindex.perturbations().len());
        for pert in reindex.perturbations() {
            let dir = self.pert_dir(&pert);
            let scf_out = self.scf_output(&pert);
            if !is_complete(&scf_out) {
                return Err(Error::ScfIncomplete(scf_out.display().to_string()));
            }
            if self.queued(&dir)? {
                ret.push(Status::Queued);
                continue;
            }
            let ethr = read_ethr(&scf_out)?;
            let results = dir.join("results");
            std::fs::create_dir_all(&results).map_err(io_err(&results))?;

            let alphas: Vec<f64> = self
                .config
                .alphas
                .iter()
                .copied()
                .filter(|&a| !is_complete(&self.alpha_output(&pert, a)))
                .collect();
            if alphas.is_empty() {
                log::info!("perturbations in {} are complete", dir.display());
                ret.push(Status::Complete);
                continue;
            }

            let structure = self.perturbed(&reindex, &ordered, &pert)?;
            let species = perturbed_species(&structure, &pert)?;
            let scf_in = dir.join(format!("{}.in", self.basename(&pert)));
            let scf_input =
                std::fs::read_to_string(&scf_in).map_err(io_err(&scf_in))?;

            let mut scripts = Vec::new();
            let mut series = Vec::new();
            for &alpha in &alphas {
                let name = format!("alpha_{alpha}");
                let outdir = dir.join(&name);
                remove_stale(&outdir, prefix)?;
                let input = perturbation_input(
                    &scf_input,
                    alpha,
                    species,
                    ethr,
                    &format!("{name}/"),
                );
                let infile = match self.config.perturbation {
                    Mode::Series => format!("{name}/{name}.in"),
                    Mode::Parallel => format!("{name}.in"),
                };
                std::fs::create_dir_all(&outdir).map_err(io_err(&outdir))?;
                let path = dir.join(&infile);
                std::fs::write(&path, input).map_err(io_err(&path))?;
                log::debug!("wrote {}", path.display());

                let body = [
                    format!("cp -r {prefix}.* {name}/"),
                    self.queue.program_cmd(
                        &infile,
                        &format!("results/{name}.out"),
                        false,
                    ),
                    format!("rm -fr {name}/{prefix}.*"),
                ];
                match self.config.perturbation {
                    Mode::Series => series.extend(body),
                    Mode::Parallel => {
                        let script =
                            dir.join(format!("{name}.{}", Q::SCRIPT_EXT));
                        self.queue.write_submit_script(
                            &format!(
                                "{}-{}-pert_{alpha}",
                                self.config.jobname, pert.number
                            ),
                            body,
                            &script,
                        )?;
                        scripts.push(script);
                    }
                }
            }
            if self.config.perturbation == Mode::Series {
                let script = dir.join(format!("pert.{}", Q::SCRIPT_EXT));
                self.queue.write_submit_script(
                    &format!("{}-{}-pert", self.config.jobname, pert.number),
                    series,
                    &script,
                )?;
                scripts.push(script);
            }
            ret.push(self.submit(&dir, &scripts)?);
        }
        Ok(ret)
    }

    /// collect the occupations from every perturbation into the r.x inputs
    /// under `Ucalc/`
    pub fn calc_us(&self) -> Result<(), Error> {
        let reindex = self.reindex()?;
        let ordered = self.ordered(&reindex)?;
        let grouped = reindex.grouped();
        let alphas = &self.config.alphas;
        let ucalc = self.root.join(UCALC);
        std::fs::create_dir_all(&ucalc).map_err(io_err(&ucalc))?;

        let dnda_path = ucalc.join("dnda");
        let mut dnda = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&dnda_path)
            .map_err(io_err(&dnda_path))?;

        for pert in reindex.perturbations() {
            let mut initial = Vec::with_capacity(alphas.len());
            let mut converged = Vec::with_capacity(alphas.len());
            for &alpha in alphas {
                let out = self.alpha_output(&pert, alpha);
                let name = out.display().to_string();
                if !is_complete(&out) {
                    return Err(Error::PertIncomplete(name));
                }
                let occ = read_occupations(&out)?;
                let got = occ.initial.len().min(occ.converged.len());
                if got < grouped {
                    return Err(Error::MissingOccupations {
                        file: name,
                        want: grouped,
                        got,
                    });
                }
                initial.push(occ.initial);
                converged.push(occ.converged);
            }
            for j in 0..grouped {
                let (dn, dn0) = rx::dn_names(j + 1, pert.position + 1);
                let occ0: Vec<f64> = initial.iter().map(|o| o[j]).collect();
                let occ: Vec<f64> = converged.iter().map(|o| o[j]).collect();
                for (file, occs) in [(&dn0, occ0), (&dn, occ)] {
                    let path = ucalc.join(file);
                    std::fs::write(&path, rx::dn_contents(alphas, &occs))
                        .map_err(io_err(&path))?;
                }
                writeln!(dnda, "{dn} {dn0}").map_err(io_err(&dnda_path))?;
            }
        }

        let zero = self.config.zero_moment.sign();
        let sites: Vec<_> = ordered
            .scaled_positions()?
            .into_iter()
            .zip(&ordered.atoms)
            .take(grouped)
            .map(|(p, atom)| (p, atom.moment_sign(zero)))
            .collect();
        let pos = ucalc.join("pos");
        std::fs::write(&pos, rx::pos_contents(&ordered.cell, &sites))
            .map_err(io_err(&pos))?;

        let input = RxInput {
            group_sizes: self
                .config
                .partition
                .groups()
                .map(|(_, members)| members.len())
                .collect(),
            nalfa: alphas.len(),
            sc: self.config.sc,
        };
        let rx_in = ucalc.join("rx.in");
        std::fs::write(&rx_in, input.to_string()).map_err(io_err(&rx_in))?;
        log::info!("wrote r.x inputs to {}", ucalc.display());
        Ok(())
    }

    /// run r.x on the files written by [Campaign::calc_us] and collect the
    /// U values into `Ucalc/u.json`
    pub fn solve(&self) -> Result<Solution, Error> {
        let reindex = self.reindex()?;
        let ucalc = self.root.join(UCALC);
        rx::run(&ucalc, &self.config.rx)?;
        let us = rx::read_umat(&ucalc.join("Umat.out"))?;
        let reps: Vec<usize> =
            reindex.perturbations().map(|p| p.representative).collect();
        if us.len() > reps.len() {
            log::warn!(
                "r.x reported {} types for {} perturbations",
                us.len(),
                reps.len()
            );
        }
        let types = us
            .into_iter()
            .enumerate()
            .map(|(i, u)| TypeU {
                kind: i + 1,
                representative: reps.get(i).copied(),
                u,
            })
            .collect();
        let solution = Solution { types };
        let path = ucalc.join("u.json");
        let mut f = File::create(&path).map_err(io_err(&path))?;
        let json = serde_json::to_string_pretty(&solution).map_err(|_| {
            Error::Io(path.display().to_string(), ErrorKind::InvalidData)
        })?;
        writeln!(f, "{json}").map_err(io_err(&path))?;
        Ok(solution)
    }
}

/// the 1-based pw.x species of the tagged representative of `pert` in
/// `structure`
pub(crate) fn perturbed_species(
    structure: &Structure,
    pert: &Perturbation,
) -> Result<usize, Error> {
    structure
        .species_index(pert.position)
        .map(|k| k + 1)
        .ok_or(Error::NoPerturbation(pert.number))
}

/// delete files and directories in `dir` starting with `<prefix>.`, left over
/// from an earlier attempt
fn remove_stale(dir: &Path, prefix: &str) -> Result<(), Error> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Ok(());
    };
    let stem = format!("{prefix}.");
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(&stem) {
            continue;
        }
        let path = entry.path();
        log::debug!("removing stale {}", path.display());
        let res = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        res.map_err(io_err(&path))?;
    }
    Ok(())
}
