//! Configuration settings for a linear-response campaign

use std::{
    collections::BTreeMap,
    error::Error,
    fmt::{Debug, Display},
    fs::read_to_string,
    io::ErrorKind,
    path::Path,
};

use nalgebra as na;
use partition::{Partition, PartitionError};
use pwqs::{
    program::espresso::Pseudo,
    queue::{QueueError, Resources},
};
use serde::{Deserialize, Serialize};
use structure::{Structure, StructureError};


#[derive(Debug, PartialEq)]
pub enum ConfigError {
    ReadFile(String, ErrorKind),
    Toml(String),
    Template(String, ErrorKind),
    Structure(StructureError),
    Partition(PartitionError),
    Queue(QueueError),
    NoAlphas,
    MissingPseudo(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadFile(file, kind) => {
                write!(f, "failed to read config file {file}: {kind}")
            }
            ConfigError::Toml(e) => write!(f, "{e}"),
            ConfigError::Template(file, kind) => {
                write!(f, "failed to read template file {file}: {kind}")
            }
            ConfigError::Structure(e) => write!(f, "{e}"),
            ConfigError::Partition(e) => write!(f, "{e}"),
            ConfigError::Queue(e) => write!(f, "{e}"),
            ConfigError::NoAlphas => {
                write!(f, "at least one perturbation alpha is required")
            }
            ConfigError::MissingPseudo(sym) => {
                write!(f, "no pseudopotential given for {sym}")
            }
        }
    }
}

impl Error for ConfigError {}

impl From<StructureError> for ConfigError {
    fn from(e: StructureError) -> Self {
        Self::Structure(e)
    }
}

impl From<PartitionError> for ConfigError {
    fn from(e: PartitionError) -> Self {
        Self::Partition(e)
    }
}

/// Templates can either be literal strings in the config file, or the name of a
/// file to be loaded
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug)]
#[serde(untagged)]
enum TemplateSrc {
    Literal(String),
    File { file: String },
}

impl TryFrom<TemplateSrc> for String {
    type Error = ConfigError;

    fn try_from(value: TemplateSrc) -> Result<Self, Self::Error> {
        match value {
            TemplateSrc::Literal(s) => Ok(s),
            TemplateSrc::File { file } => read_to_string(&file)
                .map_err(|e| ConfigError::Template(file, e.kind())),
        }
    }
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    /// The base name of the campaign. Perturbation i runs in the directory
    /// `<name>-<i>-pert`.
    name: String,

    /// The pw.x prefix, spliced into the template with the {{.prefix}}
    /// directive and used to find the SCF wavefunction files that each
    /// perturbation restarts from. Defaults to "pwscf".
    prefix: Option<String>,

    /// The base of the job names shown in the queue. Defaults to `name`.
    jobname: Option<String>,

    /// The template pw.x input. Supported directives are {{.prefix}},
    /// {{.nat}}, {{.ntyp}}, {{.hubbard}}, {{.species}}, {{.cell}}, and
    /// {{.positions}}.
    template: TemplateSrc,

    /// The template for the queue submission scripts. The job name replaces
    /// the {{.jobname}} directive.
    queue_template: Option<TemplateSrc>,

    /// The queuing system: "pbs", "slurm", or "local".
    queue: Queue,

    /// Seconds to wait before retrying a failed submission.
    sleep_int: Option<usize>,

    /// The lattice vectors in Å, one per row.
    cell: [[f64; 3]; 3],

    /// One atom per line as `symbol x y z [magmom]`, in Cartesian Å.
    atoms: String,

    /// Per-atom Hubbard U values. Defaults to a negligible but nonzero U on
    /// every atom.
    hubbard_u: Option<Vec<f64>>,

    /// Per-atom Hubbard alpha values. Defaults to zero.
    hubbard_alpha: Option<Vec<f64>>,

    /// Mass and pseudopotential file for each element.
    pseudos: BTreeMap<String, Pseudo>,

    /// The perturbed atoms, each mapped to the list of atoms equivalent to
    /// it, including itself. Indices are 0-based.
    partition: BTreeMap<String, Vec<usize>>,

    /// The perturbation strengths in eV. Defaults to
    /// [-0.15, -0.07, 0.0, 0.07, 0.15].
    alphas: Option<Vec<f64>>,

    /// The supercell size passed to r.x. Defaults to 1.
    sc: Option<usize>,

    /// Whether to translate each perturbed atom to the origin. Defaults to
    /// true.
    center: Option<bool>,

    /// The moment sign written for atoms without an initial moment, "zero"
    /// or "up". Defaults to "zero".
    zero_moment: Option<ZeroMoment>,

    /// Run the perturbations of each atom one after another in a single job
    /// ("series") or as one job per alpha ("parallel"). Defaults to
    /// "series".
    perturbation: Option<Mode>,

    /// The r.x executable. Defaults to "r.x".
    rx: Option<String>,

    resources: Option<Resources>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Queue {
    #[serde(alias = "pbs")]
    Pbs,
    #[serde(alias = "slurm")]
    Slurm,
    #[serde(alias = "local")]
    Local,
}

impl Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Queue::Pbs => "pbs",
                Queue::Slurm => "slurm",
                Queue::Local => "local",
            }
        )
    }
}

/// The sign recorded in r.x's `pos` file for an atom with no initial moment
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ZeroMoment {
    #[default]
    Zero,
    Up,
}

impl ZeroMoment {
    pub fn sign(self) -> i8 {
        match self {
            ZeroMoment::Zero => 0,
            ZeroMoment::Up => 1,
        }
    }
}

impl Display for ZeroMoment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZeroMoment::Zero => write!(f, "zero"),
            ZeroMoment::Up => write!(f, "up"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Series,
    Parallel,
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Series => write!(f, "series"),
            Mode::Parallel => write!(f, "parallel"),
        }
    }
}

pub const DEFAULT_ALPHAS: [f64; 5] = [-0.15, -0.07, 0.0, 0.07, 0.15];

/// Construct a full `Config` using [Config::load] on a TOML file
#[derive(Clone, Deserialize, PartialEq, Debug)]
#[serde(try_from = "RawConfig")]
pub struct Config {
    pub name: String,
    pub prefix: String,
    pub jobname: String,

    /// the template for the pw.x input
    pub template: String,

    /// the optional template to use for the queuing system. If this is not
    /// provided, the queue's implementation of
    /// [pwqs::queue::Queue::default_submit_script] will be used
    pub queue_template: Option<String>,

    pub queue: Queue,
    pub sleep_int: usize,

    /// the structure in its original order, carrying the per-atom Hubbard
    /// parameters
    pub structure: Structure,

    pub pseudos: BTreeMap<String, Pseudo>,
    pub partition: Partition,
    pub alphas: Vec<f64>,
    pub sc: usize,
    pub center: bool,
    pub zero_moment: ZeroMoment,
    pub perturbation: Mode,
    pub rx: String,
    pub resources: Resources,
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(rc: RawConfig) -> Result<Self, Self::Error> {
        let cell = na::Matrix3::from_fn(|i, j| rc.cell[i][j]);
        let atoms = Structure::parse_atoms(&rc.atoms)?;
        let mut structure = Structure::new(cell, atoms);
        if let Some(us) = &rc.hubbard_u {
            structure.set_hubbard_u(us)?;
        }
        if let Some(alphas) = &rc.hubbard_alpha {
            structure.set_hubbard_alpha(alphas)?;
        }
        let ret = Self {
            jobname: rc.jobname.unwrap_or_else(|| rc.name.clone()),
            name: rc.name,
            prefix: rc.prefix.unwrap_or_else(|| "pwscf".to_owned()),
            template: rc.template.try_into()?,
            queue_template: rc
                .queue_template
                .map(String::try_from)
                .transpose()?,
            queue: rc.queue,
            sleep_int: rc.sleep_int.unwrap_or(1),
            structure,
            pseudos: rc.pseudos,
            partition: Partition::try_from(rc.partition)?,
            alphas: rc.alphas.unwrap_or_else(|| DEFAULT_ALPHAS.to_vec()),
            sc: rc.sc.unwrap_or(1),
            center: rc.center.unwrap_or(true),
            zero_moment: rc.zero_moment.unwrap_or_default(),
            perturbation: rc.perturbation.unwrap_or_default(),
            rx: rc.rx.unwrap_or_else(|| "r.x".to_owned()),
            resources: rc.resources.unwrap_or_default(),
        };
        ret.validate()?;
        Ok(ret)
    }
}

impl Config {
    /// load a [Config] from the TOML file specified by `filename`
    pub fn load<P>(filename: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path> + Debug,
    {
        let name = filename.as_ref().display().to_string();
        let contents = std::fs::read_to_string(&filename)
            .map_err(|e| ConfigError::ReadFile(name.clone(), e.kind()))?;
        Self::from_toml(&contents)
            .inspect_err(|e| log::error!("failed to load {name}: {e}"))
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(s).map_err(|e| ConfigError::Toml(e.to_string()))?;
        raw.try_into()
    }

    /// check that the settings in `self` make sense together: the partition
    /// fits the structure, every element has a pseudopotential, and the
    /// memory request can be converted for SLURM
    fn validate(&self) -> Result<(), ConfigError> {
        self.partition.reindex(self.structure.len())?;
        if self.alphas.is_empty() {
            return Err(ConfigError::NoAlphas);
        }
        for atom in &self.structure.atoms {
            if !self.pseudos.contains_key(atom.label()) {
                return Err(ConfigError::MissingPseudo(atom.label().to_owned()));
            }
        }
        if self.queue == Queue::Slurm {
            self.resources.mem_gb().map_err(ConfigError::Queue)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Config {
            name,
            prefix,
            jobname,
            template,
            queue_template,
            queue,
            sleep_int,
            structure,
            pseudos,
            partition,
            alphas,
            sc,
            center,
            zero_moment,
            perturbation,
            rx,
            resources,
        } = self;
        write!(
            f,
            "
Configuration Options:
name = {name}
prefix = {prefix}
jobname = {jobname}
template = {template}
queue_template = {}
queue = {queue}
sleep_int = {sleep_int}
natoms = {}
alphas = {alphas:?}
sc = {sc}
center = {center}
zero_moment = {zero_moment}
perturbation = {perturbation}
rx = {rx}
walltime = {}
nodes = {}
ppn = {}
",
            queue_template.as_ref().unwrap_or(&String::new()),
            structure.len(),
            resources.walltime,
            resources.nodes,
            resources.ppn,
        )?;
        writeln!(f, "atoms = {{")?;
        for atom in &structure.atoms {
            writeln!(f, "{atom}")?;
        }
        writeln!(f, "}}")?;
        for (sym, Pseudo { mass, file }) in pseudos {
            writeln!(f, "pseudo {sym} = {mass} {file}")?;
        }
        for (key, members) in partition.groups() {
            writeln!(f, "partition {key} = {members:?}")?;
        }
        Ok(())
    }
}
