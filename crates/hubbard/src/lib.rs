//! Linear-response Hubbard U calculations with pw.x. A campaign runs one
//! self-consistent calculation per perturbed atom, a series of perturbed
//! calculations for each of those, and finally collects the occupations into
//! the input files for r.x

use std::{error::Error as StdError, fmt::Display, io::ErrorKind, path::Path};

use partition::PartitionError;
use pwqs::{program::ProgramError, queue::QueueError};
use structure::StructureError;

pub mod config;
pub mod lr;
pub mod rx;

pub use config::Config;


#[derive(Debug, PartialEq)]
pub enum Error {
    Config(config::ConfigError),
    Partition(PartitionError),
    Structure(StructureError),
    Program(ProgramError),
    Queue(QueueError),
    Io(String, ErrorKind),

    /// the SCF output in the named file is missing or unfinished
    ScfIncomplete(String),

    /// the perturbation output in the named file is missing or unfinished
    PertIncomplete(String),

    /// fewer occupations than grouped atoms in the named output
    MissingOccupations {
        file: String,
        want: usize,
        got: usize,
    },

    /// r.x exited with a failure. holds its stderr
    Rx(String),

    /// no `type:` lines in the named Umat.out
    NoUValues(String),

    /// the numbered perturbation has no representative in the structure
    NoPerturbation(usize),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "{e}"),
            Error::Partition(e) => write!(f, "{e}"),
            Error::Structure(e) => write!(f, "{e}"),
            Error::Program(e) => write!(f, "{e}"),
            Error::Queue(e) => write!(f, "{e}"),
            Error::Io(path, kind) => write!(f, "{path}: {kind}"),
            Error::ScfIncomplete(file) => {
                write!(f, "SCF calculation in {file} has not finished")
            }
            Error::PertIncomplete(file) => {
                write!(f, "perturbation in {file} has not finished")
            }
            Error::MissingOccupations { file, want, got } => write!(
                f,
                "expected at least {want} occupations in {file}, found {got}"
            ),
            Error::Rx(stderr) => write!(f, "r.x failed with `{stderr}`"),
            Error::NoUValues(file) => write!(f, "no U values found in {file}"),
            Error::NoPerturbation(n) => {
                write!(f, "perturbation {n} has no representative atom")
            }
        }
    }
}

impl StdError for Error {}

macro_rules! from_errors {
    ($($variant:ident($ty:ty)$(,)*)*) => {
        $(impl From<$ty> for Error {
            fn from(e: $ty) -> Self {
                Self::$variant(e)
            }
        })*
    }
}

from_errors!(
    Config(config::ConfigError),
    Partition(PartitionError),
    Structure(StructureError),
    Program(ProgramError),
    Queue(QueueError),
);

/// attach `path` to an IO error
pub(crate) fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> Error {
    let path = path.display().to_string();
    move |e| Error::Io(path, e.kind())
}
