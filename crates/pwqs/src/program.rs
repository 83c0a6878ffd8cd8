use std::{error::Error, fmt::Display, io::ErrorKind, path::Path};

use serde::{Deserialize, Serialize};

pub mod espresso;

#[derive(Debug, PartialEq, Eq)]
pub enum ProgramError {
    FileNotFound(String),
    ReadFileError(String, ErrorKind),
    WriteFileError(String, ErrorKind),

    /// no `ethr` line in the named SCF output
    EthrNotFound(String),

    /// an occupation line in the named output whose last field is not a
    /// number
    OccupationParseError(String, String),

    /// no mass and pseudopotential were given for the symbol
    MissingPseudo(String),
}

impl ProgramError {
    /// Returns `true` if the program error is [`FileNotFound`].
    ///
    /// [`FileNotFound`]: ProgramError::FileNotFound
    #[must_use]
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(..))
    }
}

impl Display for ProgramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgramError::FileNotFound(file) => {
                write!(f, "{file} does not exist")
            }
            ProgramError::ReadFileError(file, kind) => {
                write!(f, "failed to read {file}: {kind}")
            }
            ProgramError::WriteFileError(file, kind) => {
                write!(f, "failed to write {file}: {kind}")
            }
            ProgramError::EthrNotFound(file) => {
                write!(f, "no ethr value found in {file}")
            }
            ProgramError::OccupationParseError(file, line) => {
                write!(f, "failed to parse occupation in {file} from `{line}`")
            }
            ProgramError::MissingPseudo(sym) => {
                write!(f, "no mass or pseudopotential given for {sym}")
            }
        }
    }
}

impl Error for ProgramError {}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub header: String,
}

impl Template {
    pub fn from(s: &str) -> Self {
        Self {
            header: s.to_string(),
        }
    }
}

/// read `path` to a String, distinguishing a missing file from other read
/// failures
pub(crate) fn read_file(path: &Path) -> Result<String, ProgramError> {
    let name = path.display().to_string();
    if !path.exists() {
        return Err(ProgramError::FileNotFound(name));
    }
    std::fs::read_to_string(path)
        .map_err(|e| ProgramError::ReadFileError(name, e.kind()))
}

pub(crate) fn write_file(
    path: &Path,
    contents: impl AsRef<[u8]>,
) -> Result<(), ProgramError> {
    std::fs::write(path, contents).map_err(|e| {
        ProgramError::WriteFileError(path.display().to_string(), e.kind())
    })
}

/// parses the last field of `line` into a float and returns
/// [ProgramError::OccupationParseError] containing `outname` if it fails
#[inline]
fn parse_last(line: &str, outname: &str) -> Result<f64, ProgramError> {
    line.split_whitespace()
        .last()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| {
            ProgramError::OccupationParseError(
                outname.to_owned(),
                line.to_owned(),
            )
        })
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(ProgramError::FileNotFound("scf.out".into()),
        "scf.out does not exist"; "not found")]
    #[test_case(ProgramError::ReadFileError("scf.out".into(),
        ErrorKind::PermissionDenied),
        "failed to read scf.out: permission denied"; "read")]
    #[test_case(ProgramError::EthrNotFound("scf.out".into()),
        "no ethr value found in scf.out"; "ethr")]
    #[test_case(ProgramError::OccupationParseError("a.out".into(),
        "atom 1 x".into()),
        "failed to parse occupation in a.out from `atom 1 x`"; "occupation")]
    #[test_case(ProgramError::MissingPseudo("O".into()),
        "no mass or pseudopotential given for O"; "pseudo")]
    fn display(err: ProgramError, want: &str) {
        assert_eq!(err.to_string(), want);
    }
}
