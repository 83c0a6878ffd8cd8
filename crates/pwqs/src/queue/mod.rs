use std::{
    collections::HashSet,
    error::Error,
    fmt::Display,
    io::ErrorKind,
    path::Path,
    process::Command,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::NO_RETRY;

pub mod local;
pub mod pbs;
pub mod slurm;

/// The resources requested for every submission, along with the commands
/// used to launch pw.x inside the submitted script
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Resources {
    /// wall time limit in the scheduler's format, like `50:00:00`
    pub walltime: String,

    pub nodes: usize,

    /// processors per node
    pub ppn: usize,

    /// a processor type (PBS) or node list (SLURM) to restrict the job to
    pub processor: Option<String>,

    /// memory like `2GB`. PBS takes this verbatim; SLURM converts it to
    /// megabytes per CPU
    pub mem: Option<String>,

    /// the queue (PBS) or partition (SLURM) to submit to
    pub queue: Option<String>,

    /// value of pw.x's `-npool` flag for parallel runs
    pub pools: usize,

    pub executable: String,

    /// MPI launcher used when more than one process is requested
    pub mpicmd: String,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            walltime: "50:00:00".to_owned(),
            nodes: 1,
            ppn: 1,
            processor: None,
            mem: None,
            queue: None,
            pools: 1,
            executable: "pw.x".to_owned(),
            mpicmd: "mpirun".to_owned(),
        }
    }
}

impl Resources {
    /// the total number of processes
    pub fn np(&self) -> usize {
        self.nodes * self.ppn
    }

    /// parse `mem` as an integer number of gigabytes, accepting an optional
    /// case-insensitive `GB` suffix
    pub fn mem_gb(&self) -> Result<Option<usize>, QueueError> {
        let Some(mem) = &self.mem else {
            return Ok(None);
        };
        let lower = mem.to_lowercase();
        let num = lower.split("gb").next().unwrap_or("").trim();
        num.parse()
            .map(Some)
            .map_err(|_| QueueError::BadMemory(mem.clone()))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum QueueError {
    /// failed to run the command at all
    Spawn(String, ErrorKind),

    /// the command ran but reported failure. holds the command and its stderr
    SubmitFailed(String, String),

    /// the submit command succeeded without printing a job id
    NoJobId(String),

    WriteFileError(String, ErrorKind),

    /// `mem` could not be interpreted as a number of gigabytes
    BadMemory(String),

    /// failed to query the queue status
    Status(String),
}

impl Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Spawn(cmd, kind) => {
                write!(f, "failed to run `{cmd}`: {kind}")
            }
            QueueError::SubmitFailed(cmd, stderr) => {
                write!(f, "`{cmd}` failed with `{stderr}`")
            }
            QueueError::NoJobId(cmd) => {
                write!(f, "`{cmd}` did not print a job id")
            }
            QueueError::WriteFileError(file, kind) => {
                write!(f, "failed to write {file}: {kind}")
            }
            QueueError::BadMemory(mem) => {
                write!(f, "failed to parse memory `{mem}` as gigabytes")
            }
            QueueError::Status(msg) => {
                write!(f, "failed to check queue status: {msg}")
            }
        }
    }
}

impl Error for QueueError {}

/// strip the server part from a PBS job id like `12345.server`, leaving the
/// number. SLURM ids are returned unchanged
pub fn short_id(job_id: &str) -> &str {
    job_id.split('.').next().unwrap_or(job_id).trim()
}

/// a trait for all of the program-independent parts of a [Queue]
pub trait SubQueue {
    /// the extension to append to submit scripts for this type of Queue
    const SCRIPT_EXT: &'static str = "run";

    fn submit_command(&self) -> &str;

    fn resources(&self) -> &Resources;

    /// the seconds to wait before retrying a failed submission
    fn sleep_int(&self) -> usize;

    /// the flag passed to the MPI launcher before the process count
    fn np_flag(&self) -> &str;

    /// the command to check the status of jobs in the queue
    fn stat_cmd(&self) -> Result<String, QueueError>;

    /// return a HashSet of jobs found in `output`, the output of `stat_cmd`
    fn parse_status(&self, output: &str) -> HashSet<String>;

    fn status(&self) -> Result<HashSet<String>, QueueError> {
        let output = self.stat_cmd()?;
        Ok(self.parse_status(&output))
    }

    /// whether `job_id` is still waiting or running
    fn is_queued(&self, job_id: &str) -> Result<bool, QueueError> {
        let id = short_id(job_id);
        if id.is_empty() {
            return Ok(false);
        }
        Ok(self.status()?.iter().any(|j| short_id(j) == id))
    }
}

pub trait Submit: SubQueue {
    /// submit `filename` to the queue from its own directory and return the
    /// job id
    fn submit(&self, filename: &Path) -> Result<String, QueueError> {
        let dir = filename.parent().unwrap_or(Path::new("."));
        let base = filename.file_name().unwrap_or(filename.as_os_str());
        let mut cmd = Command::new(self.submit_command());
        let cmd = cmd.arg(base);
        if !dir.as_os_str().is_empty() {
            cmd.current_dir(dir);
        }
        submit_inner(cmd, self.sleep_int())
    }
}

/// run `cmd`, retrying up to five times on failure, and return the last
/// whitespace-separated field of its output
pub(crate) fn submit_inner(
    cmd: &mut Command,
    sleep_int: usize,
) -> Result<String, QueueError> {
    let name = format!("{cmd:?}");
    let mut retries = if *NO_RETRY { 0 } else { 5 };
    loop {
        let s = cmd
            .output()
            .map_err(|e| QueueError::Spawn(name.clone(), e.kind()))?;
        let stderr = String::from_utf8_lossy(&s.stderr).trim().to_string();
        // anything on stderr counts as a failure, even with a zero status
        if !s.status.success() || !stderr.is_empty() {
            if retries > 0 {
                log::warn!(
                    "{name} failed with `{stderr}`, retrying {retries} more times"
                );
                retries -= 1;
                std::thread::sleep(Duration::from_secs(sleep_int as u64));
                continue;
            }
            return Err(QueueError::SubmitFailed(name, stderr));
        }
        let raw = String::from_utf8_lossy(&s.stdout);
        return match raw.split_whitespace().last() {
            Some(id) => Ok(id.to_string()),
            None => Err(QueueError::NoJobId(name)),
        };
    }
}

pub trait Queue: SubQueue + Submit {
    /// the submit script header, containing a `{{.jobname}}` directive for
    /// the name of the job
    fn default_submit_script(&self) -> String;

    fn template(&self) -> &Option<String>;

    /// the command for running pw.x on `infile` and writing the output to
    /// `outfile`. if `tee` is true the output is also copied to the script's
    /// own output
    fn program_cmd(&self, infile: &str, outfile: &str, tee: bool) -> String {
        let r = self.resources();
        let redirect = if tee { "| tee" } else { ">" };
        if r.np() == 1 {
            format!("{} < {infile} {redirect} {outfile}", r.executable)
        } else {
            format!(
                "{} {} {} {} -inp {infile} -npool {} {redirect} {outfile}",
                r.mpicmd,
                self.np_flag(),
                r.np(),
                r.executable,
                r.pools,
            )
        }
    }

    /// write a script named `filename` that runs each line of `body` after
    /// the header, which comes from the user template if there is one and
    /// otherwise from [Queue::default_submit_script]
    fn write_submit_script(
        &self,
        jobname: &str,
        body: impl IntoIterator<Item = String>,
        filename: &Path,
    ) -> Result<(), QueueError> {
        use std::fmt::Write;
        let mut script = self
            .template()
            .clone()
            .unwrap_or_else(|| self.default_submit_script())
            .replace("{{.jobname}}", jobname);
        if !script.is_empty() && !script.ends_with('\n') {
            script.push('\n');
        }
        for line in body {
            writeln!(script, "{line}").unwrap();
        }
        script.push_str("# end\n");
        std::fs::write(filename, script).map_err(|e| {
            QueueError::WriteFileError(
                filename.display().to_string(),
                e.kind(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_gb() {
        let mut r = Resources::default();
        assert_eq!(r.mem_gb(), Ok(None));
        r.mem = Some("2GB".to_owned());
        assert_eq!(r.mem_gb(), Ok(Some(2)));
        r.mem = Some("16gb".to_owned());
        assert_eq!(r.mem_gb(), Ok(Some(16)));
        r.mem = Some("lots".to_owned());
        assert_eq!(r.mem_gb(), Err(QueueError::BadMemory("lots".to_owned())));
    }

    #[test]
    fn short_ids() {
        assert_eq!(short_id("819446.maple"), "819446");
        assert_eq!(short_id("30627992"), "30627992");
        assert_eq!(short_id(" 42\n"), "42");
    }
}
