use std::{
    collections::HashSet,
    path::Path,
    process::{Command, Stdio},
};

use super::{Queue, QueueError, Resources, SubQueue, Submit};

/// Minimal implementation for running pw.x directly with bash. Submission
/// blocks until the script finishes, so nothing is ever left in the queue
#[derive(Debug, Default)]
pub struct Local {
    pub resources: Resources,
    pub template: Option<String>,
}

impl Local {
    pub fn new(resources: Resources, template: Option<String>) -> Self {
        Self {
            resources,
            template,
        }
    }
}

impl Submit for Local {
    /// run `filename` with bash from its own directory. the returned job id
    /// is the process id of the finished shell
    fn submit(&self, filename: &Path) -> Result<String, QueueError> {
        let dir = filename.parent().unwrap_or(Path::new("."));
        let base = filename.file_name().unwrap_or(filename.as_os_str());
        let mut cmd = Command::new(self.submit_command());
        cmd.arg(base).stdout(Stdio::piped()).stderr(Stdio::piped());
        if !dir.as_os_str().is_empty() {
            cmd.current_dir(dir);
        }
        let child = cmd
            .spawn()
            .map_err(|e| QueueError::Spawn(format!("{cmd:?}"), e.kind()))?;
        let id = child.id();
        let out = child
            .wait_with_output()
            .map_err(|e| QueueError::Spawn(format!("{cmd:?}"), e.kind()))?;
        if !out.status.success() {
            return Err(QueueError::SubmitFailed(
                format!("{cmd:?}"),
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        Ok(format!("local-{id}"))
    }
}

impl Queue for Local {
    fn template(&self) -> &Option<String> {
        &self.template
    }

    fn default_submit_script(&self) -> String {
        "#!/bin/bash\n".to_owned()
    }
}

impl SubQueue for Local {
    fn submit_command(&self) -> &str {
        "bash"
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }

    fn sleep_int(&self) -> usize {
        1
    }

    fn np_flag(&self) -> &str {
        "-np"
    }

    fn stat_cmd(&self) -> Result<String, QueueError> {
        Ok(String::new())
    }

    fn parse_status(&self, _output: &str) -> HashSet<String> {
        HashSet::new()
    }
}
