use std::{collections::HashSet, fmt::Write, process::Command};

use super::{Queue, QueueError, Resources, SubQueue, Submit};

/// Pbs is a type for holding the information for submitting a pbs job
#[derive(Debug)]
pub struct Pbs {
    pub resources: Resources,
    pub sleep_int: usize,
    pub template: Option<String>,
}

impl Pbs {
    pub fn new(
        resources: Resources,
        sleep_int: usize,
        template: Option<String>,
    ) -> Self {
        Self {
            resources,
            sleep_int,
            template,
        }
    }
}

impl Submit for Pbs {}

impl Queue for Pbs {
    fn template(&self) -> &Option<String> {
        &self.template
    }

    fn default_submit_script(&self) -> String {
        let r = &self.resources;
        let mut s = format!(
            "#!/bin/bash
#PBS -l walltime={}
#PBS -j oe
#PBS -N {{{{.jobname}}}}
",
            r.walltime
        );
        let nodes = match &r.processor {
            Some(p) => format!("{}:ppn={}:{p}", r.nodes, r.ppn),
            None => format!("{}:ppn={}", r.nodes, r.ppn),
        };
        writeln!(s, "#PBS -l nodes={nodes}").unwrap();
        if let Some(mem) = &r.mem {
            writeln!(s, "#PBS -l mem={mem}").unwrap();
        }
        if let Some(queue) = &r.queue {
            writeln!(s, "#PBS -q {queue}").unwrap();
        }
        s.push_str("\ncd $PBS_O_WORKDIR\n");
        s
    }
}

impl SubQueue for Pbs {
    fn submit_command(&self) -> &str {
        "qsub"
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }

    fn sleep_int(&self) -> usize {
        self.sleep_int
    }

    fn np_flag(&self) -> &str {
        "-np"
    }

    /// run `qstat -u $USER`. form of the output is:
    ///
    /// maple:
    ///                                                     Req'd  Req'd   Elap
    /// Job ID  Username Queue    Jobname    SessID NDS TSK Memory Time  S Time
    /// ------- -------- -------- ---------- ------ --- --- ------ ----- - -----
    /// 819446  user     queue    C6HNpts      5085   1   1    8gb 26784 R 00:00
    fn stat_cmd(&self) -> Result<String, QueueError> {
        let user = std::env::var("USER")
            .map_err(|_| QueueError::Status("couldn't find $USER".into()))?;
        let status = Command::new("qstat")
            .args(["-u", &user])
            .output()
            .map_err(|e| QueueError::Spawn("qstat".into(), e.kind()))?;
        Ok(String::from_utf8_lossy(&status.stdout).into_owned())
    }

    fn parse_status(&self, output: &str) -> HashSet<String> {
        // skip to end of header
        output
            .lines()
            .skip_while(|l| !l.contains("-------"))
            .skip(1)
            .filter_map(|line| {
                let fields: Vec<_> = line.split_whitespace().collect();
                // the state column `S` is second to last. completed jobs
                // linger in the listing
                match fields.as_slice() {
                    [] => None,
                    [.., "C", _] => None,
                    [id, ..] => Some(id.to_string()),
                }
            })
            .collect()
    }
}
