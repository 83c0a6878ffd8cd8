use std::{collections::HashSet, fmt::Write};

use super::{Queue, QueueError, Resources, SubQueue, Submit};

/// Slurm is a type for holding the information for submitting a slurm job
#[derive(Debug)]
pub struct Slurm {
    resources: Resources,
    sleep_int: usize,

    /// `resources.mem` converted to megabytes per CPU
    mem_per_cpu: Option<usize>,

    pub(crate) template: Option<String>,
}

impl Slurm {
    /// fails if `resources.mem` can't be converted to megabytes
    pub fn new(
        resources: Resources,
        sleep_int: usize,
        template: Option<String>,
    ) -> Result<Self, QueueError> {
        let mem_per_cpu = resources.mem_gb()?.map(|gb| 1024 * gb);
        Ok(Self {
            resources,
            sleep_int,
            mem_per_cpu,
            template,
        })
    }
}

impl Submit for Slurm {}

impl Queue for Slurm {
    fn template(&self) -> &Option<String> {
        &self.template
    }

    fn default_submit_script(&self) -> String {
        let r = &self.resources;
        let mut s = format!(
            "#!/bin/bash
#SBATCH --time={}
#SBATCH --job-name={{{{.jobname}}}}
",
            r.walltime
        );
        write!(s, "#SBATCH --nodes={} --ntasks-per-node={}", r.nodes, r.ppn)
            .unwrap();
        if let Some(p) = &r.processor {
            write!(s, " --nodelist={p}").unwrap();
        }
        s.push('\n');
        if let Some(mem) = self.mem_per_cpu {
            writeln!(s, "#SBATCH --mem-per-cpu={mem}").unwrap();
        }
        if let Some(queue) = &r.queue {
            writeln!(s, "#SBATCH -p {queue}").unwrap();
        }
        s.push_str("\ncd $SLURM_SUBMIT_DIR\n");
        s
    }
}

impl SubQueue for Slurm {
    fn submit_command(&self) -> &str {
        "sbatch"
    }

    fn resources(&self) -> &Resources {
        &self.resources
    }

    fn sleep_int(&self) -> usize {
        self.sleep_int
    }

    fn np_flag(&self) -> &str {
        "-n"
    }

    /// run `squeue -u $USER`. form of the output is:
    ///
    ///    JOBID PARTITION   NAME     USER ST        TIME  NODES NODELIST(REASON)
    /// 30627992   compute  c3oh-   mdavis  R 46-17:12:23      1 node2
    fn stat_cmd(&self) -> Result<String, QueueError> {
        let user = std::env::var("USER")
            .map_err(|_| QueueError::Status("couldn't find $USER".into()))?;
        let status = std::process::Command::new("squeue")
            .args(["-u", &user])
            .output()
            .map_err(|e| QueueError::Spawn("squeue".into(), e.kind()))?;
        Ok(String::from_utf8_lossy(&status.stdout).into_owned())
    }

    fn parse_status(&self, output: &str) -> HashSet<String> {
        let mut ret = HashSet::new();
        for line in output.lines() {
            if line.contains("JOBID") {
                continue;
            }
            let fields: Vec<_> = line.split_whitespace().collect();
            // exclude completing jobs to combat stuck completing bug
            if fields.len() > 4 && fields[4] != "CG" {
                ret.insert(fields[0].to_string());
            }
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    fn slurm() -> Slurm {
        Slurm::new(Resources::default(), 1, None).unwrap()
    }

    #[test]
    fn default_script() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let q = slurm();
        q.write_submit_script(
            "feo-1-scf",
            [q.program_cmd("feo-1-pert.in", "feo-1-pert.out", true)],
            tmp.path(),
        )
        .unwrap();
        let got = std::fs::read_to_string(tmp).unwrap();
        assert_snapshot!(got, @r"
        #!/bin/bash
        #SBATCH --time=50:00:00
        #SBATCH --job-name=feo-1-scf
        #SBATCH --nodes=1 --ntasks-per-node=1

        cd $SLURM_SUBMIT_DIR
        pw.x < feo-1-pert.in | tee feo-1-pert.out
        # end
        ");
    }

    #[test]
    fn full_script() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let q = Slurm::new(
            Resources {
                nodes: 1,
                ppn: 16,
                processor: Some("node[1-2]".into()),
                mem: Some("2GB".into()),
                queue: Some("compute".into()),
                pools: 2,
                mpicmd: "srun".into(),
                ..Default::default()
            },
            1,
            None,
        )
        .unwrap();
        q.write_submit_script(
            "feo-1-scf",
            [q.program_cmd("feo-1-pert.in", "feo-1-pert.out", true)],
            tmp.path(),
        )
        .unwrap();
        let got = std::fs::read_to_string(tmp).unwrap();
        assert_snapshot!(got, @r"
        #!/bin/bash
        #SBATCH --time=50:00:00
        #SBATCH --job-name=feo-1-scf
        #SBATCH --nodes=1 --ntasks-per-node=16 --nodelist=node[1-2]
        #SBATCH --mem-per-cpu=2048
        #SBATCH -p compute

        cd $SLURM_SUBMIT_DIR
        srun -n 16 pw.x -inp feo-1-pert.in -npool 2 | tee feo-1-pert.out
        # end
        ");
    }

    #[test]
    fn bad_memory() {
        let r = Resources {
            mem: Some("two".into()),
            ..Default::default()
        };
        assert_eq!(
            Slurm::new(r, 1, None).unwrap_err(),
            QueueError::BadMemory("two".into())
        );
    }

    #[test]
    fn status() {
        let out = "
   JOBID PARTITION   NAME     USER ST        TIME  NODES NODELIST(REASON)
30627992   compute  feo-1-   mdavis  R 46-17:12:23      1 node2
30627993   compute  feo-2-   mdavis CG       12:23      1 node3
30627994   compute  feo-3-   mdavis PD        0:00      1 (Priority)
";
        let got = slurm().parse_status(out);
        let want: HashSet<String> =
            ["30627992", "30627994"].into_iter().map(String::from).collect();
        assert_eq!(got, want);
    }
}
