use std::{
    fs::read_to_string,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use assert_cmd::Command;
use insta::assert_snapshot;
use tempfile::{TempDir, tempdir};

/// stands in for pw.x: consumes its input and prints a finished run with
/// occupations for four atoms
const FAKE_PW: &str = r#"#!/bin/bash
cat > /dev/null
cat <<EOF
     ethr =  1.00E-06,  avg # of iterations =  2.0
     Self-consistent Calculation
atom    1   Tr[ns(na)] =   6.10000
atom    2   Tr[ns(na)] =   6.10000
atom    3   Tr[ns(na)] =   6.10000
atom    4   Tr[ns(na)] =   6.10000
     End of self-consistent calculation
atom    1   Tr[ns(na)] =   6.12000
atom    2   Tr[ns(na)] =   6.09000
atom    3   Tr[ns(na)] =   6.11000
atom    4   Tr[ns(na)] =   6.08000

   JOB DONE.
EOF
"#;

const FAKE_RX: &str = r#"#!/bin/bash
cat > /dev/null
printf '  type:   1  U =    4.5123\n  type:   2  U =    4.4012\n' > Umat.out
echo done
"#;

fn executable(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

/// a campaign directory containing hubbard.toml for the FeO test system run
/// with the local queue and the fake programs
fn setup() -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let pw = dir.path().join("pw.sh");
    let rx = dir.path().join("rx.sh");
    executable(&pw, FAKE_PW);
    executable(&rx, FAKE_RX);
    let config = read_to_string("testfiles/feo.toml")
        .unwrap()
        .replace(
            "queue = \"pbs\"",
            &format!("queue = \"local\"\nrx = \"{}\"", rx.display()),
        )
        .replace(
            "walltime = \"24:00:00\"\nppn = 4\nmem = \"2GB\"",
            &format!("executable = \"{}\"", pw.display()),
        );
    std::fs::write(dir.path().join("hubbard.toml"), config).unwrap();
    let root = dir.path().to_path_buf();
    (dir, root)
}

fn hubbard(root: &Path, step: &str) -> assert_cmd::assert::Assert {
    Command::cargo_bin("hubbard")
        .unwrap()
        .arg(step)
        .current_dir(root)
        .assert()
}

#[test]
fn order() {
    let (_dir, root) = setup();
    let output = hubbard(&root, "order").success().get_output().clone();
    assert_snapshot!(String::from_utf8_lossy(&output.stdout), @r"
    canonical order: 0 1 3 2 4 5 6 7
    grouped atoms: 4
     pert  representative  position  directory
        1               0         0  feo-1-pert
        2               2         3  feo-2-pert
    tags:
        1: 1 0 0 0 0 0 0 0
        2: 0 0 0 2 0 0 0 0
    ");
}

#[test]
fn campaign() {
    let (_dir, root) = setup();

    hubbard(&root, "scf").success();
    for p in 1..=2 {
        let pert = root.join(format!("feo-{p}-pert"));
        let out = read_to_string(pert.join(format!("feo-{p}-pert.out")));
        assert!(out.unwrap().contains("JOB DONE."));
        let jobid = read_to_string(pert.join("jobid")).unwrap();
        assert!(jobid.starts_with("local-"));
    }
    // nothing left to do
    let output = hubbard(&root, "scf").success().get_output().clone();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout, "scf 1: complete\nscf 2: complete\n");

    hubbard(&root, "pert").success();
    for a in ["-0.1", "0", "0.1"] {
        let out = root.join(format!("feo-2-pert/results/alpha_{a}.out"));
        assert!(read_to_string(out).unwrap().contains("JOB DONE."));
    }

    hubbard(&root, "calc").success();
    let ucalc = root.join("Ucalc");
    assert_eq!(
        read_to_string(ucalc.join("dn.2.da.4.dat")).unwrap(),
        " -0.1  6.09\n 0  6.09\n 0.1  6.09\n"
    );
    assert_eq!(read_to_string(ucalc.join("dnda")).unwrap().lines().count(), 8);

    let output = hubbard(&root, "solve").success().get_output().clone();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("4.5123"), "{stdout}");
    assert_eq!(read_to_string(ucalc.join("rx.out")).unwrap(), "done\n");

    let json: serde_json::Value =
        serde_json::from_str(&read_to_string(ucalc.join("u.json")).unwrap())
            .unwrap();
    assert_eq!(json["types"][0]["type"], 1);
    assert_eq!(json["types"][0]["representative"], 0);
    assert_eq!(json["types"][0]["u"], 4.5123);
    assert_eq!(json["types"][1]["representative"], 2);
}

#[test]
fn dry_run() {
    let (_dir, root) = setup();
    let output = Command::cargo_bin("hubbard")
        .unwrap()
        .args(["scf", "--dry-run"])
        .current_dir(&root)
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout, "scf 1: written\nscf 2: written\n");
    let pert = root.join("feo-1-pert");
    assert!(pert.join("feo-1-pert.in").exists());
    assert!(pert.join("feo-1-pert.run").exists());
    assert!(!pert.join("feo-1-pert.out").exists());
    assert!(!pert.join("jobid").exists());
}

#[test]
fn pert_before_scf() {
    let (_dir, root) = setup();
    let output = hubbard(&root, "pert").failure().get_output().clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("has not finished"), "{stderr}");
}

#[test]
fn missing_config() {
    let dir = tempdir().unwrap();
    let output = Command::cargo_bin("hubbard")
        .unwrap()
        .args(["order", "--config", "nope.toml"])
        .current_dir(dir.path())
        .assert()
        .failure()
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load nope.toml"), "{stderr}");
}
