use approx::assert_abs_diff_eq;

use crate::*;

/// rock-salt FeO in a conventional cubic cell, antiferromagnetic along [001]
fn feo() -> Structure {
    let cell = Mat3::new(4.3, 0.0, 0.0, 0.0, 4.3, 0.0, 0.0, 0.0, 4.3);
    let atoms = Structure::parse_atoms(
        "
Fe 0.00 0.00 0.00  4.0
Fe 2.15 2.15 0.00  4.0
Fe 2.15 0.00 2.15 -4.0
Fe 0.00 2.15 2.15 -4.0
O  2.15 0.00 0.00
O  0.00 2.15 0.00
O  0.00 0.00 2.15
O  2.15 2.15 2.15
",
    )
    .unwrap();
    Structure::new(cell, atoms)
}

#[test]
fn parse() {
    let s = feo();
    assert_eq!(s.len(), 8);
    assert_eq!(s.atoms[2].label(), "Fe");
    assert_eq!(s.atoms[2].magmom, -4.0);
    assert_eq!(s.atoms[7].label(), "O");
}

#[test]
fn reorder_keeps_parameters() {
    let mut s = feo();
    s.set_hubbard_u(&[4.0, 4.0, 4.0, 4.0, 1e-8, 1e-8, 1e-8, 1e-8])
        .unwrap();
    s.set_hubbard_alpha(&[0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.2])
        .unwrap();
    let got = s.reorder(&[7, 0, 2, 1, 3, 4, 5, 6]).unwrap();
    assert_eq!(got.atoms[0], s.atoms[7]);
    assert_eq!(got.atoms[0].hubbard_alpha, 0.2);
    assert_eq!(got.atoms[0].hubbard_u, 1e-8);
    assert_eq!(got.atoms[1].hubbard_alpha, 0.1);
    assert_eq!(got.atoms[2].magmom, -4.0);
    assert_eq!(got.atoms[3].magmom, 4.0);
}

#[test]
fn reorder_errors() {
    let s = feo();
    assert_eq!(
        s.reorder(&[0, 1]),
        Err(StructureError::LengthMismatch {
            expected: 8,
            got: 2
        })
    );
    assert_eq!(
        s.reorder(&[0, 1, 2, 3, 4, 5, 6, 8]),
        Err(StructureError::IndexOutOfRange {
            index: 8,
            natoms: 8
        })
    );
    let mut s = s;
    assert!(s.set_tags(&[1]).is_err());
}

#[test]
fn center_on() {
    let mut s = feo();
    s.center_on(1).unwrap();
    assert_abs_diff_eq!(s.atoms[1].position, Vec3::zeros());
    assert_abs_diff_eq!(
        s.atoms[0].position,
        Vec3::new(-2.15, -2.15, 0.0),
        epsilon = 1e-12
    );
    assert!(s.center_on(8).is_err());
}

#[test]
fn scaled_positions() {
    let mut s = feo();
    s.center_on(1).unwrap();
    let got = s.scaled_positions().unwrap();
    // everything wraps back into the unit cell
    assert_abs_diff_eq!(got[0], Vec3::new(0.5, 0.5, 0.0), epsilon = 1e-12);
    assert_abs_diff_eq!(got[1], Vec3::zeros(), epsilon = 1e-12);
    assert_abs_diff_eq!(got[7], Vec3::new(0.0, 0.0, 0.5), epsilon = 1e-12);
    for v in got {
        assert!(v.iter().all(|&x| (0.0..1.0).contains(&x)));
    }
}

#[test]
fn scaled_positions_oblique() {
    let cell = Mat3::new(2.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 3.0);
    let s = Structure::new(
        cell,
        vec![Atom::new(8, 1.5, 1.0, 1.5), Atom::new(8, 0.0, 0.0, 0.0)],
    );
    let got = s.scaled_positions().unwrap();
    // 0.5 * a + 0.5 * b + 0.5 * c
    assert_abs_diff_eq!(got[0], Vec3::new(0.5, 0.5, 0.5), epsilon = 1e-12);

    let flat = Structure::new(Mat3::zeros(), Vec::new());
    assert_eq!(flat.scaled_positions(), Err(StructureError::SingularCell));
}

#[test]
fn species() {
    let mut s = feo();
    let got = s.species();
    let labels: Vec<_> = got.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["Fe1", "Fe2", "O"]);
    assert_eq!(s.species_indices(), vec![0, 0, 1, 1, 2, 2, 2, 2]);

    // tagging a single atom splits it into its own species
    s.set_tags(&[0, 0, 1, 0, 0, 0, 0, 0]).unwrap();
    let labels: Vec<_> =
        s.species().into_iter().map(|s| s.label).collect();
    assert_eq!(labels, vec!["Fe1", "Fe2", "Fe3", "O"]);
    assert_eq!(s.species_index(2), Some(1));
    assert_eq!(s.species_index(3), Some(2));
    assert_eq!(s.species_index(8), None);
}
