use std::collections::BTreeMap;

use test_case::test_case;

use super::*;

fn partition(groups: &[(usize, &[usize])]) -> Result<Partition, PartitionError> {
    Partition::new(groups.iter().map(|(k, v)| (*k, v.to_vec())))
}

#[test]
fn canonical_order() {
    let p = partition(&[(0, &[0, 2]), (3, &[3])]).unwrap();
    let r = p.reindex(5).unwrap();
    assert_eq!(r.order(), &[0, 2, 3, 1, 4]);
    assert_eq!(r.grouped(), 3);
}

#[test]
fn unsorted_input_keys() {
    let p = partition(&[(5, &[5, 1]), (2, &[4, 2])]).unwrap();
    let r = p.reindex(7).unwrap();
    assert_eq!(r.order(), &[4, 2, 5, 1, 0, 3, 6]);
    assert_eq!(p.representatives().collect::<Vec<_>>(), vec![2, 5]);
}

#[test]
fn identity_array() {
    let p = partition(&[(1, &[1, 6, 3]), (4, &[4, 0])]).unwrap();
    let r = p.reindex(8).unwrap();
    let ident: Vec<usize> = (0..8).collect();
    assert_eq!(r.permute(&ident).unwrap(), r.order());
}

#[test]
fn permute_lockstep() {
    let p = partition(&[(0, &[0, 2]), (3, &[3])]).unwrap();
    let r = p.reindex(5).unwrap();
    let u = [5.0, 1e-8, 5.0, 4.0, 1e-8];
    let alpha = ["a", "b", "c", "d", "e"];
    assert_eq!(r.permute(&u).unwrap(), vec![5.0, 5.0, 4.0, 1e-8, 1e-8]);
    assert_eq!(r.permute(&alpha).unwrap(), vec!["a", "c", "d", "b", "e"]);
}

#[test]
fn permute_length_mismatch() {
    let p = partition(&[(0, &[0, 2])]).unwrap();
    let r = p.reindex(4).unwrap();
    assert_eq!(
        r.permute(&[1, 2, 3]),
        Err(PartitionError::LengthMismatch {
            expected: 4,
            got: 3
        })
    );
}

#[test]
fn perturbations_and_tags() {
    let p = partition(&[(0, &[0, 2]), (3, &[3])]).unwrap();
    let r = p.reindex(5).unwrap();
    let perts: Vec<_> = r.perturbations().collect();
    assert_eq!(
        perts,
        vec![
            Perturbation {
                number: 1,
                representative: 0,
                position: 0
            },
            Perturbation {
                number: 2,
                representative: 3,
                position: 2
            },
        ]
    );
    assert_eq!(r.tags(0).unwrap(), vec![1, 0, 0, 0, 0]);
    assert_eq!(r.tags(1).unwrap(), vec![0, 0, 2, 0, 0]);
    assert_eq!(r.tags(2), None);
}

#[test]
fn representative_not_first_in_group() {
    let p = partition(&[(3, &[1, 3])]).unwrap();
    let r = p.reindex(4).unwrap();
    assert_eq!(r.order(), &[1, 3, 0, 2]);
    assert_eq!(r.tags(0).unwrap(), vec![0, 1, 0, 0]);
    assert_eq!(r.position(3), Some(1));
}

#[test_case(&[(0, &[0, 1]), (2, &[1, 3])],
            PartitionError::Overlap { index: 1, first: 0, second: 2 }
            ; "overlap")]
#[test_case(&[(0, &[0, 2, 2])],
            PartitionError::Duplicate { group: 0, index: 2 }
            ; "duplicate")]
#[test_case(&[(0, &[1, 2])],
            PartitionError::MissingRepresentative { group: 0 }
            ; "missing representative")]
#[test_case(&[(4, &[])],
            PartitionError::MissingRepresentative { group: 4 }
            ; "empty group")]
#[test_case(&[(1, &[1]), (1, &[1, 2])],
            PartitionError::Overlap { index: 1, first: 1, second: 1 }
            ; "repeated key")]
fn invalid(groups: &[(usize, &[usize])], want: PartitionError) {
    assert_eq!(partition(groups), Err(want));
}

#[test_case(&[(0, &[0, 5])], 5, 5 ; "one past the end")]
#[test_case(&[(0, &[0]), (9, &[9, 2])], 4, 9 ; "representative")]
fn out_of_range(groups: &[(usize, &[usize])], natoms: usize, index: usize) {
    let p = partition(groups).unwrap();
    match p.reindex(natoms) {
        Err(PartitionError::OutOfRange { index: i, natoms: n, .. }) => {
            assert_eq!(i, index);
            assert_eq!(n, natoms);
        }
        other => panic!("expected OutOfRange, got {other:?}"),
    }
}

#[test]
fn empty_partition() {
    let p = Partition::default();
    let r = p.reindex(3).unwrap();
    assert_eq!(r.order(), &[0, 1, 2]);
    assert_eq!(r.perturbations().len(), 0);
    assert_eq!(r.grouped(), 0);
}

/// every valid partition produces a permutation with grouped atoms first, in
/// ascending key order, and ungrouped atoms after them in ascending order
#[test]
fn always_permutation() {
    let natoms = 23;
    for stride in 2..7 {
        for offset in 0..stride {
            let mut groups = BTreeMap::new();
            let mut key = offset;
            while key < natoms {
                let members: Vec<usize> = (key..natoms)
                    .step_by(stride * 4)
                    .take(3)
                    .filter(|i| !groups.values().any(|v: &Vec<usize>| v.contains(i)))
                    .collect();
                if members.first() == Some(&key) {
                    groups.insert(key, members);
                }
                key += stride;
            }
            let p = Partition::new(groups.clone()).unwrap();
            let r = p.reindex(natoms).unwrap();

            let mut sorted = r.order().to_vec();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..natoms).collect::<Vec<_>>());

            let want_grouped: Vec<usize> =
                groups.values().flatten().copied().collect();
            assert_eq!(&r.order()[..r.grouped()], want_grouped.as_slice());
            let rest = &r.order()[r.grouped()..];
            assert!(rest.windows(2).all(|w| w[0] < w[1]));
            assert!(rest.iter().all(|i| !want_grouped.contains(i)));
        }
    }
}

#[test]
fn deserialize_string_keys() {
    let map: BTreeMap<String, Vec<usize>> = [
        ("3".to_string(), vec![3]),
        ("0".to_string(), vec![0, 2]),
    ]
    .into_iter()
    .collect();
    let p = Partition::try_from(map).unwrap();
    assert_eq!(p.group(0), Some(&[0, 2][..]));
    assert_eq!(p.grouped(), 3);

    let bad: BTreeMap<String, Vec<usize>> =
        [("Fe".to_string(), vec![0])].into_iter().collect();
    assert_eq!(
        Partition::try_from(bad),
        Err(PartitionError::BadKey("Fe".to_string()))
    );
}
