//! End-to-end scenarios, one per numbered case in the testable-properties
//! section: inner split, outer replace, left-trim (local store), two-peer
//! three-way merge, merge inconsistent, and post-import overlap rollback.

use numbex::error::Error;
use numbex::key::generate_key_pair;
use numbex::key::PrivKey;
use numbex::merge::merge_peer_branch;
use numbex::record::parse_mdate;
use numbex::record::Record;
use numbex::replicated::RepoStore;
use numbex::store::Store;

fn rec(start: &str, end: &str, sip: &str, owner: &str, mdate: &str, key: &PrivKey) -> Record {
    let mut r = Record {
        start: start.to_string(),
        end: end.to_string(),
        sip: sip.to_string(),
        owner: owner.to_string(),
        mdate: parse_mdate(mdate).unwrap(),
        sig: String::new(),
    };
    r.sign(key);
    return r;
}

#[test]
fn scenario_1_inner_split() {
    let mut store = Store::open_in_memory().unwrap();
    let (priv_key, _) = generate_key_pair();
    let t0 = parse_mdate("2012-01-01T00:00:00").unwrap();
    let t1 = parse_mdate("2012-02-01T00:00:00").unwrap();

    store
        .update(&[rec("+48581000", "+48581999", "sip.freeconet.pl", "freeconet", "2012-01-01T00:00:00", &priv_key)], t0)
        .unwrap();
    store
        .update(
            &[rec("+48581001", "+48581998", "new.freeconet.pl", "freeconet", "2012-02-01T00:00:00", &priv_key)],
            t1,
        )
        .unwrap();

    let head = store.get_range("+48581000").unwrap().unwrap();
    assert_eq!(head.end, "+48581000");
    assert_eq!(head.sig, "");

    let middle = store.get_range("+48581001").unwrap().unwrap();
    assert_eq!(middle.end, "+48581998");
    assert_eq!(middle.sip, "new.freeconet.pl");
    assert_ne!(middle.sig, "");

    let tail = store.get_range("+48581999").unwrap().unwrap();
    assert_eq!(tail.end, "+48581999");
    assert_eq!(tail.sig, "");

    assert_eq!(store.get_all().unwrap().len(), 3);
}

#[test]
fn scenario_2_outer_replace() {
    let mut store = Store::open_in_memory().unwrap();
    let (priv_key, _) = generate_key_pair();
    let t0 = parse_mdate("2012-01-01T00:00:00").unwrap();
    let t1 = parse_mdate("2012-02-01T00:00:00").unwrap();

    store
        .update(&[rec("+48581000", "+48581999", "sip.freeconet.pl", "freeconet", "2012-01-01T00:00:00", &priv_key)], t0)
        .unwrap();
    store
        .update(
            &[rec("+48580999", "+48582000", "new.freeconet.pl", "freeconet", "2012-02-01T00:00:00", &priv_key)],
            t1,
        )
        .unwrap();

    let all = store.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].start, "+48580999");
    assert_eq!(all[0].end, "+48582000");
    assert_eq!(all[0].sip, "new.freeconet.pl");
}

#[test]
fn scenario_3_left_trim() {
    let mut store = Store::open_in_memory().unwrap();
    let (priv_key, _) = generate_key_pair();
    let t0 = parse_mdate("2012-01-01T00:00:00").unwrap();
    let t1 = parse_mdate("2012-02-01T00:00:00").unwrap();

    store
        .update(&[rec("+48581000", "+48581999", "sip.freeconet.pl", "freeconet", "2012-01-01T00:00:00", &priv_key)], t0)
        .unwrap();
    store
        .update(
            &[rec("+48580999", "+48581000", "new.freeconet.pl", "freeconet", "2012-02-01T00:00:00", &priv_key)],
            t1,
        )
        .unwrap();

    let head = store.get_range("+48580999").unwrap().unwrap();
    assert_eq!(head.end, "+48581000");
    assert_eq!(head.sip, "new.freeconet.pl");
    assert_ne!(head.sig, "");

    let tail = store.get_range("+48581001").unwrap().unwrap();
    assert_eq!(tail.end, "+48581999");
    assert_eq!(tail.sig, "");

    assert_eq!(store.get_all().unwrap().len(), 2);
}

#[test]
fn scenario_4_two_peer_three_way_merge_disjoint_additions() {
    let (priv_key, pub_key) = generate_key_pair();
    let lookup = |_: &str| vec![pub_key.clone()];

    let dir_a = tempfile::tempdir().unwrap();
    let mut a = RepoStore::open_or_init(dir_a.path()).unwrap();
    a.import_data(
        &[
            rec("+481000", "+481500", "sip.a", "freeconet", "2012-01-01T00:00:00", &priv_key),
            rec("+482500", "+483000", "sip.a", "freeconet", "2012-01-01T00:00:00", &priv_key),
        ],
        &[],
        lookup,
    )
    .unwrap();

    let dir_b = tempfile::tempdir().unwrap();
    let mut b = RepoStore::open_or_init(dir_b.path()).unwrap();
    b.import_data(
        &[
            rec("+481000", "+481500", "sip.a", "freeconet", "2012-01-01T00:00:00", &priv_key),
            rec("+482500", "+483000", "sip.a", "freeconet", "2012-01-01T00:00:00", &priv_key),
        ],
        &[],
        lookup,
    )
    .unwrap();

    // A adds its own version of +484000, then B (already at the same base)
    // adds a later-`mdate` version of the same range plus a disjoint one.
    a.import_data(&[rec("+484000", "+484999", "sip.a", "freeconet", "2012-02-01T00:00:00", &priv_key)], &[], lookup)
        .unwrap();
    b.import_data(
        &[
            rec("+484000", "+484999", "new.freeconet.pl", "freeconet", "2012-03-01T00:00:00", &priv_key),
            rec("+485000", "+485500", "new.freeconet.pl", "freeconet", "2012-03-01T00:00:00", &priv_key),
        ],
        &[],
        lookup,
    )
    .unwrap();

    b.add_remote("peer-a", dir_a.path().to_str().unwrap(), true).unwrap();
    b.fetch_from_remote("peer-a").unwrap();
    let report = merge_peer_branch(&mut b, "refs/remotes/peer-a/master", lookup).unwrap();

    let merged = b.export_all().unwrap();
    assert_eq!(merged.len(), 4);
    assert!(b.check_overlaps().unwrap().is_empty());

    let winner = merged.iter().find(|r| r.start == "+484000").unwrap();
    assert_eq!(winner.sip, "new.freeconet.pl");
    assert!(merged.iter().any(|r| r.start == "+485000"));
    assert_eq!(report.fix_up_deletions, 0);
}

#[test]
fn scenario_5_merge_inconsistent_aborts_without_modifying_either_store() {
    let (priv_key, pub_key) = generate_key_pair();
    let lookup = |_: &str| vec![pub_key.clone()];

    let dir_a = tempfile::tempdir().unwrap();
    let mut a = RepoStore::open_or_init(dir_a.path()).unwrap();
    a.import_data(
        &[
            rec("+481000", "+481500", "sip.a", "freeconet", "2012-01-01T00:00:00", &priv_key),
            rec("+482000", "+483000", "sip.a", "freeconet", "2012-03-01T00:00:00", &priv_key),
        ],
        &[],
        lookup,
    )
    .unwrap();
    let a_before = a.export_all().unwrap();

    let dir_b = tempfile::tempdir().unwrap();
    let mut b = RepoStore::open_or_init(dir_b.path()).unwrap();
    b.import_data(&[rec("+481000", "+482999", "sip.b", "freeconet", "2012-02-01T00:00:00", &priv_key)], &[], lookup)
        .unwrap();
    let b_before = b.export_all().unwrap();

    b.add_remote("peer-a", dir_a.path().to_str().unwrap(), true).unwrap();
    b.fetch_from_remote("peer-a").unwrap();
    let result = merge_peer_branch(&mut b, "refs/remotes/peer-a/master", lookup);
    assert!(matches!(result, Err(Error::InconsistentData)));

    assert_eq!(a.export_all().unwrap(), a_before);
    assert_eq!(b.export_all().unwrap(), b_before);
}

#[test]
fn scenario_6_post_import_overlap_rollback() {
    let (priv_key, pub_key) = generate_key_pair();
    let lookup = |_: &str| vec![pub_key.clone()];

    let dir = tempfile::tempdir().unwrap();
    let mut store = RepoStore::open_or_init(dir.path()).unwrap();
    store
        .import_data(&[rec("+481000", "+481999", "sip.a", "freeconet", "2012-01-01T00:00:00", &priv_key)], &[], lookup)
        .unwrap();
    let before = store.export_all().unwrap();

    let overlapping = rec("+481500", "+482500", "sip.a", "freeconet", "2012-01-02T00:00:00", &priv_key);
    let ok = store.import_data(&[overlapping], &[], lookup).unwrap();
    assert!(!ok);

    assert_eq!(store.export_all().unwrap(), before);
}
