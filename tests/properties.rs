//! Property-based tests for the invariants listed in spec.md §8: path
//! derivation uniqueness, the record blob round-trip, and update()
//! idempotency.

use proptest::prelude::*;

use numbex::key::generate_key_pair;
use numbex::record::parse_mdate;
use numbex::record::Record;
use numbex::replicated::make_blob;
use numbex::replicated::make_repo_path;
use numbex::replicated::parse_blob;
use numbex::store::Store;

fn arbitrary_digits() -> impl Strategy<Value = String> {
    prop::collection::vec(b'0'..=b'9', 1..12).prop_map(|bytes| String::from_utf8(bytes).unwrap())
}

fn arbitrary_sip_or_owner() -> impl Strategy<Value = String> {
    prop::collection::vec(b'a'..=b'z', 1..16).prop_map(|bytes| String::from_utf8(bytes).unwrap())
}

/// A record with placeholder `start`/`end` (overridden by the caller) and
/// randomized `sip`/`owner`/`mdate`.
fn arbitrary_record() -> impl Strategy<Value = Record> {
    (arbitrary_sip_or_owner(), arbitrary_sip_or_owner(), 0u32..900_000_000).prop_map(move |(sip, owner, micros)| {
        let mdate = parse_mdate("2012-01-01T00:00:00").unwrap() + chrono::Duration::microseconds(micros as i64);
        Record {
            start: Record::format_number(0),
            end: Record::format_number(0),
            sip,
            owner,
            mdate,
            sig: String::new(),
        }
    })
}

proptest! {
    /// Two distinct numbers never derive the same replicated-store path,
    /// regardless of whether one is a prefix of the other or their digit
    /// counts align on a 3-digit group boundary.
    #[test]
    fn distinct_numbers_never_share_a_repo_path(a in arbitrary_digits(), b in arbitrary_digits()) {
        prop_assume!(a != b);
        prop_assert_ne!(make_repo_path(&a), make_repo_path(&b));
    }

    /// `parse_blob(make_blob(r)) == r` for any record whose fields don't
    /// themselves contain the blob's line structure.
    #[test]
    fn blob_round_trips_for_arbitrary_records(start in 0i64..999_999_999, len in 0i64..10_000, rec in arbitrary_record()) {
        let end = start + len;
        let rec = Record {
            start: Record::format_number(start),
            end: Record::format_number(end),
            ..rec
        };
        let blob = make_blob(&rec);
        let parsed = parse_blob(&blob).unwrap();
        prop_assert_eq!(parsed, rec);
    }

}

proptest! {
    /// Applying the same single-record batch twice leaves the store in the
    /// same observable state as applying it once (the update algorithm's
    /// idempotency property). Kept to a small case count: each case
    /// generates a fresh DSA key pair, which is comparatively expensive.
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn update_is_idempotent_for_a_single_non_overlapping_record(start in 0i64..999_999_999, len in 0i64..10_000, rec in arbitrary_record()) {
        let end = start + len;
        let rec = Record {
            start: Record::format_number(start),
            end: Record::format_number(end),
            ..rec
        };
        let (priv_key, _pub_key) = generate_key_pair();
        let mut signed = rec.clone();
        signed.sign(&priv_key);

        let now = signed.mdate;
        let mut store = Store::open_in_memory().unwrap();
        store.update(&[signed.clone()], now).unwrap();
        let once = store.get_all().unwrap();

        store.update(&[signed], now).unwrap();
        let twice = store.get_all().unwrap();

        prop_assert_eq!(once, twice);
    }
}
