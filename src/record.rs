//! The range record: the sole first-class entity in the directory.
//!
//! A record maps a contiguous interval of E.164 numbers to a SIP address
//! and an owning carrier, authenticated by a detached DSA signature over
//! the record's canonical CSV form.

use chrono::NaiveDateTime;

use crate::key;
use crate::key::PrivKey;
use crate::key::PubKey;

/// Error produced while parsing a telephone number or a record row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("number '{0}' is not of the form +<digits>")]
    BadNumber(String),
    #[error("malformed mdate '{0}': {1}")]
    BadDate(String, String),
    #[error("expected 6 CSV fields, got {0}")]
    WrongFieldCount(usize),
}

/// A range record: `(start, end, sip, owner, mdate, sig)`.
///
/// `start`/`end` are kept in their textual `+<digits>` form (the identity
/// used as storage key) alongside their numeric interpretation, which
/// drives interval arithmetic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub start: String,
    pub end: String,
    pub sip: String,
    pub owner: String,
    pub mdate: NaiveDateTime,
    /// Detached DSA signature in wire form `"<base64 r> <base64 s>"`.
    /// Empty only for records produced by the local single-writer
    /// adjustment path (trim/split); such records must never enter the
    /// replicated store.
    pub sig: String,
}

/// Parse a canonical `+<digits>` telephone number into its integer value.
pub fn number_to_int(number: &str) -> Result<i64, RecordError> {
    let digits = number
        .strip_prefix('+')
        .ok_or_else(|| RecordError::BadNumber(number.to_string()))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RecordError::BadNumber(number.to_string()));
    }
    return digits
        .parse::<i64>()
        .map_err(|_| RecordError::BadNumber(number.to_string()));
}

/// Parse an ISO-8601 `mdate`, with or without a fractional-second part,
/// matching the legacy parser's `[.:T-]`-delimited splitting.
pub fn parse_mdate(s: &str) -> Result<NaiveDateTime, RecordError> {
    const FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];
    for fmt in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    return Err(RecordError::BadDate(s.to_string(), "no matching format".to_string()));
}

/// Render an `mdate` in canonical ISO-8601-with-microseconds form.
pub fn format_mdate(dt: &NaiveDateTime) -> String {
    return dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
}

impl Record {
    /// The canonical CSV row over which signatures are computed:
    /// `start,end,sip,owner,mdate` with `mdate` in canonical ISO-8601 form.
    /// CSV quoting must match exactly between signer and verifier.
    pub fn canonical_csv(&self) -> String {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(vec![]);
        writer
            .write_record([
                self.start.as_str(),
                self.end.as_str(),
                self.sip.as_str(),
                self.owner.as_str(),
                &format_mdate(&self.mdate),
            ])
            .expect("in-memory CSV write cannot fail");
        let bytes = writer.into_inner().expect("CSV writer flush cannot fail");
        let text = String::from_utf8(bytes).expect("CSV output is always valid UTF-8");
        return text.trim_end_matches('\n').to_string();
    }

    /// Sign this record with the given private key, setting `sig`.
    pub fn sign(&mut self, key: &PrivKey) {
        let message = self.canonical_csv();
        self.sig = key::sign(key, message.as_bytes()).to_wire();
    }

    /// Verify `sig` against any of the given public keys for `owner`.
    /// Malformed or empty `sig` verifies as `false`, never raises.
    pub fn verify<'a>(&self, keys: impl IntoIterator<Item = &'a PubKey>) -> bool {
        if self.sig.is_empty() {
            return false;
        }
        let message = self.canonical_csv();
        return keys
            .into_iter()
            .any(|k| key::verify_wire(k, &self.sig, message.as_bytes()));
    }

    /// Numeric interpretation of `start`.
    pub fn start_int(&self) -> Result<i64, RecordError> {
        return number_to_int(&self.start);
    }

    /// Numeric interpretation of `end`.
    pub fn end_int(&self) -> Result<i64, RecordError> {
        return number_to_int(&self.end);
    }

    /// Render a number as `+<digits>`.
    pub fn format_number(n: i64) -> String {
        return format!("+{}", n);
    }
}

/// Parse a six-field CSV row (`start,end,sip,owner,mdate,sig`) into a
/// `Record`.
pub fn parse_csv_row(row: &[String]) -> Result<Record, RecordError> {
    if row.len() != 6 {
        return Err(RecordError::WrongFieldCount(row.len()));
    }
    return Ok(Record {
        start: row[0].clone(),
        end: row[1].clone(),
        sip: row[2].clone(),
        owner: row[3].clone(),
        mdate: parse_mdate(&row[4])?,
        sig: row[5].clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_key_pair;

    fn sample(start: &str, end: &str, mdate: &str) -> Record {
        return Record {
            start: start.to_string(),
            end: end.to_string(),
            sip: "sip.freeconet.pl".to_string(),
            owner: "freeconet".to_string(),
            mdate: parse_mdate(mdate).unwrap(),
            sig: String::new(),
        };
    }

    #[test]
    fn number_to_int_parses_plus_digits() {
        assert_eq!(number_to_int("+48581000").unwrap(), 48581000);
    }

    #[test]
    fn number_to_int_rejects_missing_plus() {
        assert!(number_to_int("48581000").is_err());
    }

    #[test]
    fn number_to_int_rejects_non_digits() {
        assert!(number_to_int("+4858a000").is_err());
    }

    #[test]
    fn mdate_roundtrips_with_microseconds() {
        let dt = parse_mdate("2012-01-02T03:04:05.123456").unwrap();
        assert_eq!(format_mdate(&dt), "2012-01-02T03:04:05.123456");
    }

    #[test]
    fn mdate_parses_without_fraction() {
        let dt = parse_mdate("2012-01-02T03:04:05").unwrap();
        assert_eq!(format_mdate(&dt), "2012-01-02T03:04:05.000000");
    }

    #[test]
    fn canonical_csv_has_expected_fields() {
        let rec = sample("+48581000", "+48581999", "2012-01-01T00:00:00");
        assert_eq!(
            rec.canonical_csv(),
            "+48581000,+48581999,sip.freeconet.pl,freeconet,2012-01-01T00:00:00.000000"
        );
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let (priv_key, pub_key) = generate_key_pair();
        let mut rec = sample("+48581000", "+48581999", "2012-01-01T00:00:00");
        rec.sign(&priv_key);
        assert!(rec.verify([&pub_key]));
    }

    #[test]
    fn verify_fails_with_empty_signature() {
        let (_, pub_key) = generate_key_pair();
        let rec = sample("+48581000", "+48581999", "2012-01-01T00:00:00");
        assert!(!rec.verify([&pub_key]));
    }

    #[test]
    fn verify_fails_after_tampering_with_a_field() {
        let (priv_key, pub_key) = generate_key_pair();
        let mut rec = sample("+48581000", "+48581999", "2012-01-01T00:00:00");
        rec.sign(&priv_key);
        rec.sip = "sip.evil.example".to_string();
        assert!(!rec.verify([&pub_key]));
    }

    #[test]
    fn parse_csv_row_rejects_wrong_field_count() {
        let row = vec!["+1".to_string(), "+2".to_string()];
        assert!(matches!(parse_csv_row(&row), Err(RecordError::WrongFieldCount(2))));
    }
}
