//! The six-line blob format stored at each range's repository path.

use crate::record::format_mdate;
use crate::record::parse_mdate;
use crate::record::Record;
use crate::record::RecordError;

/// Render a record as the six-line blob: `Range-start`, `Range-end`,
/// `Sip-address`, `Owner`, `Date-modified`, `Signature`.
pub fn make_blob(rec: &Record) -> String {
    return format!(
        "Range-start: {}\nRange-end: {}\nSip-address: {}\nOwner: {}\nDate-modified: {}\nSignature: {}\n",
        rec.start,
        rec.end,
        rec.sip,
        rec.owner,
        format_mdate(&rec.mdate),
        rec.sig,
    );
}

/// Parse a blob written by `make_blob` back into a record.
pub fn parse_blob(blob: &str) -> Result<Record, RecordError> {
    let mut start = None;
    let mut end = None;
    let mut sip = None;
    let mut owner = None;
    let mut mdate = None;
    let mut sig = None;

    for line in blob.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        match key {
            "Range-start" => start = Some(value.to_string()),
            "Range-end" => end = Some(value.to_string()),
            "Sip-address" => sip = Some(value.to_string()),
            "Owner" => owner = Some(value.to_string()),
            "Date-modified" => mdate = Some(parse_mdate(value)?),
            "Signature" => sig = Some(value.to_string()),
            _ => {}
        }
    }

    let missing = |field: &str| RecordError::BadDate(blob.to_string(), format!("missing field '{}'", field));
    return Ok(Record {
        start: start.ok_or_else(|| missing("Range-start"))?,
        end: end.ok_or_else(|| missing("Range-end"))?,
        sip: sip.ok_or_else(|| missing("Sip-address"))?,
        owner: owner.ok_or_else(|| missing("Owner"))?,
        mdate: mdate.ok_or_else(|| missing("Date-modified"))?,
        sig: sig.unwrap_or_default(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::parse_mdate as pm;

    fn sample() -> Record {
        return Record {
            start: "+481000".to_string(),
            end: "+481999".to_string(),
            sip: "sip.acme.example".to_string(),
            owner: "acme".to_string(),
            mdate: pm("2012-01-01T00:00:00").unwrap(),
            sig: "cg== dQ==".to_string(),
        };
    }

    #[test]
    fn blob_roundtrips() {
        let rec = sample();
        let blob = make_blob(&rec);
        let parsed = parse_blob(&blob).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn blob_has_six_lines() {
        let blob = make_blob(&sample());
        assert_eq!(blob.lines().count(), 6);
    }

    #[test]
    fn parse_blob_rejects_missing_field() {
        let blob = "Range-start: +481000\nRange-end: +481999\n";
        assert!(parse_blob(blob).is_err());
    }
}
