//! numbex - a federated directory for E.164 telephone number ranges.
//!
//! Carriers publish signed `(range, sip address, owner)` records into a
//! shared, replicated history. Each peer keeps a local transactional store
//! for serving lookups and a replicated store for exchanging updates; a
//! merge engine reconciles divergent peer histories without a central
//! authority.
//!
//! # Quick start
//!
//! ```
//! use numbex::key::generate_key_pair;
//! use numbex::record::Record;
//! use chrono::NaiveDate;
//!
//! let (priv_key, pub_key) = generate_key_pair();
//! let mut rec = Record {
//!     start: "+48581000".to_string(),
//!     end: "+48581999".to_string(),
//!     sip: "sip.freeconet.pl".to_string(),
//!     owner: "freeconet".to_string(),
//!     mdate: NaiveDate::from_ymd_opt(2012, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
//!     sig: String::new(),
//! };
//! rec.sign(&priv_key);
//! assert!(rec.verify([&pub_key]));
//! ```

pub mod config;
pub mod error;
pub mod interfaces;
pub mod interval;
pub mod key;
pub mod merge;
pub mod reconciler;
pub mod record;
pub mod replicated;
pub mod store;
pub mod worker;
