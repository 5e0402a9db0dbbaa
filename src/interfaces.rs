//! External interface contracts (G): the data-transfer surfaces a transport
//! adapter binds to. No transport crate is pulled in here; these traits
//! exist so an adapter crate can implement them against the core without
//! reaching into `store`/`replicated`/`merge` internals.

use chrono::NaiveDateTime;

use crate::error::Error;
use crate::key::PubKey;
use crate::record::Record;

/// The record-exchange surface, mirroring the RPC methods peers call on one
/// another to pull and push ranges and public keys.
pub trait RecordExchange {
    /// Every live record in the local store.
    fn get_all(&self) -> Result<Vec<Record>, Error>;

    /// Every live record changed at or after `since`.
    fn get_since(&self, since: NaiveDateTime) -> Result<Vec<Record>, Error>;

    /// Live records awaiting re-signature (cleared `sig` left by a trim or
    /// split); the caller is expected to re-sign and resubmit them via
    /// [`RecordExchange::receive`].
    fn get_unsigned(&self) -> Result<Vec<Record>, Error>;

    /// Submit a batch of signed records to be applied via the update
    /// algorithm.
    fn receive(&mut self, batch: &[Record]) -> Result<(), Error>;

    /// Every public key registered to `owner`.
    fn get_public_keys(&self, owner: &str) -> Result<Vec<PubKey>, Error>;

    /// Register a public key for `owner`. Returns the key's id.
    fn receive_public_key(&mut self, owner: &str, pem: &str) -> Result<String, Error>;

    /// Remove a registered public key by its id. Returns whether a key was
    /// removed.
    fn remove_public_key(&mut self, keyid: &str) -> Result<bool, Error>;
}

/// The daemon's control-plane surface, mirroring the verbs exposed over its
/// loopback control channel and surfaced by the CLI as subcommands.
pub trait ControlPlane {
    fn p2p_start(&mut self) -> Result<(), Error>;
    fn p2p_stop(&mut self) -> Result<(), Error>;
    fn updater_start(&mut self) -> Result<(), Error>;
    fn updater_stop(&mut self) -> Result<(), Error>;

    /// Force an immediate import from the replicated store.
    fn p2p_import(&mut self) -> Result<(), Error>;
    /// Force an immediate export to the replicated store.
    fn p2p_export(&mut self) -> Result<(), Error>;

    /// A human-readable status snapshot, including the sticky fatal error
    /// if one is set.
    fn status(&self) -> DaemonStatus;

    /// Clear the sticky fatal-error flag, resuming normal scheduling.
    fn clearerrors(&mut self);

    fn shutdown(&mut self) -> Result<(), Error>;
}

/// Snapshot of the daemon's running state, as reported by `status()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    pub p2p_running: bool,
    pub updater_running: bool,
    pub last_error: Option<String>,
}

/// The tri-state response a UDP point-lookup adapter returns for a queried
/// number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResponse {
    /// The number falls inside a known range; routes to this SIP address.
    Found { sip: String, owner: String },
    /// The number is within this directory's managed space but unassigned.
    NotFound,
    /// The number falls outside any range this directory claims.
    OutOfScope,
}

/// The single-operation surface a UDP adapter binds to.
pub trait RangeLookup {
    fn lookup(&self, number: i64) -> Result<LookupResponse, Error>;
}
