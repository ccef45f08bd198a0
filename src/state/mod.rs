//! Per-change consistency token.
//!
//! A `ChangeState` lives in the legacy row's `note_db_state` column and says
//! (a) which store is authoritative for the change and (b) which ref values the
//! notes copy was built from. Comparing (b) against live refs answers "is the
//! notes copy current?" without parsing any commit.

mod wire;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use git2::Oid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{
    CanonJsonError, Change, ChangeId, ChangeKey, RepoName, Timestamp, parse_oid,
    to_canon_json_string,
};
use crate::error::{Effect, Transience};
use crate::refs::{RefCaches, draft_prefix, meta_ref};

use wire::{CURRENT_VERSION, WireState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryStorage {
    Legacy,
    Notes,
}

impl PrimaryStorage {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimaryStorage::Legacy => "legacy",
            PrimaryStorage::Notes => "notes",
        }
    }
}

impl fmt::Display for PrimaryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stored token could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed change state for change {change}: {reason}")]
pub struct MalformedStateError {
    pub change: ChangeId,
    pub reason: String,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateError {
    #[error(transparent)]
    Malformed(#[from] MalformedStateError),
    #[error("no ref cache supplied for repository {0}")]
    MissingRefCache(RepoName),
    #[error("ref read failed: {0}")]
    Git(#[from] git2::Error),
    #[error("state encode failed: {0}")]
    Encode(#[from] CanonJsonError),
}

impl StateError {
    pub fn transience(&self) -> Transience {
        match self {
            StateError::Git(_) => Transience::Unknown,
            _ => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

/// Expected ref values, by repository then ref name.
///
/// A ref that is not recorded is expected to be absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefState(BTreeMap<RepoName, BTreeMap<String, Oid>>);

impl RefState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, repo: &RepoName, name: &str) -> Option<Oid> {
        self.0.get(repo).and_then(|refs| refs.get(name)).copied()
    }

    /// Record `name`; `None` records it as absent (drops any entry).
    pub fn set(&mut self, repo: &RepoName, name: impl Into<String>, value: Option<Oid>) {
        let name = name.into();
        match value {
            Some(oid) => {
                self.0.entry(repo.clone()).or_default().insert(name, oid);
            }
            None => {
                if let Some(refs) = self.0.get_mut(repo) {
                    refs.remove(&name);
                    if refs.is_empty() {
                        self.0.remove(repo);
                    }
                }
            }
        }
    }

    pub fn with(mut self, repo: &RepoName, name: impl Into<String>, value: Option<Oid>) -> Self {
        self.set(repo, name, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RepoName, &str, Oid)> {
        self.0.iter().flat_map(|(repo, refs)| {
            refs.iter()
                .map(move |(name, oid)| (repo, name.as_str(), *oid))
        })
    }

    pub fn repos(&self) -> impl Iterator<Item = &RepoName> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeState {
    version: u32,
    primary: PrimaryStorage,
    refs: Option<RefState>,
    read_only_until: Option<Timestamp>,
    /// Marker commit that made the change notes primary.
    marker: Option<Oid>,
    extra: BTreeMap<String, serde_json::Value>,
}

impl Default for ChangeState {
    fn default() -> Self {
        Self::legacy()
    }
}

impl ChangeState {
    /// Legacy primary, nothing built yet.
    pub fn legacy() -> Self {
        Self {
            version: CURRENT_VERSION,
            primary: PrimaryStorage::Legacy,
            refs: None,
            read_only_until: None,
            marker: None,
            extra: BTreeMap::new(),
        }
    }

    /// Decode the token stored on `change`. `Ok(None)` when no token was ever written.
    pub fn parse(change: &Change) -> Result<Option<Self>, MalformedStateError> {
        match change.note_db_state.as_deref() {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => Self::parse_token(change.id, raw).map(Some),
        }
    }

    pub fn parse_token(change: ChangeId, raw: &str) -> Result<Self, MalformedStateError> {
        let malformed = |reason: String| MalformedStateError { change, reason };
        let wire: WireState =
            serde_json::from_str(raw).map_err(|err| malformed(err.to_string()))?;

        let refs = match wire.refs {
            None => None,
            Some(by_repo) => {
                let mut state = RefState::new();
                for (repo, refs) in by_repo {
                    let repo = RepoName::new(repo).map_err(|err| malformed(err.to_string()))?;
                    for (name, hex) in refs {
                        let oid = parse_oid(&hex).map_err(|err| malformed(err.to_string()))?;
                        state.set(&repo, name, Some(oid));
                    }
                }
                Some(state)
            }
        };
        if wire.primary == PrimaryStorage::Notes && refs.is_none() {
            return Err(malformed("notes primary without ref state".into()));
        }
        let marker = wire
            .marker
            .as_deref()
            .map(parse_oid)
            .transpose()
            .map_err(|err| malformed(err.to_string()))?;

        Ok(Self {
            version: wire.v,
            primary: wire.primary,
            refs,
            read_only_until: wire.read_only_until.map(Timestamp::from_millis),
            marker,
            extra: wire.extra,
        })
    }

    /// The token to act on: a malformed token counts as legacy primary with
    /// nothing built, which forces a rebuild.
    pub fn effective(change: &Change) -> Self {
        match Self::parse(change) {
            Ok(Some(state)) => state,
            Ok(None) => Self::legacy(),
            Err(err) => {
                tracing::warn!(change = %change.id, error = %err, "ignoring malformed change state");
                Self::legacy()
            }
        }
    }

    pub fn to_token(&self) -> Result<String, StateError> {
        let refs = self.refs.as_ref().map(|refs| {
            let mut by_repo: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
            for (repo, name, oid) in refs.iter() {
                by_repo
                    .entry(repo.to_string())
                    .or_default()
                    .insert(name.to_string(), oid.to_string());
            }
            by_repo
        });
        let wire = WireState {
            v: self.version.max(CURRENT_VERSION),
            primary: self.primary,
            refs,
            read_only_until: self.read_only_until.map(Timestamp::as_millis),
            marker: self.marker.map(|oid| oid.to_string()),
            extra: self.extra.clone(),
        };
        Ok(to_canon_json_string(&wire)?)
    }

    pub fn primary(&self) -> PrimaryStorage {
        self.primary
    }

    pub fn ref_state(&self) -> Option<&RefState> {
        self.refs.as_ref()
    }

    pub fn read_only_until(&self) -> Option<Timestamp> {
        self.read_only_until
    }

    /// Fields written by other server versions, preserved on round-trip.
    pub fn extra(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.extra
    }

    pub fn with_primary(&self, primary: PrimaryStorage, refs: RefState) -> Self {
        Self {
            primary,
            refs: Some(refs),
            ..self.clone()
        }
    }

    pub fn with_ref_state(&self, refs: RefState) -> Self {
        Self {
            refs: Some(refs),
            ..self.clone()
        }
    }

    /// Forget the recorded refs so the notes copy counts as stale.
    ///
    /// Only meaningful for legacy-primary changes; a notes-primary token always
    /// carries its refs.
    pub fn without_ref_state(&self) -> Self {
        match self.primary {
            PrimaryStorage::Legacy => Self {
                refs: None,
                ..self.clone()
            },
            PrimaryStorage::Notes => self.clone(),
        }
    }

    /// Notes-primary marker commit recorded at the flip, if any.
    pub fn marker(&self) -> Option<Oid> {
        self.marker
    }

    pub fn with_marker(&self, marker: Option<Oid>) -> Self {
        Self {
            marker,
            ..self.clone()
        }
    }

    pub fn with_read_only_until(&self, until: Option<Timestamp>) -> Self {
        Self {
            read_only_until: until,
            ..self.clone()
        }
    }

    /// Whether a migration lease blocks writers at `now`.
    ///
    /// `skew` widens the lease to absorb clock differences between servers.
    pub fn is_read_only(&self, now: Timestamp, skew: Duration) -> bool {
        match self.read_only_until {
            Some(until) => now < until.saturating_add(skew),
            None => false,
        }
    }

    /// True iff every recorded ref matches the live value seen through `caches`,
    /// the meta ref matches its record (or is absent when unrecorded) and no
    /// unrecorded draft ref exists for the change.
    ///
    /// Needs caches for the change's repository, `All-Users`, and every other
    /// repository the token mentions.
    pub fn is_up_to_date(&self, key: &ChangeKey, caches: &RefCaches<'_>) -> Result<bool, StateError> {
        let Some(refs) = &self.refs else {
            return Ok(false);
        };
        let cache_for = |repo: &RepoName| {
            caches
                .get(repo)
                .ok_or_else(|| StateError::MissingRefCache(repo.clone()))
        };

        let meta = meta_ref(key.id);
        if cache_for(&key.repo)?.get(&meta)? != refs.get(&key.repo, &meta) {
            return Ok(false);
        }

        for (repo, name, expected) in refs.iter() {
            if cache_for(repo)?.get(name)? != Some(expected) {
                return Ok(false);
            }
        }

        let all_users = RepoName::all_users();
        for (name, _) in cache_for(&all_users)?.scan_prefix(&draft_prefix(key.id))? {
            if refs.get(&all_users, &name).is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
