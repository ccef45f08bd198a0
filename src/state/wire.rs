//! Serialized form of [`super::ChangeState`].
//!
//! `{"v":1,"primary":"legacy"|"notes","refs":{repo:{ref:hex}},"read_only_until":ms,"marker":hex}`
//! plus any keys written by other server versions, kept verbatim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::PrimaryStorage;

pub(super) const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WireState {
    /// Absent in tokens written before versioning; read as 0.
    #[serde(default)]
    pub v: u32,
    pub primary: PrimaryStorage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<BTreeMap<String, BTreeMap<String, String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
