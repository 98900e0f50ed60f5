//! Mitigation-scope bodies.
//!
//! Only the fields the session engine and its log output need are modelled;
//! unknown fields are ignored on decode.

use serde::{Deserialize, Serialize};

/// Top-level marker of every mitigation body.
pub const MITIGATION_SCOPE: &str = "ietf-dots-signal-channel:mitigation-scope";

/// Reply to a mitigation read, also pushed as a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationResponse {
    /// Mitigations matching the request.
    #[serde(rename = "ietf-dots-signal-channel:mitigation-scope")]
    pub mitigation_scope: ScopeStatusList,
}

impl MitigationResponse {
    /// Number of mitigations in the body.
    #[must_use]
    pub fn scope_count(&self) -> usize { self.mitigation_scope.scope.len() }
}

/// List wrapper for mitigation status entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeStatusList {
    /// Status entries.
    #[serde(default)]
    pub scope: Vec<ScopeStatus>,
}

/// Status of one mitigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScopeStatus {
    /// Client-assigned mitigation identifier.
    pub mitigation_id: u32,
    /// Targeted prefixes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_prefix: Vec<String>,
    /// Remaining lifetime in seconds.
    pub lifetime: i64,
    /// Mitigation status code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u8>,
    /// Bytes dropped so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_dropped: Option<u64>,
    /// Packets dropped so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkts_dropped: Option<u64>,
}

/// Reply to a mitigation create or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationResponsePut {
    /// Accepted mitigations.
    #[serde(rename = "ietf-dots-signal-channel:mitigation-scope")]
    pub mitigation_scope: PutScopeList,
}

/// List wrapper for accepted mitigations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PutScopeList {
    /// Accepted entries.
    #[serde(default)]
    pub scope: Vec<PutScope>,
}

/// One accepted mitigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PutScope {
    /// Client-assigned mitigation identifier.
    pub mitigation_id: u32,
    /// Granted lifetime in seconds.
    pub lifetime: i64,
    /// Conflict details reported by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_information: Option<ConflictInformation>,
}

/// Conflict details attached to a rejected or adjusted mitigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConflictInformation {
    /// Conflict status.
    pub conflict_status: u8,
    /// Conflict cause.
    pub conflict_cause: u8,
}

/// Mitigation request body, echoed by the server for other methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationRequest {
    /// Requested scopes.
    #[serde(rename = "ietf-dots-signal-channel:mitigation-scope")]
    pub mitigation_scope: RequestScopeList,
}

/// List wrapper for requested scopes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestScopeList {
    /// Requested entries.
    #[serde(default)]
    pub scope: Vec<RequestScope>,
}

/// One requested mitigation scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RequestScope {
    /// Targeted prefixes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_prefix: Vec<String>,
    /// Targeted port ranges.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_port_range: Vec<PortRange>,
    /// Targeted IP protocol numbers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_protocol: Vec<u8>,
    /// Requested lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<i64>,
}

/// Inclusive port range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PortRange {
    /// First port.
    pub lower_port: u16,
    /// Last port, when different from `lower_port`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_port: Option<u16>,
}
