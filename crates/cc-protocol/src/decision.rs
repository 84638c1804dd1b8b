// decision.rs — The four-valued policy verdict.
//
// Every policy engine and gateway reduces its output to one Decision. The
// severity order (allow < warn < require_approval < deny) is the total order
// the aggregator uses to resolve conflicting verdicts deterministically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// A policy verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Proceed.
    Allow,
    /// Proceed, but surface the warnings.
    Warn,
    /// A human with the required role must approve first.
    RequireApproval,
    /// Do not proceed.
    Deny,
}

impl Decision {
    /// All decisions in ascending severity.
    pub const ALL: [Decision; 4] = [
        Decision::Allow,
        Decision::Warn,
        Decision::RequireApproval,
        Decision::Deny,
    ];

    /// Numeric severity: 0=allow, 1=warn, 2=require_approval, 3=deny.
    pub const fn severity(self) -> u8 {
        match self {
            Decision::Allow => 0,
            Decision::Warn => 1,
            Decision::RequireApproval => 2,
            Decision::Deny => 3,
        }
    }

    /// Inverse of [`Decision::severity`].
    pub fn from_severity(severity: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.severity() == severity)
    }

    /// Whether the workflow may continue toward take-off without a human.
    pub fn permits_takeoff(self) -> bool {
        matches!(self, Decision::Allow | Decision::Warn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Warn => "warn",
            Decision::RequireApproval => "require_approval",
            Decision::Deny => "deny",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownValue {
                kind: "decision",
                value: s.to_string(),
            })
    }
}
