//! Protocol selection policies.

use std::fmt;
use std::str::FromStr;

use crate::error::DispatchError;
use crate::transport::Protocol;

/// How the dispatcher picks a transport for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPolicy {
    /// Use exactly this protocol.
    Explicit(Protocol),
    /// Try protocols in the configured order until one succeeds.
    Fallback,
    /// Guess the protocol from the target string.
    Auto,
}

impl ProtocolPolicy {
    /// Protocols to attempt, in order.
    pub(crate) fn candidates(&self, target: &str, fallback_order: &[Protocol]) -> Vec<Protocol> {
        match self {
            ProtocolPolicy::Explicit(protocol) => vec![*protocol],
            ProtocolPolicy::Fallback => fallback_order.to_vec(),
            ProtocolPolicy::Auto => vec![select_auto(target)],
        }
    }
}

impl fmt::Display for ProtocolPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolPolicy::Explicit(protocol) => write!(f, "{}", protocol),
            ProtocolPolicy::Fallback => f.write_str("fallback"),
            ProtocolPolicy::Auto => f.write_str("auto"),
        }
    }
}

impl FromStr for ProtocolPolicy {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ProtocolPolicy::Auto),
            "fallback" => Ok(ProtocolPolicy::Fallback),
            other => other.parse().map(ProtocolPolicy::Explicit),
        }
    }
}

/// Best-effort protocol guess.
///
/// Anything starting with `http` and longer than the prefix is HTTP, dotted
/// names are RPC hosts, and everything else is a queue topic.
pub fn select_auto(target: &str) -> Protocol {
    if target.starts_with("http") && target.len() > 4 {
        Protocol::Http
    } else if target.contains('.') {
        Protocol::Rpc
    } else {
        Protocol::Queue
    }
}
