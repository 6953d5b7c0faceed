//! Typed results for the RPC methods the harness relies on

use serde::{Deserialize, Serialize};

/// One entry of `getpeerinfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: u64,
    /// Remote address as `host:port`
    pub addr: String,
    #[serde(default)]
    pub inbound: bool,
    #[serde(default)]
    pub subver: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub startingheight: i64,
}

/// Subset of `getnetworkinfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub version: u64,
    pub subversion: String,
    pub protocolversion: u64,
    pub connections: u64,
    #[serde(default)]
    pub localrelay: bool,
}

/// Second argument of `addnode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddNodeCommand {
    Add,
    Remove,
    OneTry,
}

impl AddNodeCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddNodeCommand::Add => "add",
            AddNodeCommand::Remove => "remove",
            AddNodeCommand::OneTry => "onetry",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_info_tolerates_missing_fields() {
        let info: PeerInfo =
            serde_json::from_str(r#"{"id": 3, "addr": "127.0.0.1:18444", "extra": 1}"#).unwrap();
        assert_eq!(info.id, 3);
        assert!(!info.inbound);
        assert_eq!(info.subver, "");
    }

    #[test]
    fn test_add_node_command_names() {
        assert_eq!(AddNodeCommand::Add.as_str(), "add");
        assert_eq!(AddNodeCommand::OneTry.as_str(), "onetry");
    }
}
