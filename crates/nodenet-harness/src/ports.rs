//! Port assignment for node listeners

use std::io;
use std::net::{IpAddr, SocketAddr, TcpListener};

use crate::config::PortAllocation;

/// P2P and RPC port of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePorts {
    pub p2p: u16,
    pub rpc: u16,
}

/// Pick ports for `count` nodes
///
/// Ephemeral ports are found by binding port 0; all probe listeners stay
/// open until every port is chosen so no two nodes get the same one.
pub fn allocate(
    allocation: &PortAllocation,
    host: IpAddr,
    count: usize,
) -> io::Result<Vec<NodePorts>> {
    match *allocation {
        PortAllocation::Base { p2p_base, rpc_base } => (0..count)
            .map(|i| {
                let offset = u16::try_from(i).map_err(io::Error::other)?;
                match (p2p_base.checked_add(offset), rpc_base.checked_add(offset)) {
                    (Some(p2p), Some(rpc)) => Ok(NodePorts { p2p, rpc }),
                    _ => Err(io::Error::other("port range exceeds 65535")),
                }
            })
            .collect(),
        PortAllocation::Ephemeral => {
            let listeners = (0..count * 2)
                .map(|_| TcpListener::bind(SocketAddr::new(host, 0)))
                .collect::<io::Result<Vec<_>>>()?;
            let ports = listeners
                .iter()
                .map(|l| l.local_addr().map(|a| a.port()))
                .collect::<io::Result<Vec<_>>>()?;
            Ok(ports
                .chunks_exact(2)
                .map(|pair| NodePorts {
                    p2p: pair[0],
                    rpc: pair[1],
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_base_ports() {
        let ports = allocate(
            &PortAllocation::Base {
                p2p_base: 18444,
                rpc_base: 18544,
            },
            LOCALHOST,
            3,
        )
        .unwrap();
        assert_eq!(ports[2], NodePorts { p2p: 18446, rpc: 18546 });
    }

    #[test]
    fn test_base_ports_overflow() {
        let result = allocate(
            &PortAllocation::Base {
                p2p_base: 65535,
                rpc_base: 1000,
            },
            LOCALHOST,
            2,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_ephemeral_ports_are_distinct() {
        let ports = allocate(&PortAllocation::Ephemeral, LOCALHOST, 4).unwrap();
        assert_eq!(ports.len(), 4);

        let unique: HashSet<u16> = ports.iter().flat_map(|p| [p.p2p, p.rpc]).collect();
        assert_eq!(unique.len(), 8);
        assert!(!unique.contains(&0));
    }
}
