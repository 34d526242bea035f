//! Resolving container ports to host ports.
//!
//! Port mappings are fixed when the container starts, so a single snapshot
//! is enough and nothing here retries.

use crate::ledger::error::PortMappingError;
use crate::ledger::runtime::{PortMapping, RuntimeInfo};

/// Whether `address` means "all interfaces".
pub fn is_wildcard(address: &str) -> bool {
    matches!(address, "0.0.0.0" | "::" | "[::]")
}

/// Resolve the host port published for `private_port`.
///
/// Only TCP entries are considered. When the runtime lists several entries
/// for the port (IPv4 and IPv6), the one bound to all interfaces wins.
pub fn resolve_public_port(
    info: &RuntimeInfo,
    private_port: u16,
) -> Result<u16, PortMappingError> {
    let candidates: Vec<&PortMapping> = info
        .ports
        .iter()
        .filter(|m| m.private_port == private_port && m.protocol.eq_ignore_ascii_case("tcp"))
        .collect();

    let mapping = candidates
        .iter()
        .find(|m| m.bound_address.as_deref().is_some_and(is_wildcard))
        .or_else(|| candidates.first())
        .ok_or_else(|| PortMappingError::NoPortMapping {
            container_id: info.id.clone(),
            private_port,
        })?;

    let Some(public_port) = mapping.public_port else {
        return Err(PortMappingError::PortNotPublished {
            container_id: info.id.clone(),
            private_port,
        });
    };

    match mapping.bound_address.as_deref() {
        Some(address) if is_wildcard(address) => Ok(public_port),
        address => Err(PortMappingError::PortBoundToLoopback {
            container_id: info.id.clone(),
            private_port,
            bound_address: address.unwrap_or("<unknown>").to_string(),
        }),
    }
}
