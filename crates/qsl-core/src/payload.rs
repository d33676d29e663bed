//! Outbound payload ceilings.

use qsl_protocol::{
    DEFAULT_DEST_IP, IPV6_ADDR_LEN, PAYLOAD_SIZE_LIMIT_IP_HIGH, PAYLOAD_SIZE_LIMIT_IP_LOW,
    PAYLOAD_SIZE_LIMIT_IP_MED, PAYLOAD_SIZE_LIMIT_MNG_HIGH, PAYLOAD_SIZE_LIMIT_MNG_LOW,
    PAYLOAD_SIZE_LIMIT_MNG_MED, WELL_KNOWN_PORT_1, WELL_KNOWN_PORT_8,
};

/// Whether `port` is in the compressible well-known band.
pub fn is_well_known_port(port: u16) -> bool {
    (WELL_KNOWN_PORT_1..=WELL_KNOWN_PORT_8).contains(&port)
}

/// Largest datagram that fits in one frame for this destination.
///
/// Datagrams to the manager (ff02::2) and between well-known ports compress
/// better, leaving more room for payload.
pub fn payload_limit(dest_port: u16, inbox_port: u16, dest_addr: &[u8; IPV6_ADDR_LEN]) -> usize {
    let well_known = usize::from(is_well_known_port(dest_port))
        + usize::from(is_well_known_port(inbox_port));
    let to_manager = *dest_addr == DEFAULT_DEST_IP;

    match (to_manager, well_known) {
        (true, 2) => PAYLOAD_SIZE_LIMIT_MNG_HIGH,
        (true, 1) => PAYLOAD_SIZE_LIMIT_MNG_MED,
        (true, _) => PAYLOAD_SIZE_LIMIT_MNG_LOW,
        (false, 2) => PAYLOAD_SIZE_LIMIT_IP_HIGH,
        (false, 1) => PAYLOAD_SIZE_LIMIT_IP_MED,
        (false, _) => PAYLOAD_SIZE_LIMIT_IP_LOW,
    }
}
