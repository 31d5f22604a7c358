//! Pairing codes for the iroh transport
//!
//! The phone prints a code; the watch is started with it. A code carries:
//! - a random pairing secret, from which the gossip topic is derived
//! - the phone's endpoint address, used to bootstrap the topic
//!
//! Codes are encoded as `wear-pair:{base58}` strings.

use std::net::SocketAddr;

use iroh::{EndpointAddr, PublicKey, RelayUrl};
use iroh_gossip::proto::TopicId;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Prefix for encoded pairing strings
const PAIRING_PREFIX: &str = "wear-pair:";

/// Current pairing format version
const PAIRING_VERSION: u8 = 1;

/// Domain separation for topic derivation
const TOPIC_CONTEXT: &str = "wearsync 2025 pairing topic";

/// Serializable form of an endpoint address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddrBytes {
    /// Endpoint public key (32 bytes)
    pub node_id: [u8; 32],
    pub relay_url: Option<String>,
    /// Direct socket addresses as strings (e.g., "192.168.1.1:4433")
    pub direct_addresses: Vec<String>,
}

impl NodeAddrBytes {
    pub fn new(node_id: [u8; 32]) -> Self {
        Self {
            node_id,
            relay_url: None,
            direct_addresses: Vec::new(),
        }
    }

    pub fn with_relay(mut self, relay_url: impl Into<String>) -> Self {
        self.relay_url = Some(relay_url.into());
        self
    }

    pub fn with_address(mut self, addr: impl Into<String>) -> Self {
        self.direct_addresses.push(addr.into());
        self
    }

    pub fn from_endpoint_addr(addr: &EndpointAddr) -> Self {
        Self {
            node_id: addr.id.as_bytes().to_owned(),
            relay_url: addr.relay_urls().next().map(|url| url.to_string()),
            direct_addresses: addr.ip_addrs().map(|addr| addr.to_string()).collect(),
        }
    }

    /// Convert back to an iroh EndpointAddr
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidPairing` if the key, relay URL or a socket
    /// address is malformed.
    pub fn to_endpoint_addr(&self) -> SyncResult<EndpointAddr> {
        let public_key = PublicKey::from_bytes(&self.node_id)
            .map_err(|e| SyncError::InvalidPairing(format!("Invalid public key: {}", e)))?;

        let mut addr = EndpointAddr::new(public_key);

        if let Some(ref relay_str) = self.relay_url {
            let relay_url: RelayUrl = relay_str
                .parse()
                .map_err(|e| SyncError::InvalidPairing(format!("Invalid relay URL: {}", e)))?;
            addr = addr.with_relay_url(relay_url);
        }

        for addr_str in &self.direct_addresses {
            let socket_addr: SocketAddr = addr_str.parse().map_err(|e| {
                SyncError::InvalidPairing(format!("Invalid socket address: {}", e))
            })?;
            addr = addr.with_ip_addr(socket_addr);
        }

        Ok(addr)
    }
}

impl From<&EndpointAddr> for NodeAddrBytes {
    fn from(addr: &EndpointAddr) -> Self {
        Self::from_endpoint_addr(addr)
    }
}

/// Everything a watch needs to find its phone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingCode {
    pub version: u8,
    /// Shared secret; never sent anywhere except inside the code
    pub secret: [u8; 32],
    /// The phone's address
    pub phone: NodeAddrBytes,
}

impl PairingCode {
    /// New code with a fresh random secret.
    pub fn generate(phone: NodeAddrBytes) -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self::with_secret(secret, phone)
    }

    /// Code for an existing secret, so a phone keeps its topic across restarts.
    pub fn with_secret(secret: [u8; 32], phone: NodeAddrBytes) -> Self {
        Self {
            version: PAIRING_VERSION,
            secret,
            phone,
        }
    }

    /// Gossip topic shared by the paired devices
    pub fn topic_id(&self) -> TopicId {
        topic_for_secret(&self.secret)
    }

    /// Encode as `wear-pair:{base58}`.
    pub fn encode(&self) -> SyncResult<String> {
        let bytes = postcard::to_stdvec(self).map_err(|e| {
            SyncError::Serialization(format!("Failed to encode pairing code: {}", e))
        })?;
        Ok(format!(
            "{}{}",
            PAIRING_PREFIX,
            bs58::encode(&bytes).into_string()
        ))
    }

    /// Decode a `wear-pair:{base58}` string.
    pub fn decode(s: &str) -> SyncResult<Self> {
        let data = s.trim().strip_prefix(PAIRING_PREFIX).ok_or_else(|| {
            SyncError::InvalidPairing(format!(
                "Invalid prefix: expected '{}', got '{}'",
                PAIRING_PREFIX,
                s.chars().take(12).collect::<String>()
            ))
        })?;

        let bytes = bs58::decode(data)
            .into_vec()
            .map_err(|e| SyncError::InvalidPairing(format!("Invalid base58: {}", e)))?;

        let code: PairingCode = postcard::from_bytes(&bytes)
            .map_err(|e| SyncError::InvalidPairing(format!("Invalid code data: {}", e)))?;

        if code.version != PAIRING_VERSION {
            return Err(SyncError::InvalidPairing(format!(
                "Unsupported version {}",
                code.version
            )));
        }
        Ok(code)
    }
}

/// Derive the gossip topic for a pairing secret.
pub fn topic_for_secret(secret: &[u8; 32]) -> TopicId {
    TopicId::from_bytes(blake3::derive_key(TOPIC_CONTEXT, secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0x01;
        id[31] = 0xFF;
        id
    }

    #[test]
    fn test_pairing_code_roundtrip() {
        let phone = NodeAddrBytes::new(test_node_id())
            .with_relay("https://relay.example.com")
            .with_address("192.168.1.20:4433");
        let code = PairingCode::generate(phone.clone());

        let encoded = code.encode().unwrap();
        assert!(encoded.starts_with(PAIRING_PREFIX));

        let decoded = PairingCode::decode(&encoded).unwrap();
        assert_eq!(decoded, code);
        assert_eq!(decoded.phone, phone);
        assert_eq!(decoded.topic_id(), code.topic_id());
    }

    #[test]
    fn test_topic_depends_on_secret() {
        let phone = NodeAddrBytes::new(test_node_id());
        let a = PairingCode::with_secret([1u8; 32], phone.clone());
        let b = PairingCode::with_secret([2u8; 32], phone.clone());
        let a_again = PairingCode::with_secret([1u8; 32], phone);

        assert_ne!(a.topic_id(), b.topic_id());
        assert_eq!(a.topic_id(), a_again.topic_id());
    }

    #[test]
    fn test_decode_rejects_wrong_prefix() {
        let err = PairingCode::decode("sync-invite:abc").unwrap_err();
        assert!(matches!(err, SyncError::InvalidPairing(_)));
    }

    #[test]
    fn test_decode_rejects_bad_base58() {
        let err = PairingCode::decode("wear-pair:0OIl").unwrap_err();
        assert!(matches!(err, SyncError::InvalidPairing(_)));
    }

    #[test]
    fn test_bad_socket_address_is_invalid_pairing() {
        let addr = NodeAddrBytes::new(test_node_id()).with_address("not an address");
        assert!(matches!(
            addr.to_endpoint_addr(),
            Err(SyncError::InvalidPairing(_))
        ));
    }
}
