use std::net::SocketAddr;

use bytes::Bytes;
use sha1::{Digest, Sha1};

/// BEP-5 announce tokens.
///
/// A token handed out in a `get_peers` reply proves, when echoed in a
/// later `announce_peer`, that the announcer owns its source address.
/// Tokens are SHA-1 over a rotating secret and the requester's IP, so
/// none need storing; the previous secret stays valid through one
/// rotation.
pub struct TokenSecrets {
    current: [u8; 16],
    previous: [u8; 16],
}

impl TokenSecrets {
    pub fn new() -> Self {
        Self {
            current: rand::random(),
            previous: rand::random(),
        }
    }

    pub fn rotate(&mut self) {
        self.previous = self.current;
        self.current = rand::random();
    }

    pub fn generate(&self, addr: &SocketAddr) -> Bytes {
        derive(&self.current, addr)
    }

    /// Accepts tokens minted from the current or previous secret.
    pub fn validate(&self, addr: &SocketAddr, token: &[u8]) -> bool {
        derive(&self.current, addr) == token || derive(&self.previous, addr) == token
    }
}

impl Default for TokenSecrets {
    fn default() -> Self {
        Self::new()
    }
}

fn derive(secret: &[u8; 16], addr: &SocketAddr) -> Bytes {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    hasher.update(addr.ip().to_string().as_bytes());
    Bytes::copy_from_slice(&hasher.finalize()[..8])
}
