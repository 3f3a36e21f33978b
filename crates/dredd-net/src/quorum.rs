//! Deterministic delivery quorum selection.
//!
//! A quorum is a run of consecutive nodes from the sorted relay pool,
//! starting at an offset derived from a hash of the target sigil. Repeated
//! sends to one sigil reuse the same nodes (so its receiver only has to
//! watch those), while different sigils start at different offsets and
//! spread load across the pool.

use dredd_crypto::Hash256;
use dredd_protocol::domain_separation::build_domain_label;
use dredd_protocol::limits::MIN_QUORUM_SIZE;
use dredd_protocol::{RelayAddress, SigilId};

use crate::{NetError, Result};

const QUORUM_PURPOSE: &str = "QUORUM-OFFSET";

/// Ordered set of relay nodes chosen for one target sigil.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryQuorum {
    nodes: Vec<RelayAddress>,
}

impl DeliveryQuorum {
    /// Choose `size` nodes for `identity` from `pool`.
    ///
    /// `size` is raised to [`MIN_QUORUM_SIZE`] and capped at the pool size.
    /// Duplicate pool entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InsufficientRelays`] if the pool holds fewer than
    /// [`MIN_QUORUM_SIZE`] distinct nodes.
    pub fn select(identity: &SigilId, pool: &[RelayAddress], size: usize) -> Result<Self> {
        let mut sorted = pool.to_vec();
        sorted.sort();
        sorted.dedup();

        if sorted.len() < MIN_QUORUM_SIZE {
            return Err(NetError::InsufficientRelays {
                available: sorted.len(),
                required: MIN_QUORUM_SIZE,
            });
        }

        let size = size.clamp(MIN_QUORUM_SIZE, sorted.len());
        let start = (offset_for(identity) % sorted.len() as u64) as usize;

        let nodes = sorted
            .iter()
            .cycle()
            .skip(start)
            .take(size)
            .cloned()
            .collect();

        Ok(Self { nodes })
    }

    /// Selected nodes in delivery order.
    pub fn nodes(&self) -> &[RelayAddress] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a constructed quorum.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn offset_for(identity: &SigilId) -> u64 {
    let label = build_domain_label(QUORUM_PURPOSE, b"");
    let digest = Hash256::hash_many(&[&label[..], identity.as_bytes()]);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}
