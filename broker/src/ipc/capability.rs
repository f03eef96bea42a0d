//! Capability tokens.
//!
//! A token grants its holder the right to invoke one [`Interface`] over
//! one channel endpoint. Tokens are issued only by the coordinator and are
//! checked against the coordinator's [`TokenTable`] on use, so a token
//! value that was never issued, or was issued to someone else, is useless.

use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use core::str::FromStr;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::channel::{ChannelId, EndpointId};
use crate::process::ProcessId;

/// Unique token identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TokenId(pub u64);

/// Interfaces a capability can name.
///
/// The set is closed: validation matches on the variant, never on a
/// free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interface {
    /// Network fetches.
    Network,
    /// GPU command submission.
    Gpu,
    /// Persistent storage.
    Storage,
    /// Clipboard read/write.
    Clipboard,
    /// Audio output.
    Audio,
    /// User-chosen file access.
    FileSystem,
    /// Location services.
    Geolocation,
    /// Camera and microphone.
    Media,
}

impl Interface {
    /// Every interface, in declaration order.
    pub const ALL: [Interface; 8] = [
        Interface::Network,
        Interface::Gpu,
        Interface::Storage,
        Interface::Clipboard,
        Interface::Audio,
        Interface::FileSystem,
        Interface::Geolocation,
        Interface::Media,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interface::Network => "network",
            Interface::Gpu => "gpu",
            Interface::Storage => "storage",
            Interface::Clipboard => "clipboard",
            Interface::Audio => "audio",
            Interface::FileSystem => "file-system",
            Interface::Geolocation => "geolocation",
            Interface::Media => "media",
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a name matches no [`Interface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownInterface;

impl FromStr for Interface {
    type Err = UnknownInterface;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interface::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or(UnknownInterface)
    }
}

bitflags! {
    /// Rights carried by a token.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapabilityRights: u32 {
        /// Invoke the interface.
        const INVOKE = 0b0001;
        /// Delegate the interface to another process.
        const DELEGATE = 0b0010;
        /// All rights.
        const ALL = 0b0011;
    }
}

/// Opaque capability token as presented by a process.
///
/// Only the coordinator mints tokens. [`CapabilityToken::from_raw`] exists
/// for values read back off a wire; such a value carries no authority
/// until the token table confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityToken(TokenId);

impl CapabilityToken {
    pub(crate) fn new(id: TokenId) -> Self {
        CapabilityToken(id)
    }

    /// Reconstruct a token from its raw value.
    pub fn from_raw(raw: u64) -> Self {
        CapabilityToken(TokenId(raw))
    }

    /// Token id.
    pub fn id(&self) -> TokenId {
        self.0
    }

    /// Raw value.
    pub fn raw(&self) -> u64 {
        self.0 .0
    }
}

/// Coordinator-side record of an issued token.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    /// Token id.
    pub id: TokenId,
    /// Interface the token names.
    pub interface: Interface,
    /// Rights granted.
    pub rights: CapabilityRights,
    /// Process the token was issued to.
    pub holder: ProcessId,
    /// Endpoint the token is scoped to.
    pub endpoint: EndpointId,
    /// Token this one was delegated or derived from.
    pub parent: Option<TokenId>,
    /// Tokens delegated or derived from this one.
    pub children: Vec<TokenId>,
    /// Whether the token has been revoked.
    pub revoked: bool,
}

impl TokenRecord {
    /// Live and carrying `rights`.
    pub fn grants(&self, rights: CapabilityRights) -> bool {
        !self.revoked && self.rights.contains(rights)
    }
}

/// Table of every token the coordinator has issued.
///
/// Revoked tokens stay in the table so that later use can be reported as
/// revoked rather than unknown.
#[derive(Debug)]
pub struct TokenTable {
    tokens: HashMap<TokenId, TokenRecord>,
    next_id: u64,
}

impl Default for TokenTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenTable {
    /// Create an empty table.
    pub fn new() -> Self {
        TokenTable {
            tokens: HashMap::new(),
            next_id: 1,
        }
    }

    /// Issue a token.
    pub fn issue(
        &mut self,
        interface: Interface,
        rights: CapabilityRights,
        holder: ProcessId,
        endpoint: EndpointId,
        parent: Option<TokenId>,
    ) -> CapabilityToken {
        let id = TokenId(self.next_id);
        self.next_id += 1;

        if let Some(parent) = parent.and_then(|p| self.tokens.get_mut(&p)) {
            parent.children.push(id);
        }

        self.tokens.insert(
            id,
            TokenRecord {
                id,
                interface,
                rights,
                holder,
                endpoint,
                parent,
                children: Vec::new(),
                revoked: false,
            },
        );

        CapabilityToken::new(id)
    }

    /// Look up a token.
    pub fn get(&self, id: TokenId) -> Option<&TokenRecord> {
        self.tokens.get(&id)
    }

    /// Find a live token held by `holder` for `interface` carrying `rights`.
    ///
    /// The oldest matching token wins so repeated lookups are stable.
    pub fn find_live(
        &self,
        holder: ProcessId,
        interface: Interface,
        rights: CapabilityRights,
    ) -> Option<&TokenRecord> {
        self.tokens
            .values()
            .filter(|t| t.holder == holder && t.interface == interface && t.grants(rights))
            .min_by_key(|t| t.id)
    }

    /// Live tokens held by a process.
    pub fn held_by(&self, holder: ProcessId) -> Vec<&TokenRecord> {
        let mut held: Vec<&TokenRecord> = self
            .tokens
            .values()
            .filter(|t| t.holder == holder && !t.revoked)
            .collect();
        held.sort_by_key(|t| t.id);
        held
    }

    /// Revoke one token. Returns false if it was unknown or already revoked.
    pub fn revoke(&mut self, id: TokenId) -> bool {
        match self.tokens.get_mut(&id) {
            Some(t) if !t.revoked => {
                t.revoked = true;
                true
            }
            _ => false,
        }
    }

    /// Revoke a token and everything delegated or derived from it.
    ///
    /// Returns the ids that changed state.
    pub fn revoke_tree(&mut self, id: TokenId) -> Vec<TokenId> {
        let mut revoked = Vec::new();
        let mut pending = alloc::vec![id];

        while let Some(next) = pending.pop() {
            if self.revoke(next) {
                revoked.push(next);
            }
            if let Some(t) = self.tokens.get(&next) {
                pending.extend(t.children.iter().copied());
            }
        }

        revoked
    }

    /// Revoke every token scoped to either end of `channel`.
    pub fn revoke_channel(&mut self, channel: ChannelId) -> Vec<TokenId> {
        let mut revoked: Vec<TokenId> = self
            .tokens
            .values_mut()
            .filter(|t| t.endpoint.channel == channel && !t.revoked)
            .map(|t| {
                t.revoked = true;
                t.id
            })
            .collect();
        revoked.sort();
        revoked
    }

    /// Number of live tokens.
    pub fn live_count(&self) -> usize {
        self.tokens.values().filter(|t| !t.revoked).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::channel::Side;

    fn endpoint(channel: u64) -> EndpointId {
        EndpointId::new(ChannelId(channel), Side::B)
    }

    #[test]
    fn test_interface_names_round_trip() {
        for interface in Interface::ALL {
            assert_eq!(interface.as_str().parse::<Interface>(), Ok(interface));
        }
        assert_eq!("webusb".parse::<Interface>(), Err(UnknownInterface));
    }

    #[test]
    fn test_issue_and_find() {
        let mut table = TokenTable::new();
        let pid = ProcessId(3);
        let token = table.issue(
            Interface::Network,
            CapabilityRights::ALL,
            pid,
            endpoint(1),
            None,
        );

        let found = table
            .find_live(pid, Interface::Network, CapabilityRights::DELEGATE)
            .unwrap();
        assert_eq!(found.id, token.id());
        assert!(table
            .find_live(pid, Interface::Gpu, CapabilityRights::INVOKE)
            .is_none());
        assert!(table
            .find_live(ProcessId(4), Interface::Network, CapabilityRights::INVOKE)
            .is_none());
    }

    #[test]
    fn test_rights_are_respected() {
        let mut table = TokenTable::new();
        let pid = ProcessId(3);
        table.issue(
            Interface::Storage,
            CapabilityRights::INVOKE,
            pid,
            endpoint(1),
            None,
        );
        assert!(table
            .find_live(pid, Interface::Storage, CapabilityRights::DELEGATE)
            .is_none());
    }

    #[test]
    fn test_revoke_tree_follows_children() {
        let mut table = TokenTable::new();
        let root = table.issue(
            Interface::Network,
            CapabilityRights::ALL,
            ProcessId(1),
            endpoint(1),
            None,
        );
        let child = table.issue(
            Interface::Network,
            CapabilityRights::ALL,
            ProcessId(2),
            endpoint(2),
            Some(root.id()),
        );
        let grandchild = table.issue(
            Interface::Network,
            CapabilityRights::INVOKE,
            ProcessId(3),
            endpoint(3),
            Some(child.id()),
        );

        let revoked = table.revoke_tree(root.id());
        assert_eq!(revoked.len(), 3);
        assert!(table.get(grandchild.id()).unwrap().revoked);
        assert_eq!(table.live_count(), 0);

        // Second pass changes nothing.
        assert!(table.revoke_tree(root.id()).is_empty());
    }

    #[test]
    fn test_revoke_channel_only_touches_that_channel() {
        let mut table = TokenTable::new();
        let a = table.issue(
            Interface::Gpu,
            CapabilityRights::ALL,
            ProcessId(1),
            endpoint(7),
            None,
        );
        let b = table.issue(
            Interface::Gpu,
            CapabilityRights::ALL,
            ProcessId(1),
            endpoint(8),
            None,
        );

        assert_eq!(table.revoke_channel(ChannelId(7)), alloc::vec![a.id()]);
        assert!(!table.get(b.id()).unwrap().revoked);
    }
}
