//! Capability validation for inbound messages.

use core::fmt;

use crate::ipc::{CapabilityRights, CapabilityToken, EndpointId, Interface, TokenId, TokenTable};
use crate::process::ProcessId;

/// Why a capability check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No token attached.
    MissingToken,
    /// The token was never issued.
    UnknownToken,
    /// The token's channel closed or its holder went away.
    Revoked,
    /// The token is scoped to a different channel endpoint.
    WrongChannel,
    /// The token was issued to a different process.
    WrongHolder,
    /// The token names a different interface.
    WrongInterface,
    /// The token lacks the invoke right.
    MissingRight,
}

impl Rejection {
    /// Short name used in audit details.
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::MissingToken => "missing-token",
            Rejection::UnknownToken => "unknown-token",
            Rejection::Revoked => "revoked",
            Rejection::WrongChannel => "wrong-channel",
            Rejection::WrongHolder => "wrong-holder",
            Rejection::WrongInterface => "wrong-interface",
            Rejection::MissingRight => "missing-right",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks presented tokens against the issued-token table.
pub struct CapabilityValidator<'a> {
    tokens: &'a TokenTable,
}

impl<'a> CapabilityValidator<'a> {
    pub fn new(tokens: &'a TokenTable) -> Self {
        CapabilityValidator { tokens }
    }

    /// Full check of a message sent by `sender` from `endpoint`.
    pub fn check(
        &self,
        token: Option<CapabilityToken>,
        interface: Interface,
        endpoint: EndpointId,
        sender: ProcessId,
    ) -> Result<TokenId, Rejection> {
        let token = token.ok_or(Rejection::MissingToken)?;
        let record = self.tokens.get(token.id()).ok_or(Rejection::UnknownToken)?;

        if record.revoked {
            return Err(Rejection::Revoked);
        }
        if record.endpoint != endpoint {
            return Err(Rejection::WrongChannel);
        }
        if record.holder != sender {
            return Err(Rejection::WrongHolder);
        }
        if record.interface != interface {
            return Err(Rejection::WrongInterface);
        }
        if !record.rights.contains(CapabilityRights::INVOKE) {
            return Err(Rejection::MissingRight);
        }

        Ok(record.id)
    }

    /// Whether `token` authorizes `interface` for `sender` on `endpoint`.
    pub fn validate(
        &self,
        token: CapabilityToken,
        interface: Interface,
        endpoint: EndpointId,
        sender: ProcessId,
    ) -> bool {
        self.check(Some(token), interface, endpoint, sender).is_ok()
    }
}
