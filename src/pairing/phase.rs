/// Pairing progress within one attempt
///
/// Ordered: later phases compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PairingPhase {
    /// Nothing sent yet
    #[default]
    Initial,
    /// Robot handshake sent, waiting for the app's
    AwaitingHandshake,
    /// Robot public key sent, waiting for the connection response
    AwaitingPublicKey,
    /// Nonces sent, waiting for the app to acknowledge them
    AwaitingNonceAck,
    /// Challenge sent over the encrypted channel
    AwaitingChallengeResponse,
    /// Both sides proved they hold the same keys
    ConfirmedSharedSecret,
}

impl PairingPhase {
    /// Whether authenticated commands may run
    #[must_use]
    pub fn is_confirmed(self) -> bool {
        self == Self::ConfirmedSharedSecret
    }
}

impl std::fmt::Display for PairingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initial => "initial",
            Self::AwaitingHandshake => "awaiting-handshake",
            Self::AwaitingPublicKey => "awaiting-public-key",
            Self::AwaitingNonceAck => "awaiting-nonce-ack",
            Self::AwaitingChallengeResponse => "awaiting-challenge-response",
            Self::ConfirmedSharedSecret => "confirmed",
        };
        f.write_str(name)
    }
}

/// Which message path the engine currently speaks on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommsState {
    /// Handshake, key exchange and nonces
    #[default]
    Unencrypted,
    /// Everything after the nonce ack
    Encrypted,
}
