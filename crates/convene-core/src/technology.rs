//! Finding technologies and the proximity events they emit.
//!
//! A finding technology (synchronized shake, short-range radio, NFC tap) is
//! an external collaborator. All the core ever receives from one is a
//! [`ProximityEvent`]: the shared secret bytes both devices observed and the
//! tag of the technology that produced them.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::FormatError;

/// Out-of-band channel that produced a shared secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technology {
    /// Synchronized motion pattern
    Shake,
    /// Bluetooth low energy exchange
    Bluetooth,
    /// Ultra-wideband ranging
    Uwb,
    /// Near-field tap
    Nfc,
}

impl Technology {
    /// Every supported technology.
    pub const ALL: [Self; 4] = [Self::Shake, Self::Bluetooth, Self::Uwb, Self::Nfc];

    /// Wire name written as `technology_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shake => "shake",
            Self::Bluetooth => "bluetooth",
            Self::Uwb => "uwb",
            Self::Nfc => "nfc",
        }
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Technology {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|t| t.as_str() == s).ok_or_else(|| FormatError::InvalidField {
            collection: crate::store::HANDSHAKES,
            field: "technology_type",
            reason: format!("unknown technology `{s}`"),
        })
    }
}

/// Secret bytes shared by co-located devices.
///
/// Never persisted to the store. Zeroized on drop; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Wrap raw secret bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(<{} bytes redacted>)", self.0.len())
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Output of a finding technology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProximityEvent {
    /// Secret both devices observed
    pub secret: SharedSecret,
    /// Technology that produced it
    pub technology: Technology,
}

impl ProximityEvent {
    /// New event from raw secret bytes.
    pub fn new(secret: impl Into<Vec<u8>>, technology: Technology) -> Self {
        Self { secret: SharedSecret::new(secret), technology }
    }
}
