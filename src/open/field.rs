//! Openings of GF(2^64) shares with the verification the configured field scheme brings along.
use serde::Deserialize;

use crate::party::error::{MpcError, MpcResult};
use crate::party::Session;
use crate::protocol::SecurityModel;
use crate::share::auth::AuthShare;
use crate::share::{GF2p64, SchemeDescriptor};

use super::{MacCheckMC, MaliciousShamirMC, Messaging, Opening, ShamirMC};

/// How field values are shared among the parties.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldScheme {
    /// Shamir sharing, opened redundantly under malicious security.
    #[default]
    Shamir,
    /// Additive sharing with MACs under the long-term key.
    Mac,
}

/// A batch of field shares in the form of one [FieldScheme].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldShares {
    Shamir(Vec<GF2p64>),
    Authenticated(Vec<AuthShare<GF2p64>>),
}

impl FieldShares {
    pub fn len(&self) -> usize {
        match self {
            FieldShares::Shamir(shares) => shares.len(),
            FieldShares::Authenticated(shares) => shares.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The shares at `range`, in the same form.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        match self {
            FieldShares::Shamir(shares) => FieldShares::Shamir(shares[range].to_vec()),
            FieldShares::Authenticated(shares) => FieldShares::Authenticated(shares[range].to_vec()),
        }
    }
}

/// The field opener of one worker.
pub enum FieldOpener {
    Shamir(ShamirMC),
    MaliciousShamir(MaliciousShamirMC),
    MacCheck(MacCheckMC),
}

impl FieldOpener {
    /// Selects the opener of `field` under `security`, the MAC scheme needs this party's key share.
    pub fn new(
        field: FieldScheme,
        security: SecurityModel,
        messaging: Messaging,
        scheme: &SchemeDescriptor,
        mac_key_share: Option<GF2p64>,
    ) -> MpcResult<Self> {
        match (field, security) {
            (FieldScheme::Shamir, SecurityModel::SemiHonest) => Ok(FieldOpener::Shamir(ShamirMC::new(messaging, scheme))),
            (FieldScheme::Shamir, SecurityModel::Malicious) => {
                Ok(FieldOpener::MaliciousShamir(MaliciousShamirMC::new(messaging, scheme)?))
            }
            (FieldScheme::Mac, _) => {
                let alpha_i = mac_key_share
                    .ok_or_else(|| MpcError::Config("the MAC scheme needs a MAC key share".to_string()))?;
                Ok(FieldOpener::MacCheck(MacCheckMC::new(messaging, alpha_i)))
            }
        }
    }

    pub fn scheme(&self) -> FieldScheme {
        match self {
            FieldOpener::Shamir(_) | FieldOpener::MaliciousShamir(_) => FieldScheme::Shamir,
            FieldOpener::MacCheck(_) => FieldScheme::Mac,
        }
    }

    /// Opens `shares`, which must be in the form of this opener's scheme.
    pub fn popen(&mut self, session: &mut Session, shares: &FieldShares) -> MpcResult<Vec<GF2p64>> {
        match (self, shares) {
            (FieldOpener::Shamir(mc), FieldShares::Shamir(shares)) => mc.popen(session, shares),
            (FieldOpener::MaliciousShamir(mc), FieldShares::Shamir(shares)) => mc.popen(session, shares),
            (FieldOpener::MacCheck(mc), FieldShares::Authenticated(shares)) => mc.popen(session, shares),
            (opener, _) => Err(MpcError::InvalidParameters(format!(
                "shares do not match the {:?} field scheme",
                opener.scheme()
            ))),
        }
    }

    /// Verifies the openings since the last check.
    pub fn check(&mut self, session: &mut Session) -> MpcResult<()> {
        match self {
            FieldOpener::Shamir(mc) => mc.check(session),
            FieldOpener::MaliciousShamir(mc) => mc.check(session),
            FieldOpener::MacCheck(mc) => mc.check(session),
        }
    }
}
