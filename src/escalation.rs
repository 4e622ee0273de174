//! Credential and privilege-escalation state.
//!
//! The active login user, escalation mode, escalation target and cached
//! secret are owned by an [`EscalationManager`]. Workers never read the
//! manager directly: every dispatch takes an immutable [`EscalationState`]
//! snapshot, so changing the mode mid-run only affects dispatches submitted
//! afterwards.
//!
//! ```rust
//! use fleetexec::escalation::{EscalationManager, EscalationMode};
//!
//! let manager = EscalationManager::new("deploy");
//! let before = manager.snapshot();
//! manager.set_mode(EscalationMode::Sudo);
//!
//! assert_eq!(before.mode, EscalationMode::None);
//! assert_eq!(manager.snapshot().mode, EscalationMode::Sudo);
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

/// Default account escalated to.
pub const DEFAULT_TARGET_USER: &str = "root";

/// How a remote session raises its privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationMode {
    /// Run as the login user
    #[default]
    None,
    /// Per-command `sudo -S`; the secret may be empty for NOPASSWD sudoers
    Sudo,
    /// `su - <target>` login shell on a PTY; always needs the target's password
    Su,
}

impl EscalationMode {
    /// Whether this mode cannot work without a secret.
    pub fn requires_secret(self) -> bool {
        matches!(self, EscalationMode::Su)
    }

    /// Whether commands must be staged as a remote script file.
    pub fn requires_script(self) -> bool {
        matches!(self, EscalationMode::Su)
    }

    /// Whether this mode changes privileges at all.
    pub fn is_none(self) -> bool {
        matches!(self, EscalationMode::None)
    }

    /// Plain string representation
    pub fn as_str(self) -> &'static str {
        match self {
            EscalationMode::None => "none",
            EscalationMode::Sudo => "sudo",
            EscalationMode::Su => "su",
        }
    }
}

impl fmt::Display for EscalationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscalationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(EscalationMode::None),
            "sudo" => Ok(EscalationMode::Sudo),
            "su" => Ok(EscalationMode::Su),
            other => Err(Error::config(format!(
                "unknown raise type '{}', expected none, sudo or su",
                other
            ))),
        }
    }
}

/// A password held in memory.
///
/// Never printed, and wiped when dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Wrap a password
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// Borrow the password text
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// True for a zero-length password
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ZeroizeOnDrop for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// One immutable view of the escalation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationState {
    /// Remote login user
    pub user: String,
    /// Escalation mechanism
    pub mode: EscalationMode,
    /// Account to escalate to
    pub target_user: String,
    /// Cached escalation password
    pub secret: Option<Secret>,
}

impl EscalationState {
    /// State for a plain login with no escalation
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            mode: EscalationMode::None,
            target_user: DEFAULT_TARGET_USER.to_string(),
            secret: None,
        }
    }

    /// Builder-style mode setter
    pub fn with_mode(mut self, mode: EscalationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder-style secret setter
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(Secret::new(secret));
        self
    }

    /// Escalate to `target` instead of root
    pub fn with_target_user(mut self, target: impl Into<String>) -> Self {
        self.target_user = target.into();
        self
    }

    /// Copy of this state with a per-command mode override applied.
    pub fn with_override(&self, mode: Option<EscalationMode>) -> Self {
        let mut state = self.clone();
        if let Some(mode) = mode {
            state.mode = mode;
        }
        state
    }

    /// The secret if one is set and non-empty
    pub fn secret(&self) -> Option<&Secret> {
        self.secret.as_ref().filter(|s| !s.is_empty())
    }

    /// Check the state can be used for a dispatch.
    pub fn validate(&self) -> Result<()> {
        if self.user.trim().is_empty() {
            return Err(Error::config("remote user is not set"));
        }
        if self.mode.is_none() {
            return Ok(());
        }
        if self.target_user.trim().is_empty() {
            return Err(Error::config(format!(
                "raise type '{}' needs a target user",
                self.mode
            )));
        }
        if self.mode.requires_secret() && self.secret().is_none() {
            return Err(Error::config(format!(
                "raise type '{}' needs a password",
                self.mode
            )));
        }
        Ok(())
    }
}

/// Owner of the process-wide escalation settings.
///
/// Every setter swaps in a whole new [`EscalationState`]; readers holding an
/// older snapshot keep seeing the old values.
#[derive(Debug)]
pub struct EscalationManager {
    state: RwLock<Arc<EscalationState>>,
}

impl EscalationManager {
    /// Create a manager for the given login user
    pub fn new(user: impl Into<String>) -> Self {
        Self::from_state(EscalationState::new(user))
    }

    /// Create a manager from a prepared state
    pub fn from_state(state: EscalationState) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut EscalationState)) {
        let mut guard = self.state.write();
        let mut next = EscalationState::clone(&guard);
        apply(&mut next);
        *guard = Arc::new(next);
    }

    /// Replace the login user
    pub fn set_user(&self, user: impl Into<String>) {
        let user = user.into();
        debug!(user = %user, "Setting remote user");
        self.update(|state| state.user = user);
    }

    /// Replace the escalation mode
    pub fn set_mode(&self, mode: EscalationMode) {
        debug!(mode = %mode, "Setting raise type");
        self.update(|state| state.mode = mode);
    }

    /// Replace the escalation target account
    pub fn set_target_user(&self, target: impl Into<String>) {
        let target = target.into();
        debug!(target = %target, "Setting raise target user");
        self.update(|state| state.target_user = target);
    }

    /// Replace the cached secret
    pub fn set_secret(&self, secret: impl Into<String>) {
        let secret = Secret::new(secret);
        debug!("Setting raise password");
        self.update(|state| state.secret = Some(secret));
    }

    /// Forget the cached secret
    pub fn clear_secret(&self) {
        self.update(|state| state.secret = None);
    }

    /// Current settings, frozen.
    pub fn snapshot(&self) -> Arc<EscalationState> {
        Arc::clone(&self.state.read())
    }
}
