use crate::secrets::string::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered pool of API credentials with a shared rotation cursor.
///
/// Callers take a credential with `checkout()` and hand its position back to
/// `advance()` when the provider rejects it for authorization or quota
/// reasons. The cursor is shared, so once one turn finds a key exhausted,
/// concurrent turns skip it too. Two turns rejecting the same key move the
/// cursor once.
#[derive(Debug, Default)]
pub struct CredentialPool {
    keys: Vec<SecretString>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(keys: Vec<SecretString>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Parse a comma- or semicolon-separated key list. Blank entries are dropped.
    ///
    /// ```
    /// use warden_engine::secrets::CredentialPool;
    ///
    /// let pool = CredentialPool::parse(" key-a, ;key-b ");
    /// assert_eq!(pool.len(), 2);
    /// ```
    pub fn parse(raw: &str) -> Self {
        let keys = raw
            .split([',', ';'])
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
            .collect();
        Self::new(keys)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Credential at the cursor, or None when the pool is empty
    pub fn current(&self) -> Option<&SecretString> {
        self.checkout().map(|(_, key)| key)
    }

    /// Cursor position and the credential it points at
    pub fn checkout(&self) -> Option<(usize, &SecretString)> {
        if self.keys.is_empty() {
            return None;
        }
        let position = self.cursor.load(Ordering::Acquire);
        self.keys
            .get(position % self.keys.len())
            .map(|key| (position, key))
    }

    /// Move past the credential checked out at `observed`.
    ///
    /// Returns false when the cursor already moved on, which means another
    /// caller rotated away from the same credential.
    pub fn advance(&self, observed: usize) -> bool {
        if self.keys.is_empty() {
            return false;
        }
        self.cursor
            .compare_exchange(
                observed,
                observed.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
