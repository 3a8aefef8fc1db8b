//! Stored AI credential

use parking_lot::RwLock;

use crate::data::AppStateStore;

/// Provider tag recorded alongside every credential issued by login.
pub const HOSTED_PROVIDER: &str = "HOSTED_AI";

const CREDENTIAL_KEY: &str = "ai.credential";
const PROVIDER_KEY: &str = "ai.provider";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub key: String,
    pub provider: String,
}

impl Credential {
    /// A credential issued by the hosted login flow.
    pub fn hosted(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            provider: HOSTED_PROVIDER.to_string(),
        }
    }
}

/// Process-wide credential context shared by all sessions.
pub trait CredentialContext: Send + Sync {
    /// The current credential. Empty or whitespace-only keys count as absent.
    fn get_credential(&self) -> Option<Credential>;

    fn set_credential(&self, credential: Credential);
}

fn usable(credential: Option<Credential>) -> Option<Credential> {
    credential.filter(|c| !c.key.trim().is_empty())
}

/// In-memory credential context.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    current: RwLock<Option<Credential>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            current: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialContext for MemoryCredentials {
    fn get_credential(&self) -> Option<Credential> {
        usable(self.current.read().clone())
    }

    fn set_credential(&self, credential: Credential) {
        *self.current.write() = Some(credential);
    }
}

/// Credential context persisted in the app state table.
pub struct StoredCredentials {
    store: AppStateStore,
    cached: RwLock<Option<Credential>>,
}

impl StoredCredentials {
    /// Load the persisted credential, if any.
    pub fn load(store: AppStateStore) -> Self {
        let cached = match (store.get(CREDENTIAL_KEY), store.get(PROVIDER_KEY)) {
            (Ok(Some(key)), Ok(provider)) => Some(Credential {
                key,
                provider: provider.unwrap_or_else(|| HOSTED_PROVIDER.to_string()),
            }),
            (Ok(None), _) => None,
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(error = %err, "Failed to load stored credential");
                None
            }
        };
        Self {
            store,
            cached: RwLock::new(cached),
        }
    }
}

impl CredentialContext for StoredCredentials {
    fn get_credential(&self) -> Option<Credential> {
        usable(self.cached.read().clone())
    }

    fn set_credential(&self, credential: Credential) {
        if let Err(err) = self
            .store
            .set(CREDENTIAL_KEY, &credential.key)
            .and_then(|()| self.store.set(PROVIDER_KEY, &credential.provider))
        {
            tracing::warn!(error = %err, "Failed to persist credential");
        }
        *self.cached.write() = Some(credential);
    }
}
