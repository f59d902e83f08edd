use crate::core::{Identity, Result as StateResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::RwLock;

/// Error raised by a storage loader; propagated unchanged.
pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

/// Fills the state of an entity that already exists in storage.
///
/// The state passed in is the type's default; a failed load leaves the
/// entity unmaterialized.
pub trait StateLoader<S>: Send + Sync {
    fn load_state(&self, identity: Identity, state: &mut S) -> Result<(), LoaderError>;
}

/// In-memory document store keyed by identity.
///
/// Each document is a JSON value deserialized into the entity state.
#[derive(Debug, Default)]
pub struct DocumentLoader {
    documents: RwLock<HashMap<Identity, serde_json::Value>>,
}

impl DocumentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        identity: Identity,
        document: serde_json::Value,
    ) -> Result<(), LoaderError> {
        let mut documents = self.documents.write().map_err(|e| e.to_string())?;
        documents.insert(identity, document);
        Ok(())
    }

    pub fn insert_state<S: Serialize>(
        &self,
        identity: Identity,
        state: &S,
    ) -> Result<(), LoaderError> {
        let document = serde_json::to_value(state)?;
        self.insert(identity, document)
    }

    pub fn contains(&self, identity: &Identity) -> StateResult<bool> {
        Ok(self.documents.read()?.contains_key(identity))
    }

    pub fn len(&self) -> StateResult<usize> {
        Ok(self.documents.read()?.len())
    }

    pub fn is_empty(&self) -> StateResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl<S> StateLoader<S> for DocumentLoader
where
    S: DeserializeOwned,
{
    fn load_state(&self, identity: Identity, state: &mut S) -> Result<(), LoaderError> {
        let documents = self.documents.read().map_err(|e| e.to_string())?;
        let document = documents
            .get(&identity)
            .ok_or_else(|| format!("no document stored for {identity}"))?;
        *state = S::deserialize(document)?;
        Ok(())
    }
}
