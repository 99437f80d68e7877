//! An in-memory `Store`, standing in for the host application's
//! on-disk key/value blob store.

use std::collections::HashMap;

use meshphone_core::{MeshError, Store};

#[derive(Clone, Default)]
pub struct SimStore {
    data: HashMap<(String, String), Vec<u8>>,
}

impl Store for SimStore {
    fn put(&mut self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), MeshError> {
        self.data
            .insert((namespace.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, MeshError> {
        Ok(self
            .data
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), MeshError> {
        self.data.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    fn list(&self, namespace: &str) -> Result<Vec<String>, MeshError> {
        Ok(self
            .data
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, k)| k.clone())
            .collect())
    }
}
