//! In-memory [`ObjectStore`] for tests.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::ObjectStore;

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, namespace: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects
            .write()
            .insert((namespace.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .objects
            .read()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_and_namespacing() {
        let store = MemoryObjectStore::new();
        store.put("a", "k", vec![1, 2]).await.unwrap();
        store.put("b", "k", vec![3]).await.unwrap();
        assert_eq!(store.get("a", "k").await.unwrap(), Some(vec![1, 2]));
        assert_eq!(store.get("b", "k").await.unwrap(), Some(vec![3]));
        assert_eq!(store.get("a", "missing").await.unwrap(), None);
        assert_eq!(store.list("a").await.unwrap(), vec!["k".to_string()]);
    }
}
