use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

/// Process-wide key/value state shared by inline and process nodes.
///
/// Handles are cheap clones of one underlying store; every mutation is
/// serialised through a single mutex. Critical sections never span an await,
/// so the same accessors are safe from cooperative-task code and from
/// synchronous code running inside a node body. Docker nodes never receive a
/// handle; their isolation is the contract.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    storage: Arc<Mutex<Map<String, Value>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state pre-populated from the global config's `shared_state`.
    pub fn with_initial(initial: Map<String, Value>) -> Self {
        Self {
            storage: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn get(&self, key: &str, default: Value) -> Value {
        let storage = self.storage.lock().expect("shared state poisoned");
        storage.get(key).cloned().unwrap_or(default)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        let mut storage = self.storage.lock().expect("shared state poisoned");
        storage.insert(key.into(), value);
    }

    pub fn delete(&self, key: &str) {
        let mut storage = self.storage.lock().expect("shared state poisoned");
        storage.remove(key);
    }

    /// Atomic read-modify-write of one key under the state mutex.
    pub fn update<F>(&self, key: impl Into<String>, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut storage = self.storage.lock().expect("shared state poisoned");
        let key = key.into();
        let next = f(storage.get(&key));
        storage.insert(key, next.clone());
        next
    }

    /// Deep copy of the current contents, suitable for trace inclusion or
    /// printing.
    pub fn snapshot(&self) -> Map<String, Value> {
        let storage = self.storage.lock().expect("shared state poisoned");
        storage.clone()
    }

    // Async variants for cooperative-task code. The lock is never held
    // across a suspension point, so these simply delegate.

    pub async fn get_async(&self, key: &str, default: Value) -> Value {
        self.get(key, default)
    }

    pub async fn set_async(&self, key: impl Into<String>, value: Value) {
        self.set(key, value);
    }

    pub async fn delete_async(&self, key: &str) {
        self.delete(key);
    }

    pub async fn snapshot_async(&self) -> Map<String, Value> {
        self.snapshot()
    }
}
