use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

/// A named clipboard shared with the receiving app.
pub trait Pasteboard: Send + Sync {
    fn name(&self) -> String;
    fn set_data(&self, data: &[u8], pasteboard_type: &str) -> bool;
    fn data(&self, pasteboard_type: &str) -> Option<Vec<u8>>;
}

/// Process-local pasteboard with a generated unique name.
pub struct MemoryPasteboard {
    name: String,
    items: Mutex<HashMap<String, Vec<u8>>>,
}

impl Default for MemoryPasteboard {
    fn default() -> Self {
        MemoryPasteboard::named(Uuid::new_v4().to_string())
    }
}

impl MemoryPasteboard {
    pub fn new() -> MemoryPasteboard {
        MemoryPasteboard::default()
    }

    pub fn named(name: impl Into<String>) -> MemoryPasteboard {
        MemoryPasteboard {
            name: name.into(),
            items: Mutex::new(HashMap::new()),
        }
    }

    fn items(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        match self.items.lock() {
            Ok(items) => items,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

impl Pasteboard for MemoryPasteboard {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_data(&self, data: &[u8], pasteboard_type: &str) -> bool {
        self.items()
            .insert(pasteboard_type.to_owned(), data.to_vec());
        true
    }

    fn data(&self, pasteboard_type: &str) -> Option<Vec<u8>> {
        self.items().get(pasteboard_type).cloned()
    }
}
