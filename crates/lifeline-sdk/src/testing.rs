//! Savable types shared by the SDK tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use lifeline_core::{graph, AsNode, NodeHeader, Restore, SaveResult, Savable, Serializer};
use lifeline_store::InMemoryStore;
use parking_lot::RwLock;
use serde_json::{json, Value};

pub fn harness() -> (Arc<InMemoryStore>, Arc<Serializer>) {
    let store = Arc::new(InMemoryStore::new());
    let serializer = Serializer::new(store.clone());
    (store, serializer)
}

pub struct Profile {
    header: NodeHeader,
    name: RwLock<String>,
    level: AtomicI64,
}

impl Profile {
    pub fn new(name: &str, level: i64) -> Arc<Self> {
        Arc::new(Self {
            header: NodeHeader::new(),
            name: RwLock::new(name.to_owned()),
            level: AtomicI64::new(level),
        })
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn level(&self) -> i64 {
        self.level.load(Ordering::SeqCst)
    }

    pub fn set_level(self: &Arc<Self>, level: i64) -> SaveResult<()> {
        self.level.store(level, Ordering::SeqCst);
        graph::invalidate(&self.as_node(), false)
    }
}

impl Savable for Profile {
    fn header(&self) -> &NodeHeader {
        &self.header
    }

    fn save_record(&self) -> SaveResult<Value> {
        Ok(json!({ "name": self.name(), "level": self.level() }))
    }
}

impl Restore for Profile {
    fn restore(value: Value) -> SaveResult<Arc<Self>> {
        let name = value["name"].as_str().unwrap_or_default();
        Ok(Profile::new(name, value["level"].as_i64().unwrap_or_default()))
    }
}
