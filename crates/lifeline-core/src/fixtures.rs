//! Hand-written savable types shared by the unit tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use lifeline_path::{PathBuilder, PathKind};
use lifeline_store::InMemoryStore;
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::config::SerializerConfig;
use crate::container::Container;
use crate::error::SaveResult;
use crate::graph;
use crate::list::ObservableList;
use crate::node::{AsNode, NodeHeader, Restore, Savable};
use crate::serializer::Serializer;

pub fn harness() -> (Arc<InMemoryStore>, Arc<Serializer>) {
    harness_with(SerializerConfig::default())
}

pub fn harness_with(config: SerializerConfig) -> (Arc<InMemoryStore>, Arc<Serializer>) {
    let store = Arc::new(InMemoryStore::new());
    let serializer = Serializer::builder(store.clone()).config(config).build();
    (store, serializer)
}

/// An order-sensitive leaf.
pub struct Item {
    header: NodeHeader,
    name: RwLock<String>,
    power: AtomicI64,
}

impl Item {
    pub fn new(name: &str, power: i64) -> Arc<Self> {
        Arc::new(Self {
            header: NodeHeader::new(),
            name: RwLock::new(name.to_owned()),
            power: AtomicI64::new(power),
        })
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn power(&self) -> i64 {
        self.power.load(Ordering::SeqCst)
    }

    pub fn set_power(self: &Arc<Self>, power: i64) {
        self.power.store(power, Ordering::SeqCst);
        graph::invalidate(&self.as_node(), false).expect("invalidate item");
    }
}

impl Savable for Item {
    fn header(&self) -> &NodeHeader {
        &self.header
    }

    fn save_record(&self) -> SaveResult<Value> {
        Ok(json!({ "name": self.name(), "power": self.power() }))
    }
}

impl Restore for Item {
    const ORDERED: bool = true;

    fn restore(value: Value) -> SaveResult<Arc<Self>> {
        let name = value["name"].as_str().unwrap_or_default();
        let power = value["power"].as_i64().unwrap_or_default();
        Ok(Item::new(name, power))
    }
}

/// A root type owning a list of items.
pub struct Player {
    header: NodeHeader,
    gold: AtomicI64,
    separately: bool,
    pub items: Arc<ObservableList<Arc<Item>>>,
}

impl Player {
    pub fn new(id: &str, separately: bool) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Player>| {
            let items = ObservableList::new("items", separately);
            let owner: Weak<dyn Savable> = this.clone();
            items.header().set_parent(owner, PathKind::Collection);
            Self {
                header: NodeHeader::with_id(id),
                gold: AtomicI64::new(0),
                separately,
                items,
            }
        })
    }

    pub fn gold(&self) -> i64 {
        self.gold.load(Ordering::SeqCst)
    }

    pub fn set_gold(self: &Arc<Self>, gold: i64) {
        self.gold.store(gold, Ordering::SeqCst);
        graph::invalidate(&self.as_node(), false).expect("invalidate player");
    }
}

impl Savable for Player {
    fn header(&self) -> &NodeHeader {
        &self.header
    }

    fn save_record(&self) -> SaveResult<Value> {
        let mut record = json!({ "gold": self.gold(), "separately": self.separately });
        if let Some(items) = self.items.inline_value()? {
            record["items"] = items;
        }
        Ok(record)
    }

    fn after_serialize(&self, serializer: &Serializer, path: &mut PathBuilder) -> SaveResult<()> {
        self.items.flush(serializer, path)
    }

    fn after_deserialize(&self, serializer: &Serializer, path: &mut PathBuilder) -> SaveResult<()> {
        self.items.load(serializer, path)
    }

    fn for_each_child(&self, visit: &mut dyn FnMut(&Arc<dyn Savable>)) {
        visit(&self.items.as_node());
    }
}

impl Restore for Player {
    fn restore(value: Value) -> SaveResult<Arc<Self>> {
        let separately = value["separately"].as_bool().unwrap_or_default();
        let player = Player::new("", separately);
        player
            .gold
            .store(value["gold"].as_i64().unwrap_or_default(), Ordering::SeqCst);
        if let Some(items) = value.get("items") {
            player.items.load_inline(items.clone())?;
        }
        Ok(player)
    }
}
