//! Bidirectional key/id converters for map containers.
//!
//! A map stores each entry under an id string derived from its key. The
//! converter for a key type is looked up once, when the map is built, from
//! the [`IdConverters`] registry held by the serializer.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{SaveError, SaveResult};

/// Converts keys of type `K` to ids and back.
pub trait IdConverter<K>: Send + Sync {
    fn to_id(&self, key: &K) -> String;
    fn from_id(&self, id: &str) -> SaveResult<K>;
}

/// Converter for any key with matching `Display` and `FromStr`.
pub struct ParseConverter<K>(PhantomData<fn() -> K>);

impl<K> ParseConverter<K> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<K> Default for ParseConverter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> IdConverter<K> for ParseConverter<K>
where
    K: Display + FromStr,
    K::Err: Display,
{
    fn to_id(&self, key: &K) -> String {
        key.to_string()
    }

    fn from_id(&self, id: &str) -> SaveResult<K> {
        id.parse().map_err(|err: K::Err| SaveError::InvalidKey {
            key: id.to_owned(),
            reason: err.to_string(),
        })
    }
}

/// Registry of key converters, keyed by key type.
pub struct IdConverters {
    converters: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl IdConverters {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            converters: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with converters for `String` and the integer types.
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        macro_rules! register_parse {
            ($($ty:ty),*) => {
                $(registry.register::<$ty>(ParseConverter::<$ty>::new());)*
            };
        }
        register_parse!(String, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
        registry
    }

    /// Register (or replace) the converter for `K`.
    pub fn register<K: 'static>(&self, converter: impl IdConverter<K> + 'static) {
        let converter: Arc<dyn IdConverter<K>> = Arc::new(converter);
        self.converters
            .write()
            .insert(TypeId::of::<K>(), Arc::new(converter));
    }

    /// The converter for `K`, or [`SaveError::MissingConverter`].
    pub fn get<K: 'static>(&self) -> SaveResult<Arc<dyn IdConverter<K>>> {
        self.converters
            .read()
            .get(&TypeId::of::<K>())
            .and_then(|entry| entry.downcast_ref::<Arc<dyn IdConverter<K>>>())
            .cloned()
            .ok_or(SaveError::MissingConverter(type_name::<K>()))
    }

    pub fn contains<K: 'static>(&self) -> bool {
        self.converters.read().contains_key(&TypeId::of::<K>())
    }
}

impl Default for IdConverters {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for IdConverters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdConverters")
            .field("registered", &self.converters.read().len())
            .finish()
    }
}
