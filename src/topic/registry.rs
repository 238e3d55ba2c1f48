use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Category, SEPARATOR};
use crate::transport::codec;
use crate::utils::error::{DecodeError, RegistrationError};

/// Anything that can travel on a topic.
pub trait TopicPayload: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> TopicPayload for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

type DecodeFn = fn(&[u8]) -> Result<Box<dyn Any + Send>, bincode::Error>;

fn decode_erased<T: TopicPayload>(bytes: &[u8]) -> Result<Box<dyn Any + Send>, bincode::Error> {
    codec::decode::<T>(bytes).map(|value| Box::new(value) as Box<dyn Any + Send>)
}

/// Typed handle to a registered topic.
///
/// Two handles are equal when their names are equal.
pub struct Topic<T> {
    name: Arc<str>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Topic<T> {
    fn new(name: Arc<str>) -> Self {
        Self {
            name,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<T> PartialEq for Topic<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for Topic<T> {}

impl<T> Hash for Topic<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("payload", &type_name::<T>())
            .finish()
    }
}

/// What the registry knows about one topic: its name, category and payload type.
#[derive(Clone)]
pub struct TopicDescriptor {
    name: Arc<str>,
    category: Option<String>,
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn,
}

impl TopicDescriptor {
    fn new<T: TopicPayload>(name: Arc<str>, category: Option<String>) -> Self {
        Self {
            name,
            category,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            decode: decode_erased::<T>,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Deserializes `bytes` as this topic's payload type.
    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send>, DecodeError> {
        (self.decode)(bytes).map_err(|source| DecodeError::Payload {
            topic: self.name.to_string(),
            source,
        })
    }
}

impl fmt::Debug for TopicDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Longest name an envelope can frame.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

fn validate_name(name: &str) -> Result<(), RegistrationError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .split(SEPARATOR)
            .all(|segment| !segment.is_empty() && !segment.chars().any(char::is_whitespace));
    if valid {
        Ok(())
    } else {
        Err(RegistrationError::InvalidTopicName(name.to_string()))
    }
}

/// Collects topic declarations until `build` freezes them into a `TopicRegistry`.
#[derive(Debug, Default)]
pub struct TopicRegistryBuilder {
    topics: HashMap<Arc<str>, TopicDescriptor>,
}

impl TopicRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_topic<T: TopicPayload>(
        &mut self,
        name: impl Into<String>,
    ) -> Result<Topic<T>, RegistrationError> {
        let name = name.into();
        let category = name
            .rsplit_once(SEPARATOR)
            .map(|(parent, _)| parent.to_string());
        self.insert::<T>(name, category)
    }

    /// Declares `leaf` directly under `category`.
    pub fn declare_topic_in<T: TopicPayload>(
        &mut self,
        category: &Category,
        leaf: &str,
    ) -> Result<Topic<T>, RegistrationError> {
        self.insert::<T>(category.topic_name(leaf), Some(category.name()))
    }

    fn insert<T: TopicPayload>(
        &mut self,
        name: String,
        category: Option<String>,
    ) -> Result<Topic<T>, RegistrationError> {
        validate_name(&name)?;
        if self.topics.contains_key(name.as_str()) {
            return Err(RegistrationError::DuplicateTopic(name));
        }

        let name: Arc<str> = name.into();
        self.topics
            .insert(name.clone(), TopicDescriptor::new::<T>(name.clone(), category));
        Ok(Topic::new(name))
    }

    /// Adds every topic of `registry`. Nothing is added if any name collides.
    pub fn include(&mut self, registry: &TopicRegistry) -> Result<(), RegistrationError> {
        if let Some(dup) = registry
            .topics
            .keys()
            .find(|name| self.topics.contains_key(*name))
        {
            return Err(RegistrationError::DuplicateTopic(dup.to_string()));
        }
        for (name, descriptor) in registry.topics.iter() {
            self.topics.insert(name.clone(), descriptor.clone());
        }
        Ok(())
    }

    pub fn build(self) -> TopicRegistry {
        TopicRegistry {
            topics: Arc::new(self.topics),
        }
    }
}

/// Immutable set of declared topics. Cloning shares the same table.
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    topics: Arc<HashMap<Arc<str>, TopicDescriptor>>,
}

impl TopicRegistry {
    pub fn builder() -> TopicRegistryBuilder {
        TopicRegistryBuilder::new()
    }

    pub fn resolve(&self, name: &str) -> Result<&TopicDescriptor, RegistrationError> {
        self.topics
            .get(name)
            .ok_or_else(|| RegistrationError::UnknownTopic(name.to_string()))
    }

    /// Typed lookup by name.
    pub fn topic<T: TopicPayload>(&self, name: &str) -> Result<Topic<T>, RegistrationError> {
        let descriptor = self.resolve(name)?;
        if !descriptor.is::<T>() {
            return Err(RegistrationError::TypeMismatch {
                topic: name.to_string(),
                expected: descriptor.type_name,
                requested: type_name::<T>(),
            });
        }
        Ok(Topic::new(descriptor.name.clone()))
    }

    pub fn contains<T: 'static>(&self, topic: &Topic<T>) -> bool {
        self.topics
            .get(topic.name())
            .is_some_and(|descriptor| descriptor.is::<T>())
    }

    /// Fails unless `topic` was declared in this registry with the same payload type.
    pub fn check<T: 'static>(&self, topic: &Topic<T>) -> Result<(), RegistrationError> {
        let descriptor = self.resolve(topic.name())?;
        if descriptor.is::<T>() {
            Ok(())
        } else {
            Err(RegistrationError::TypeMismatch {
                topic: topic.name().to_string(),
                expected: descriptor.type_name,
                requested: type_name::<T>(),
            })
        }
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &TopicDescriptor> {
        self.topics.values()
    }
}
