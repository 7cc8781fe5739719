//! Construction of [`Memo`] values, plus the stock presets.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use stash_core::{
    check_identifier, Args, ArrayCodec, BytesCodec, Codec, ComputationDescriptor,
    ComputationFingerprint, ConfigError, JsonCodec, NumericArray, ParamsFingerprint, StashResult,
};
use stash_storage::FeedStore;

use crate::listener::ListenerRegistry;
use crate::memo::{key_prefix, ComputationFn, Memo, ReadHook};
use crate::stats::StatsCounter;

/// Builder for [`Memo`].
///
/// # Example
///
/// ```ignore
/// let (descriptor, body) = computation!("make_bigger", |args: &Args| { ... });
/// let memo = MemoBuilder::json(descriptor, store, body).build()?;
/// let value = memo.call(&Args::new().arg(json!({"a": 10, "b": 3})))?;
/// ```
pub struct MemoBuilder<V> {
    descriptor: ComputationDescriptor,
    computation: ComputationFn<V>,
    store: Arc<dyn FeedStore>,
    identity: ComputationFingerprint,
    params: ParamsFingerprint,
    codec: Option<Box<dyn Codec<V>>>,
    prefer_cache: bool,
    read_hook: Option<ReadHook<V>>,
}

impl<V: 'static> MemoBuilder<V> {
    /// Start a builder with content identity, hashed parameters and
    /// `prefer_cache` on. A codec must be supplied before [`build`](Self::build).
    pub fn new<F>(descriptor: ComputationDescriptor, store: Arc<dyn FeedStore>, computation: F) -> Self
    where
        F: Fn(&Args) -> StashResult<V> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            computation: Box::new(computation),
            store,
            identity: ComputationFingerprint::default(),
            params: ParamsFingerprint::default(),
            codec: None,
            prefer_cache: true,
            read_hook: None,
        }
    }

    pub fn with_identity(mut self, identity: ComputationFingerprint) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_params(mut self, params: ParamsFingerprint) -> Self {
        self.params = params;
        self
    }

    pub fn with_codec<C>(mut self, codec: C) -> Self
    where
        C: Codec<V> + 'static,
    {
        self.codec = Some(Box::new(codec));
        self
    }

    pub fn prefer_cache(mut self, prefer_cache: bool) -> Self {
        self.prefer_cache = prefer_cache;
        self
    }

    pub fn with_read_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&V) + Send + Sync + 'static,
    {
        self.read_hook = Some(Box::new(hook));
        self
    }

    /// Derive the identifier and validate it against the store's delimiter.
    pub fn build(self) -> StashResult<Memo<V>> {
        let codec = self.codec.ok_or_else(|| ConfigError::MissingRequired {
            field: "codec".to_string(),
        })?;
        let delimiter = self.store.delimiter();
        let identifier = self.identity.derive(&self.descriptor);
        check_identifier(&identifier, delimiter)?;

        tracing::debug!(
            name = %self.descriptor.name,
            identifier = %identifier,
            content_type = %codec.content_type(),
            "Built memo"
        );

        Ok(Memo {
            prefix: key_prefix(&identifier, delimiter),
            descriptor: self.descriptor,
            identifier,
            delimiter,
            computation: self.computation,
            store: self.store,
            params: self.params,
            codec,
            prefer_cache: self.prefer_cache,
            read_hook: self.read_hook,
            listeners: ListenerRegistry::default(),
            stats: StatsCounter::default(),
        })
    }
}

impl<V> MemoBuilder<V>
where
    V: Serialize + DeserializeOwned + 'static,
{
    /// JSON documents, content identity.
    pub fn json<F>(descriptor: ComputationDescriptor, store: Arc<dyn FeedStore>, computation: F) -> Self
    where
        F: Fn(&Args) -> StashResult<V> + Send + Sync + 'static,
    {
        Self::new(descriptor, store, computation).with_codec(JsonCodec::<V>::new())
    }
}

impl MemoBuilder<Vec<u8>> {
    /// Raw byte payloads tagged with `content_type`.
    pub fn bytes<F>(
        descriptor: ComputationDescriptor,
        store: Arc<dyn FeedStore>,
        content_type: impl Into<String>,
        computation: F,
    ) -> Self
    where
        F: Fn(&Args) -> StashResult<Vec<u8>> + Send + Sync + 'static,
    {
        Self::new(descriptor, store, computation).with_codec(BytesCodec::new(content_type))
    }

    /// A growing series of byte payloads under a fixed identifier.
    ///
    /// Every call computes and appends to the feed.
    pub fn series<F>(
        identifier: impl Into<String>,
        store: Arc<dyn FeedStore>,
        content_type: impl Into<String>,
        computation: F,
    ) -> Self
    where
        F: Fn(&Args) -> StashResult<Vec<u8>> + Send + Sync + 'static,
    {
        let identifier = identifier.into();
        let descriptor = ComputationDescriptor::new(identifier.clone(), "");
        Self::bytes(descriptor, store, content_type, computation)
            .with_identity(ComputationFingerprint::Literal(identifier))
            .prefer_cache(false)
    }
}

impl MemoBuilder<NumericArray> {
    /// Numeric arrays tagged as tensors.
    pub fn array<F>(descriptor: ComputationDescriptor, store: Arc<dyn FeedStore>, computation: F) -> Self
    where
        F: Fn(&Args) -> StashResult<NumericArray> + Send + Sync + 'static,
    {
        Self::new(descriptor, store, computation).with_codec(ArrayCodec::tensor())
    }

    /// A growing series of numeric arrays under a fixed identifier.
    pub fn array_series<F>(
        identifier: impl Into<String>,
        store: Arc<dyn FeedStore>,
        computation: F,
    ) -> Self
    where
        F: Fn(&Args) -> StashResult<NumericArray> + Send + Sync + 'static,
    {
        let identifier = identifier.into();
        let descriptor = ComputationDescriptor::new(identifier.clone(), "");
        Self::new(descriptor, store, computation)
            .with_codec(ArrayCodec::time_series())
            .with_identity(ComputationFingerprint::Literal(identifier))
            .prefer_cache(false)
    }
}
