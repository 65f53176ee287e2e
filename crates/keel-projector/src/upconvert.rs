//! Up-conversion of old message shapes
//!
//! A converter turns one contract into a newer one. Converters chain: a
//! message is converted step by step until some projection handles the
//! resulting contract or no converter is left.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Longest converter chain followed for one message
pub const MAX_UPCONVERT_CHAIN: usize = 16;

/// A payload tagged with its contract name
#[derive(Debug, Clone, PartialEq)]
pub struct ContractMessage {
    pub contract_name: String,
    pub payload: serde_json::Value,
}

impl ContractMessage {
    pub fn new(contract_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            contract_name: contract_name.into(),
            payload,
        }
    }
}

/// Converts messages of one source contract
pub trait UpConvert: Send + Sync {
    fn source_contract(&self) -> &str;

    fn convert(&self, payload: serde_json::Value) -> anyhow::Result<ContractMessage>;
}

/// Finds and runs converters
pub trait UpConverterFactory: Send + Sync {
    /// Converter for `contract_name`, if one is registered
    fn create_for(&self, contract_name: &str) -> Option<Arc<dyn UpConvert>>;

    /// Run `converter` on `message`
    fn execute(
        &self,
        converter: &dyn UpConvert,
        message: ContractMessage,
    ) -> anyhow::Result<ContractMessage> {
        converter.convert(message.payload)
    }
}

/// Follow converters from `message` until `accept` matches the contract
///
/// Returns `Ok(None)` when the chain ends without an accepted contract.
pub fn upconvert_until<F>(
    factory: &dyn UpConverterFactory,
    mut message: ContractMessage,
    accept: F,
) -> anyhow::Result<Option<ContractMessage>>
where
    F: Fn(&str) -> bool,
{
    for _ in 0..MAX_UPCONVERT_CHAIN {
        let Some(converter) = factory.create_for(&message.contract_name) else {
            return Ok(None);
        };

        let from = message.contract_name.clone();
        message = factory.execute(converter.as_ref(), message)?;
        tracing::trace!(from = %from, to = %message.contract_name, "Up-converted message");

        if accept(&message.contract_name) {
            return Ok(Some(message));
        }
    }

    anyhow::bail!(
        "up-conversion chain exceeded {} steps at contract '{}'",
        MAX_UPCONVERT_CHAIN,
        message.contract_name
    )
}

struct FnUpConverter<F> {
    source: String,
    convert: F,
}

impl<F> UpConvert for FnUpConverter<F>
where
    F: Fn(serde_json::Value) -> anyhow::Result<ContractMessage> + Send + Sync,
{
    fn source_contract(&self) -> &str {
        &self.source
    }

    fn convert(&self, payload: serde_json::Value) -> anyhow::Result<ContractMessage> {
        (self.convert)(payload)
    }
}

/// Registry of converters keyed by source contract
#[derive(Default)]
pub struct DefaultUpConverterFactory {
    converters: HashMap<String, Arc<dyn UpConvert>>,
}

impl DefaultUpConverterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a converter, replacing any earlier one for the same source
    pub fn register(mut self, converter: Arc<dyn UpConvert>) -> Self {
        self.converters
            .insert(converter.source_contract().to_string(), converter);
        self
    }

    /// Register a typed conversion from `from_contract` to `to_contract`
    pub fn register_fn<Old, New, F>(
        self,
        from_contract: impl Into<String>,
        to_contract: impl Into<String>,
        convert: F,
    ) -> Self
    where
        Old: DeserializeOwned + 'static,
        New: Serialize + 'static,
        F: Fn(Old) -> New + Send + Sync + 'static,
    {
        let to_contract = to_contract.into();
        let converter = FnUpConverter {
            source: from_contract.into(),
            convert: move |payload: serde_json::Value| -> anyhow::Result<ContractMessage> {
                let old: Old = serde_json::from_value(payload)?;
                let new = serde_json::to_value(convert(old))?;
                Ok(ContractMessage::new(to_contract.clone(), new))
            },
        };
        self.register(Arc::new(converter))
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl UpConverterFactory for DefaultUpConverterFactory {
    fn create_for(&self, contract_name: &str) -> Option<Arc<dyn UpConvert>> {
        self.converters.get(contract_name).cloned()
    }
}
