//! Built-in demo connector.
//!
//! A self-contained plugin triple that synthesizes rows in memory. It keeps
//! the service runnable with no external systems, anchors the default
//! registry, and gives integration tests a real connector to drive. Options:
//! `FRAGMENT-COUNT` (default 3) and `ROWS-PER-FRAGMENT` (default 2).

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use causeway_error::{CausewayError, ErrorCode, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fragment::{Fragment, FragmentMetadata};
use crate::io::Field;
use crate::model::RequestContext;
use crate::plugin::{Accessor, BasePlugin, Fragmenter, Plugin, RawRecord, Resolver};

const DEFAULT_FRAGMENT_COUNT: u32 = 3;
const DEFAULT_ROWS_PER_FRAGMENT: u32 = 2;

fn positive_option(context: &RequestContext, name: &str, default: u32) -> Result<u32> {
    match context.option(name) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u32>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(CausewayError::new(
                ErrorCode::InvalidOptionValue,
                format!("{} must be a positive integer", name),
            )),
        },
    }
}

/// Metadata carried by demo fragments: just the synthetic path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoFragmentMetadata {
    pub path: String,
}

impl DemoFragmentMetadata {
    pub const KIND: &'static str = "demo";

    pub fn decode(value: &Value) -> Result<Box<dyn FragmentMetadata>> {
        let decoded: DemoFragmentMetadata = serde_json::from_value(value.clone())?;
        Ok(Box::new(decoded))
    }
}

impl FragmentMetadata for DemoFragmentMetadata {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn encode(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Splits the data source into a fixed number of synthetic fragments.
#[derive(Debug, Default)]
pub struct DemoFragmenter {
    base: BasePlugin,
}

impl Plugin for DemoFragmenter {
    fn bind(&mut self, context: Arc<RequestContext>) {
        self.base.bind(context);
    }

    fn initialize(&mut self) -> Result<()> {
        self.base.initialize()
    }

    fn is_initialized(&self) -> bool {
        self.base.is_initialized()
    }
}

#[async_trait]
impl Fragmenter for DemoFragmenter {
    async fn fragments(&mut self) -> Result<Vec<Fragment>> {
        let context = self.base.context()?;
        let count = positive_option(context, "FRAGMENT-COUNT", DEFAULT_FRAGMENT_COUNT)?;

        let fragments = (0..count)
            .map(|i| {
                let path = format!("{}#{}", context.data_source, i);
                Fragment::new(
                    context.data_source.clone(),
                    Box::new(DemoFragmentMetadata { path }),
                )
                .with_index(i)
                .with_replicas(vec!["localhost".to_string()])
            })
            .collect();
        Ok(fragments)
    }
}

/// Synthesizes rows for one fragment; counts rows away on write.
#[derive(Debug, Default)]
pub struct DemoAccessor {
    base: BasePlugin,
    rows: VecDeque<RawRecord>,
    written: u64,
}

impl Plugin for DemoAccessor {
    fn bind(&mut self, context: Arc<RequestContext>) {
        self.base.bind(context);
    }

    fn initialize(&mut self) -> Result<()> {
        self.base.initialize()
    }

    fn is_initialized(&self) -> bool {
        self.base.is_initialized()
    }
}

impl DemoAccessor {
    fn fragment_path(context: &RequestContext) -> String {
        context
            .fragment_metadata
            .as_ref()
            .and_then(|meta| meta.as_any().downcast_ref::<DemoFragmentMetadata>())
            .map(|meta| meta.path.clone())
            .unwrap_or_else(|| context.data_source.clone())
    }
}

#[async_trait]
impl Accessor for DemoAccessor {
    async fn open_for_read(&mut self) -> Result<bool> {
        let context = self.base.context()?;
        let rows = positive_option(context, "ROWS-PER-FRAGMENT", DEFAULT_ROWS_PER_FRAGMENT)?;
        let path = Self::fragment_path(context);

        self.rows = (0..rows)
            .map(|i| RawRecord::new(Bytes::from(format!("row{} of {}", i, path))))
            .collect();
        Ok(true)
    }

    async fn read_next(&mut self) -> Result<Option<RawRecord>> {
        Ok(self.rows.pop_front())
    }

    async fn close_for_read(&mut self) -> Result<()> {
        Ok(())
    }

    async fn open_for_write(&mut self) -> Result<bool> {
        self.written = 0;
        Ok(true)
    }

    async fn write_next(&mut self, record: RawRecord) -> Result<bool> {
        tracing::debug!(bytes = record.data.len(), "demo write");
        self.written += 1;
        Ok(true)
    }

    async fn close_for_write(&mut self) -> Result<()> {
        tracing::debug!(records = self.written, "demo write finished");
        Ok(())
    }
}

/// Passes text records through unchanged, one field per record.
#[derive(Debug, Default)]
pub struct DemoTextResolver {
    base: BasePlugin,
}

impl Plugin for DemoTextResolver {
    fn bind(&mut self, context: Arc<RequestContext>) {
        self.base.bind(context);
    }

    fn initialize(&mut self) -> Result<()> {
        self.base.initialize()
    }

    fn is_initialized(&self) -> bool {
        self.base.is_initialized()
    }
}

impl Resolver for DemoTextResolver {
    fn fields(&mut self, record: RawRecord) -> Result<Vec<Field>> {
        Ok(vec![Field::text(
            String::from_utf8_lossy(&record.data).into_owned(),
        )])
    }

    fn make_record(&mut self, fields: Vec<Field>) -> Result<RawRecord> {
        if fields.len() != 1 {
            return Err(CausewayError::new(
                ErrorCode::IterationFailure,
                format!(
                    "demo resolver expects a single text field per record, got {}",
                    fields.len()
                ),
            ));
        }
        match fields.into_iter().next() {
            Some(field) => match field.value {
                crate::io::FieldValue::Text(text) => Ok(RawRecord::new(Bytes::from(text))),
                crate::io::FieldValue::Bytes(bytes) => Ok(RawRecord::new(Bytes::from(bytes))),
                other => Err(CausewayError::new(
                    ErrorCode::IterationFailure,
                    format!("demo resolver expects textual fields, got {:?}", other),
                )),
            },
            None => unreachable!("length checked above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound<P: Plugin>(mut plugin: P, context: RequestContext) -> P {
        plugin.bind(Arc::new(context));
        plugin.initialize().unwrap();
        plugin
    }

    #[tokio::test]
    async fn test_fragmenter_emits_default_fragments() {
        let context = RequestContext {
            data_source: "/data/demo".to_string(),
            ..Default::default()
        };
        let mut fragmenter = bound(DemoFragmenter::default(), context);

        let fragments = fragmenter.fragments().await.unwrap();
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].source_name, "/data/demo");
        assert_eq!(fragments[2].index, Some(2));

        let meta = fragments[1]
            .metadata
            .as_ref()
            .unwrap()
            .as_any()
            .downcast_ref::<DemoFragmentMetadata>()
            .unwrap();
        assert_eq!(meta.path, "/data/demo#1");
    }

    #[tokio::test]
    async fn test_fragment_count_option() {
        let mut context = RequestContext::default();
        context
            .options
            .insert("FRAGMENT-COUNT".to_string(), "5".to_string());
        let mut fragmenter = bound(DemoFragmenter::default(), context);

        assert_eq!(fragmenter.fragments().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_fragment_count_must_be_positive() {
        let mut context = RequestContext::default();
        context
            .options
            .insert("FRAGMENT-COUNT".to_string(), "0".to_string());
        let mut fragmenter = bound(DemoFragmenter::default(), context);

        let err = fragmenter.fragments().await.unwrap_err();
        assert_eq!(err.message, "FRAGMENT-COUNT must be a positive integer");
    }

    #[tokio::test]
    async fn test_accessor_reads_rows_for_bound_fragment() {
        let context = RequestContext {
            data_source: "/data/demo".to_string(),
            fragment_metadata: Some(Box::new(DemoFragmentMetadata {
                path: "/data/demo#1".to_string(),
            })),
            ..Default::default()
        };
        let mut accessor = bound(DemoAccessor::default(), context);

        assert!(accessor.open_for_read().await.unwrap());
        let first = accessor.read_next().await.unwrap().unwrap();
        assert_eq!(&first.data[..], b"row0 of /data/demo#1");

        assert!(accessor.read_next().await.unwrap().is_some());
        assert!(accessor.read_next().await.unwrap().is_none());
        accessor.close_for_read().await.unwrap();
    }

    #[tokio::test]
    async fn test_resolver_round_trip() {
        let mut resolver = bound(DemoTextResolver::default(), RequestContext::default());

        let fields = resolver
            .fields(RawRecord::new(Bytes::from_static(b"a line")))
            .unwrap();
        assert_eq!(fields, vec![Field::text("a line")]);

        let record = resolver.make_record(fields).unwrap();
        assert_eq!(&record.data[..], b"a line");
    }

    #[tokio::test]
    async fn test_resolver_rejects_multi_field_records() {
        let mut resolver = bound(DemoTextResolver::default(), RequestContext::default());
        let err = resolver
            .make_record(vec![Field::text("a"), Field::text("b")])
            .unwrap_err();
        assert!(err.message.contains("single text field"));
    }
}
