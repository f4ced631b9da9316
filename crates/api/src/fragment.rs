//! Fragment model and the polymorphic metadata codec.
//!
//! A fragment's metadata payload is connector-specific: the fragmenter that
//! produced it and the accessor that later consumes it agree on its shape,
//! while the core only round-trips it. Payloads serialize as JSON objects
//! with an embedded `kind` tag; [`MetadataCodec`] maps tags to decoders so
//! new payload types register without the core knowing them in advance.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;

use causeway_error::{CausewayError, ErrorCode, Result};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;

use crate::demo::DemoFragmentMetadata;

/// JSON key carrying the payload type tag.
pub const METADATA_KIND_KEY: &str = "kind";

/// Connector-specific per-fragment payload.
pub trait FragmentMetadata: Debug + Send + Sync {
    /// Stable type tag embedded in the serialized form.
    fn kind(&self) -> &'static str;

    /// Serialize the payload fields (without the tag) to a JSON object.
    fn encode(&self) -> Result<Value>;

    /// Downcasting hook for the consuming accessor.
    fn as_any(&self) -> &dyn Any;
}

/// Payload JSON with the `kind` tag injected.
pub fn tagged_value(metadata: &dyn FragmentMetadata) -> Result<Value> {
    let mut value = metadata.encode()?;
    match value.as_object_mut() {
        Some(object) => {
            object.insert(
                METADATA_KIND_KEY.to_string(),
                Value::String(metadata.kind().to_string()),
            );
            Ok(value)
        }
        None => Err(CausewayError::new(
            ErrorCode::SerializationFailed,
            format!(
                "fragment metadata of kind '{}' must encode to a JSON object",
                metadata.kind()
            ),
        )),
    }
}

type MetadataDecoder = Box<dyn Fn(&Value) -> Result<Box<dyn FragmentMetadata>> + Send + Sync>;

/// Open registry of fragment-metadata payload types, keyed by tag.
#[derive(Default)]
pub struct MetadataCodec {
    decoders: HashMap<String, MetadataDecoder>,
}

impl MetadataCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with the built-in payload types registered.
    pub fn with_defaults() -> Self {
        let mut codec = Self::new();
        codec.register(DemoFragmentMetadata::KIND, DemoFragmentMetadata::decode);
        codec
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, decoder: F)
    where
        F: Fn(&Value) -> Result<Box<dyn FragmentMetadata>> + Send + Sync + 'static,
    {
        self.decoders.insert(kind.into(), Box::new(decoder));
    }

    pub fn encode(&self, metadata: &dyn FragmentMetadata) -> Result<Value> {
        tagged_value(metadata)
    }

    /// Decode a serialized payload back into its concrete type.
    ///
    /// Any failure (not JSON, missing/unknown tag, decoder error) collapses
    /// to one request-level error naming the raw value, since the engine
    /// echoes payloads back verbatim and the raw text is the only useful
    /// diagnostic.
    pub fn decode(&self, raw: &str) -> Result<Box<dyn FragmentMetadata>> {
        self.try_decode(raw).map_err(|cause| {
            tracing::debug!(target: "fragments", %cause, "fragment metadata rejected");
            CausewayError::new(
                ErrorCode::InvalidFragmentMetadata,
                format!("unable to deserialize fragment meta '{}'", raw),
            )
        })
    }

    fn try_decode(&self, raw: &str) -> std::result::Result<Box<dyn FragmentMetadata>, String> {
        let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        let kind = value
            .get(METADATA_KIND_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("missing '{}' tag", METADATA_KIND_KEY))?;
        let decoder = self
            .decoders
            .get(kind)
            .ok_or_else(|| format!("no metadata type registered for kind '{}'", kind))?;
        decoder(&value).map_err(|e| e.to_string())
    }
}

/// One unit of a data source assigned to one segment for reading.
#[derive(Debug)]
pub struct Fragment {
    /// File path / table region / key range this fragment covers.
    pub source_name: String,
    /// Position within the enumeration, when meaningful.
    pub index: Option<u32>,
    /// Hosts holding a replica of the fragment's data.
    pub replicas: Vec<String>,
    pub metadata: Option<Box<dyn FragmentMetadata>>,
    /// Profile override for reading this particular fragment.
    pub profile: Option<String>,
}

impl Fragment {
    pub fn new(source_name: impl Into<String>, metadata: Box<dyn FragmentMetadata>) -> Self {
        Self {
            source_name: source_name.into(),
            index: None,
            replicas: Vec::new(),
            metadata: Some(metadata),
            profile: None,
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_replicas(mut self, replicas: Vec<String>) -> Self {
        self.replicas = replicas;
        self
    }
}

impl Serialize for Fragment {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Fragment", 5)?;
        state.serialize_field("sourceName", &self.source_name)?;
        match self.index {
            Some(index) => state.serialize_field("index", &index)?,
            None => state.skip_field("index")?,
        }
        state.serialize_field("replicas", &self.replicas)?;
        match &self.metadata {
            Some(metadata) => {
                let value =
                    tagged_value(metadata.as_ref()).map_err(serde::ser::Error::custom)?;
                state.serialize_field("metadata", &value)?;
            }
            None => state.skip_field("metadata")?,
        }
        match &self.profile {
            Some(profile) => state.serialize_field("profile", profile)?,
            None => state.skip_field("profile")?,
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_round_trip() {
        let codec = MetadataCodec::with_defaults();
        let original = DemoFragmentMetadata {
            path: "/data/part-0".to_string(),
        };

        let encoded = codec.encode(&original).unwrap();
        assert_eq!(encoded["kind"], "demo");
        assert_eq!(encoded["path"], "/data/part-0");

        let decoded = codec.decode(&encoded.to_string()).unwrap();
        let demo = decoded
            .as_any()
            .downcast_ref::<DemoFragmentMetadata>()
            .expect("demo payload");
        assert_eq!(demo.path, "/data/part-0");
    }

    #[test]
    fn test_decode_garbage_names_the_raw_value() {
        let codec = MetadataCodec::with_defaults();
        let err = codec.decode("so b@d").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFragmentMetadata);
        assert_eq!(err.message, "unable to deserialize fragment meta 'so b@d'");
    }

    #[test]
    fn test_decode_unknown_kind_fails() {
        let codec = MetadataCodec::with_defaults();
        let err = codec.decode(r#"{"kind":"martian"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFragmentMetadata);
        assert_eq!(
            err.message,
            r#"unable to deserialize fragment meta '{"kind":"martian"}'"#
        );
    }

    #[test]
    fn test_decode_missing_tag_fails() {
        let codec = MetadataCodec::with_defaults();
        assert!(codec.decode(r#"{"path":"/data"}"#).is_err());
    }

    #[test]
    fn test_fragment_serialization_shape() {
        let fragment = Fragment::new(
            "/data/file.csv",
            Box::new(DemoFragmentMetadata {
                path: "/data/file.csv#0".to_string(),
            }),
        )
        .with_index(0)
        .with_replicas(vec!["localhost".to_string()]);

        let json = serde_json::to_value(&fragment).unwrap();
        assert_eq!(json["sourceName"], "/data/file.csv");
        assert_eq!(json["index"], 0);
        assert_eq!(json["replicas"][0], "localhost");
        assert_eq!(json["metadata"]["kind"], "demo");
        assert!(json.get("profile").is_none());
    }
}
