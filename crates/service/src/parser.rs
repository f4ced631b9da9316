//! Protocol header parsing.
//!
//! Every request arrives with its whole description in `X-CW-*` headers:
//! identity, schema, plugin selection, wire format, fragment coordinates.
//! The parser decodes them into one immutable [`RequestContext`]; anything
//! malformed fails the request here, before any plugin is constructed.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use causeway_api::utilities::{
    is_true_lenient, mask_non_printables, parse_bool_strict, percent_decode,
};
use causeway_api::{ColumnDescriptor, MetadataCodec, OutputFormat, RequestContext, RequestType};
use causeway_error::{CausewayError, ErrorCode, ErrorContext, Result};

use crate::alignment::{self, AlignmentHint};
use crate::config::PluginConf;
use crate::handlers::HandlerRegistry;

/// Namespace prefix of the protocol headers, as normalized by the HTTP
/// layer (header names are lowercase by construction).
const HEADER_PREFIX: &str = "x-cw-";

const OPTIONS_PREFIX: &str = "OPTIONS-";
const ENCODED_HEADER_VALUES: &str = "ENCODED-HEADER-VALUES";

/// Case-insensitive view of one request's protocol headers.
///
/// Keys are uppercased with the namespace prefix stripped, values decoded
/// lossily to UTF-8. Duplicate case-variant keys collapse silently to the
/// last occurrence; the engine never sends meaningful duplicates and this
/// quirk is long-standing protocol behavior.
#[derive(Debug, Default)]
struct RequestMap {
    entries: HashMap<String, String>,
}

impl RequestMap {
    fn from_headers(headers: &HeaderMap) -> Self {
        let mut entries = HashMap::new();
        for (name, value) in headers {
            if let Some(key) = name.as_str().strip_prefix(HEADER_PREFIX) {
                entries.insert(
                    key.to_ascii_uppercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                );
            }
        }
        Self { entries }
    }

    /// Apply the transport decoding the engine announced, then drop the
    /// announcement itself. Values stay verbatim unless the flag is a
    /// case-insensitive `true`.
    fn decode_values(&mut self) -> Result<()> {
        let encoded = self
            .entries
            .remove(ENCODED_HEADER_VALUES)
            .map(|value| is_true_lenient(&value))
            .unwrap_or(false);
        if !encoded {
            return Ok(());
        }
        for value in self.entries.values_mut() {
            *value = percent_decode(value)?;
        }
        Ok(())
    }

    /// Remove and return every `OPTIONS-*` entry keyed by option name.
    /// Empty option values are preserved; an option can be deliberately
    /// set to the empty string.
    fn drain_options(&mut self) -> HashMap<String, String> {
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(OPTIONS_PREFIX))
            .cloned()
            .collect();
        let mut options = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.entries.remove(&key) {
                options.insert(key[OPTIONS_PREFIX.len()..].to_string(), value);
            }
        }
        options
    }

    /// Remove a property; blank values count as absent.
    fn take(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_uppercase())
            .filter(|value| !value.trim().is_empty())
    }

    fn take_required(&mut self, name: &str) -> Result<String> {
        self.take(name).ok_or_else(|| missing_property(name))
    }
}

/// Decodes the protocol headers of one request into a [`RequestContext`].
///
/// One instance serves the whole process; per-request state lives entirely
/// in the arguments and the returned context.
pub struct RequestParser {
    profiles: Arc<dyn PluginConf>,
    handlers: Arc<HandlerRegistry>,
    codec: Arc<MetadataCodec>,
    alignment: AlignmentHint,
}

impl RequestParser {
    pub fn new(
        profiles: Arc<dyn PluginConf>,
        handlers: Arc<HandlerRegistry>,
        codec: Arc<MetadataCodec>,
    ) -> Self {
        Self {
            profiles,
            handlers,
            codec,
            alignment: alignment::process_hint(),
        }
    }

    /// Publish the alignment to a private slot instead of the process-wide
    /// one, mainly for tests.
    pub fn with_alignment_hint(mut self, hint: AlignmentHint) -> Self {
        self.alignment = hint;
        self
    }

    pub fn parse(&self, headers: &HeaderMap, request_type: RequestType) -> Result<RequestContext> {
        let mut map = RequestMap::from_headers(headers);
        map.decode_values()?;

        let mut options = map.drain_options();

        // the profile may inject plugin identifiers into the options, so it
        // resolves before the typed options are consumed
        let profile = take_option(&mut options, "PROFILE").map(|p| p.to_lowercase());
        let mut configuration = HashMap::new();
        let mut profile_scheme = None;
        if let Some(profile) = profile.as_deref() {
            self.apply_profile(profile, &mut options, &mut configuration)?;
            profile_scheme = self.profiles.protocol(profile).map(str::to_string);
        }

        let fragmenter = take_option(&mut options, "FRAGMENTER");
        let accessor = take_option(&mut options, "ACCESSOR").unwrap_or_default();
        let resolver = take_option(&mut options, "RESOLVER").unwrap_or_default();
        let server_name =
            take_option(&mut options, "SERVER").unwrap_or_else(|| "default".to_string());
        let thread_safe_override = take_option(&mut options, "THREAD-SAFE")
            .map(|value| parse_bool_strict(&value))
            .transpose()?;
        let stats_sample_ratio = take_option(&mut options, "STATS-SAMPLE-RATIO")
            .map(|value| parse_number::<f32>("STATS-SAMPLE-RATIO", &value))
            .transpose()?;
        let stats_max_fragments = take_option(&mut options, "STATS-MAX-FRAGMENTS")
            .map(|value| parse_number::<i64>("STATS-MAX-FRAGMENTS", &value))
            .transpose()?;
        let stats_max_fragments = validate_stats(stats_sample_ratio, stats_max_fragments)?;
        let format =
            take_option(&mut options, "FORMAT").or_else(|| infer_format(profile.as_deref()));

        let alignment = map.take_required("ALIGNMENT")?;
        let segment_id = parse_number("SEGMENT-ID", &map.take_required("SEGMENT-ID")?)?;
        let total_segments = parse_number("SEGMENT-COUNT", &map.take_required("SEGMENT-COUNT")?)?;
        let transaction_id = map.take_required("XID")?;
        let output_format = OutputFormat::parse(&map.take_required("FORMAT")?)?;
        let host = map.take_required("URL-HOST")?;
        let port = parse_number("URL-PORT", &map.take_required("URL-PORT")?)?;
        let data_source = map.take_required("DATA-DIR")?;
        let has_filter = parse_number::<i32>("HAS-FILTER", &map.take_required("HAS-FILTER")?)? != 0;
        let filter = if has_filter {
            Some(map.take_required("FILTER")?)
        } else {
            None
        };
        let user = map.take_required("USER")?;
        let columns = parse_columns(&mut map)?;

        let fragment_index = map
            .take("FRAGMENT-INDEX")
            .map(|value| parse_number::<u32>("FRAGMENT-INDEX", &value))
            .transpose()?;
        let fragment_metadata = map
            .take("FRAGMENT-METADATA")
            .map(|raw| self.codec.decode(&raw))
            .transpose()?;
        let last_fragment = map
            .take("LAST-FRAGMENT")
            .map(|value| parse_bool_strict(&value))
            .transpose()?
            .unwrap_or(false);

        self.alignment.publish(&alignment);

        let mut context = RequestContext {
            request_type,
            transaction_id,
            segment_id,
            total_segments,
            user,
            host,
            port,
            data_source,
            server_name,
            profile,
            profile_scheme,
            fragmenter,
            accessor,
            resolver,
            columns,
            filter,
            output_format,
            format,
            options,
            configuration,
            thread_safe_override,
            stats_sample_ratio,
            stats_max_fragments,
            fragment_index,
            fragment_metadata,
            last_fragment,
        };

        self.apply_handler(&mut context)?;
        validate_plugins(&context)?;

        tracing::debug!(
            target: "parser",
            request = %context.request_type,
            segment = context.segment_id,
            source = %mask_non_printables(&context.data_source),
            "request parsed"
        );
        Ok(context)
    }

    /// Fold the named profile into the request: profile plugins fill unset
    /// identifiers (an explicit duplicate is a collision), option mappings
    /// copy matching option values into the configuration bridge.
    fn apply_profile(
        &self,
        profile: &str,
        options: &mut HashMap<String, String>,
        configuration: &mut HashMap<String, String>,
    ) -> Result<()> {
        if let Some(plugins) = self.profiles.plugins(profile) {
            let mut collisions: Vec<String> = plugins
                .keys()
                .filter(|key| options.contains_key(&key.to_ascii_uppercase()))
                .map(|key| key.to_lowercase())
                .collect();
            if !collisions.is_empty() {
                collisions.sort();
                return Err(CausewayError::new(
                    ErrorCode::ProfileCollision,
                    format!(
                        "Profile '{}' already defines: [{}]",
                        profile,
                        collisions.join(", ")
                    ),
                )
                .with_context(ErrorContext::ProfileCollision {
                    profile: profile.to_string(),
                    colliding_keys: collisions,
                })
                .with_hint("Remove the explicit option or use a profile that does not set it"));
            }
            for (key, value) in plugins {
                options.insert(key.to_ascii_uppercase(), value.clone());
            }
        }

        if let Some(mappings) = self.profiles.option_mappings(profile) {
            for (option, property) in mappings {
                if property.is_empty() {
                    continue;
                }
                if let Some(value) = options.get(&option.to_ascii_uppercase()) {
                    configuration.insert(property.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    /// Give the profile's protocol handler, when it names one, a chance to
    /// re-route the request to different plugins.
    fn apply_handler(&self, context: &mut RequestContext) -> Result<()> {
        let Some(profile) = context.profile.as_deref() else {
            return Ok(());
        };
        let Some(id) = self.profiles.handler(profile) else {
            return Ok(());
        };

        let handler = self.handlers.construct(id)?;
        if let Some(fragmenter) = handler.fragmenter(context) {
            context.fragmenter = Some(fragmenter);
        }
        if let Some(accessor) = handler.accessor(context) {
            context.accessor = accessor;
        }
        if let Some(resolver) = handler.resolver(context) {
            context.resolver = resolver;
        }
        Ok(())
    }
}

/// Consume a typed option out of the free-form namespace. Blank values
/// count as absent but are still consumed.
fn take_option(options: &mut HashMap<String, String>, name: &str) -> Option<String> {
    options
        .remove(name)
        .filter(|value| !value.trim().is_empty())
}

/// A profile named `proto:fmt` implies the data sub-format when the
/// request does not choose one explicitly.
fn infer_format(profile: Option<&str>) -> Option<String> {
    profile?
        .split_once(':')
        .map(|(_, format)| format.to_string())
        .filter(|format| !format.is_empty())
}

fn missing_property(name: &str) -> CausewayError {
    CausewayError::new(
        ErrorCode::MissingProperty,
        format!("Property {} has no value in the current request", name),
    )
    .with_context(ErrorContext::MissingProperty {
        property: name.to_string(),
    })
}

/// Numeric property parsing. The underlying parse error stays in the
/// message so the engine-side operator sees exactly what was rejected.
fn parse_number<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        CausewayError::new(
            ErrorCode::InvalidOptionValue,
            format!("invalid {} value '{}': {}", name, value, e),
        )
        .with_context(ErrorContext::InvalidOption {
            option: name.to_string(),
            value: value.to_string(),
        })
    })
}

/// The two sampling options travel as a pair; one without the other is a
/// malformed request.
fn validate_stats(ratio: Option<f32>, max_fragments: Option<i64>) -> Result<Option<u32>> {
    match (ratio, max_fragments) {
        (None, None) => Ok(None),
        (Some(ratio), Some(max_fragments)) => {
            if !(0.0001f32..=1.0).contains(&ratio) {
                return Err(CausewayError::new(
                    ErrorCode::InvalidOptionValue,
                    format!(
                        "STATS-SAMPLE-RATIO must be between 0.0001 and 1.0, got {}",
                        ratio
                    ),
                ));
            }
            if max_fragments <= 0 {
                return Err(CausewayError::new(
                    ErrorCode::InvalidOptionValue,
                    format!(
                        "STATS-MAX-FRAGMENTS must be a positive integer, got {}",
                        max_fragments
                    ),
                ));
            }
            Ok(Some(max_fragments as u32))
        }
        _ => Err(CausewayError::new(
            ErrorCode::InvalidOptionValue,
            "STATS-SAMPLE-RATIO and STATS-MAX-FRAGMENTS must be set together",
        )),
    }
}

fn parse_columns(map: &mut RequestMap) -> Result<Vec<ColumnDescriptor>> {
    // a non-positive count means "no schema attached", not an error
    let count: i32 = parse_number("ATTRS", &map.take_required("ATTRS")?)?;
    let mut columns = Vec::new();
    for i in 0..count {
        let name = map.take_required(&format!("ATTR-NAME{}", i))?;
        let code_key = format!("ATTR-TYPECODE{}", i);
        let type_code = parse_number(&code_key, &map.take_required(&code_key)?)?;
        let type_name = map.take_required(&format!("ATTR-TYPENAME{}", i))?;
        let type_modifiers = parse_type_modifiers(map, i)?;
        columns.push(ColumnDescriptor {
            name,
            type_code,
            type_name,
            type_modifiers,
        });
    }
    Ok(columns)
}

fn parse_type_modifiers(map: &mut RequestMap, column: i32) -> Result<Vec<i32>> {
    let count_key = format!("ATTR-TYPEMOD{}-COUNT", column);
    let Some(raw_count) = map.take(&count_key) else {
        return Ok(Vec::new());
    };

    let count: i32 = raw_count.trim().parse().map_err(|_| {
        CausewayError::new(
            ErrorCode::InvalidOptionValue,
            format!("{} must be an integer", count_key),
        )
    })?;
    if count < 0 {
        return Err(CausewayError::new(
            ErrorCode::InvalidOptionValue,
            format!("{} must be a positive integer", count_key),
        ));
    }

    let mut modifiers = Vec::new();
    for j in 0..count {
        let key = format!("ATTR-TYPEMOD{}-{}", column, j);
        let raw = map.take_required(&key)?;
        let modifier = raw.trim().parse().map_err(|_| {
            CausewayError::new(
                ErrorCode::InvalidOptionValue,
                format!("{} must be an integer", key),
            )
        })?;
        modifiers.push(modifier);
    }
    Ok(modifiers)
}

fn validate_plugins(context: &RequestContext) -> Result<()> {
    // write requests carry no fragmenter; everything else needs all three
    if matches!(
        context.request_type,
        RequestType::Enumerate | RequestType::Read
    ) && context.fragmenter.as_deref().map_or(true, str::is_empty)
    {
        return Err(missing_property("FRAGMENTER"));
    }
    if context.accessor.is_empty() {
        return Err(missing_property("ACCESSOR"));
    }
    if context.resolver.is_empty() {
        return Err(missing_property("RESOLVER"));
    }
    Ok(())
}
