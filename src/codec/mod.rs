//! Body decoder and result encoder.
//!
//! Formats are picked by matching the declared media type: `.../json`,
//! `...+json`, `.../x-www-form`, `.../cbor` and their parameterized variants.

use std::sync::LazyLock;

use regex::Regex;
use restsql_core::{Entity, Error, Result, Value};
use serde::Deserialize;

use crate::engine::Output;

pub const JSON: &str = "application/json; charset=utf-8";
pub const CBOR: &str = "application/cbor";

static JSON_TYPE: LazyLock<Regex> = LazyLock::new(|| media_pattern("json"));
static FORM_TYPE: LazyLock<Regex> = LazyLock::new(|| media_pattern("form"));
static CBOR_TYPE: LazyLock<Regex> = LazyLock::new(|| media_pattern("cbor"));

fn media_pattern(subtype: &str) -> Regex {
    Regex::new(&format!(r"(?i)[+\-/]{subtype}($|[+\-;])")).expect("static media type pattern")
}

/// Wire format of a body or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Form,
    /// Binary tagged map
    Cbor,
}

impl Format {
    pub fn detect(media_type: &str) -> Result<Self> {
        if JSON_TYPE.is_match(media_type) {
            Ok(Format::Json)
        } else if FORM_TYPE.is_match(media_type) {
            Ok(Format::Form)
        } else if CBOR_TYPE.is_match(media_type) && cfg!(feature = "cbor") {
            Ok(Format::Cbor)
        } else {
            Err(Error::bad_request(format!(
                "unsupported content type '{media_type}'"
            )))
        }
    }
}

/// Decodes `body` onto `entity`.
///
/// Only keys naming schema fields are applied, so fields missing from the body
/// keep whatever the entity already holds. Unknown keys are ignored.
pub fn decode(body: &[u8], content_type: &str, entity: &mut Entity) -> Result<()> {
    match Format::detect(content_type)? {
        Format::Json => {
            let map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)
                .map_err(|e| Error::internal("malformed json body").with_cause(e))?;
            for (key, raw) in map {
                if entity.schema().field_index(&key).is_none() {
                    continue;
                }
                let value = Value::deserialize(raw).map_err(|e| {
                    Error::internal(format!("malformed value for field '{key}'")).with_cause(e)
                })?;
                apply(entity, &key, value)?;
            }
        }
        Format::Form => {
            // Pairs apply in order, so a repeated key keeps its last value
            for (key, raw) in url::form_urlencoded::parse(body) {
                if entity.schema().field_index(&key).is_none() {
                    continue;
                }
                apply(entity, &key, Value::Text(raw.into_owned()))?;
            }
        }
        #[cfg(feature = "cbor")]
        Format::Cbor => {
            for (key, raw) in cbor::decode_map(body)? {
                if entity.schema().field_index(&key).is_none() {
                    continue;
                }
                let value = serde_cbor::value::from_value::<Value>(raw).map_err(|e| {
                    Error::internal(format!("malformed value for field '{key}'")).with_cause(e)
                })?;
                apply(entity, &key, value)?;
            }
        }
        #[cfg(not(feature = "cbor"))]
        Format::Cbor => unreachable!("cbor is only detected with the cbor feature"),
    }
    Ok(())
}

/// Result format for an accept type. Form encoding only exists for bodies.
pub fn result_format(accept: &str) -> Result<Format> {
    match Format::detect(accept) {
        Ok(Format::Form) | Err(_) => Err(Error::bad_request(format!(
            "unsupported accept type '{accept}'"
        ))),
        Ok(format) => Ok(format),
    }
}

/// Encodes a result for `accept`, returning the bytes and their content type.
pub fn encode(output: &Output, accept: &str) -> Result<(Vec<u8>, &'static str)> {
    match result_format(accept)? {
        Format::Json => serde_json::to_vec(output)
            .map(|bytes| (bytes, JSON))
            .map_err(|e| Error::internal("failed to encode json result").with_cause(e)),
        #[cfg(feature = "cbor")]
        Format::Cbor => serde_cbor::to_vec(output)
            .map(|bytes| (bytes, CBOR))
            .map_err(|e| Error::internal("failed to encode cbor result").with_cause(e)),
        #[cfg(not(feature = "cbor"))]
        Format::Cbor => unreachable!("cbor is only detected with the cbor feature"),
        Format::Form => Err(Error::bad_request(format!(
            "unsupported accept type '{accept}'"
        ))),
    }
}

fn apply(entity: &mut Entity, key: &str, value: Value) -> Result<()> {
    let Some(index) = entity.schema().field_index(key) else {
        return Ok(());
    };
    let field = &entity.schema().fields()[index];
    let value = if value.is_null() {
        if !field.nullable {
            return Err(Error::internal(format!(
                "field '{key}' must not be null"
            )));
        }
        Value::Null
    } else {
        field.kind.coerce(value).map_err(|e| {
            Error::internal(format!("cannot decode field '{key}'")).with_cause(e)
        })?
    };
    entity.set_at(index, value);
    Ok(())
}

#[cfg(feature = "cbor")]
mod cbor {
    use std::collections::BTreeMap;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use restsql_core::{Error, Result};

    /// Upper bound on accepted body size.
    const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

    /// Decodes a top-level text-keyed map. A panic inside the decoder is
    /// reported as a decoding failure.
    pub(super) fn decode_map(body: &[u8]) -> Result<BTreeMap<String, serde_cbor::Value>> {
        if body.len() > MAX_BODY_BYTES {
            return Err(Error::internal("cbor body exceeds maximum allowed size"));
        }
        match catch_unwind(AssertUnwindSafe(|| serde_cbor::from_slice(body))) {
            Ok(Ok(map)) => Ok(map),
            Ok(Err(e)) => Err(Error::internal("malformed cbor body").with_cause(e)),
            Err(_) => Err(Error::internal("panic during cbor decoding")),
        }
    }
}
