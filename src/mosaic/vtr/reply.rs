//! Structured parsing of the `FT.SEARCH` KNN reply.
//!
//! Matches explicitly against an abstract value sum-type rather than
//! duck-typing into the reply's shape, so a malformed or unexpected reply
//! fails with a specific `VtrError` instead of panicking or silently
//! misreading a field.

use crate::mosaic::vtr::error::VtrError;

/// An abstract reply value. Deliberately independent of any particular
/// store client's wire type so the matching logic below stays structural.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Map(Vec<(Value, Value)>),
    List(Vec<Value>),
    String(String),
    Bytes(Vec<u8>),
    Int(i64),
    Nil,
}

impl Value {
    fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    fn map_get(pairs: &[(Value, Value)], key: &str) -> Option<&Value> {
        pairs
            .iter()
            .find(|(k, _)| matches!(k, Value::String(s) if s == key))
            .map(|(_, v)| v)
    }
}

/// Extract the base64 `img` field of each result, in reply order.
///
/// Fails with `InvalidResultShape` if the top-level reply is not a map or
/// `results` is not a list; `NoResult` if the list is empty; `MissingImage`
/// if a result lacks an `extra_attributes.img` field; `InvalidField` if
/// that field is present but not a string.
pub fn extract_tile_images(reply: &Value) -> Result<Vec<String>, VtrError> {
    let top = reply.as_map().ok_or(VtrError::InvalidResultShape)?;
    let results = Value::map_get(top, "results")
        .and_then(Value::as_list)
        .ok_or(VtrError::InvalidResultShape)?;

    if results.is_empty() {
        return Err(VtrError::NoResult);
    }

    results
        .iter()
        .map(|result| {
            let result_map = result.as_map().ok_or(VtrError::InvalidResultShape)?;
            let extra = Value::map_get(result_map, "extra_attributes")
                .and_then(Value::as_map)
                .ok_or(VtrError::MissingImage)?;
            let img = Value::map_get(extra, "img").ok_or(VtrError::MissingImage)?;
            img.as_str()
                .map(str::to_owned)
                .ok_or(VtrError::InvalidField)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: Vec<(&str, Value)>) -> Value {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (Value::String(k.to_string()), v))
                .collect(),
        )
    }

    fn result_with_img(img: &str) -> Value {
        map(vec![(
            "extra_attributes",
            map(vec![("img", Value::String(img.to_string()))]),
        )])
    }

    #[test]
    fn extracts_images_in_order() {
        let reply = map(vec![(
            "results",
            Value::List(vec![result_with_img("aaa"), result_with_img("bbb")]),
        )]);
        assert_eq!(
            extract_tile_images(&reply).unwrap(),
            vec!["aaa".to_string(), "bbb".to_string()]
        );
    }

    #[test]
    fn non_map_top_level_is_invalid_shape() {
        let reply = Value::List(vec![]);
        assert!(matches!(
            extract_tile_images(&reply),
            Err(VtrError::InvalidResultShape)
        ));
    }

    #[test]
    fn empty_results_is_no_result() {
        let reply = map(vec![("results", Value::List(vec![]))]);
        assert!(matches!(extract_tile_images(&reply), Err(VtrError::NoResult)));
    }

    #[test]
    fn missing_img_field_is_missing_image() {
        let reply = map(vec![(
            "results",
            Value::List(vec![map(vec![("extra_attributes", map(vec![]))])]),
        )]);
        assert!(matches!(
            extract_tile_images(&reply),
            Err(VtrError::MissingImage)
        ));
    }

    #[test]
    fn non_string_img_field_is_invalid_field() {
        let reply = map(vec![(
            "results",
            Value::List(vec![map(vec![(
                "extra_attributes",
                map(vec![("img", Value::Int(1))]),
            )])]),
        )]);
        assert!(matches!(
            extract_tile_images(&reply),
            Err(VtrError::InvalidField)
        ));
    }
}
