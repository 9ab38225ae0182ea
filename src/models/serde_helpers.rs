// Serde helpers for farm fields whose stored form differs from their in-memory form.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct StoredPair {
    first: Option<f64>,
    second: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PairFormat {
    Object(StoredPair),
    Array(Vec<Option<f64>>),
}

/// Encodes coordinate pairs as `[{"first":a,"second":b},...]`, the text layout
/// of previously stored farm boundaries.
pub fn coordinates_to_json(coordinates: &[(f64, f64)]) -> Result<String, serde_json::Error> {
    let pairs: Vec<StoredPair> = coordinates
        .iter()
        .map(|(first, second)| StoredPair {
            first: Some(*first),
            second: Some(*second),
        })
        .collect();
    serde_json::to_string(&pairs)
}

/// Decodes stored coordinate text. Accepts both `{"first","second"}` objects and
/// plain two-element arrays; pairs with a missing half are dropped.
pub fn coordinates_from_json(text: &str) -> Result<Vec<(f64, f64)>, serde_json::Error> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let pairs: Vec<PairFormat> = serde_json::from_str(text)?;
    Ok(pairs
        .into_iter()
        .filter_map(|pair| match pair {
            PairFormat::Object(StoredPair {
                first: Some(first),
                second: Some(second),
            }) => Some((first, second)),
            PairFormat::Array(values) if values.len() >= 2 => match (values[0], values[1]) {
                (Some(first), Some(second)) => Some((first, second)),
                _ => None,
            },
            _ => None,
        })
        .collect())
}

/// Reads an explicit `null` as the field's default value.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `#[serde(with = ...)]` adapter persisting optional coordinates as JSON text.
pub mod coordinate_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<(f64, f64)>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            None => serializer.serialize_none(),
            Some(coordinates) => {
                let text =
                    super::coordinates_to_json(coordinates).map_err(serde::ser::Error::custom)?;
                serializer.serialize_some(&text)
            }
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<(f64, f64)>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        match value {
            None => Ok(None),
            Some(text) => super::coordinates_from_json(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Parses a bracketed, comma separated accuracy list such as `"[3.5, 4.0, ]"`.
/// Entries that are not numbers become `None` so positions stay aligned with
/// capture events.
pub fn parse_accuracy_list(text: &str) -> Vec<Option<f32>> {
    text.replace(['[', ']'], "")
        .split(',')
        .map(|value| value.trim().parse::<f32>().ok())
        .collect()
}
