//! Typed dynamic values exchanged with providers
//!
//! Listing APIs give us flat `key -> string` attribute maps; providers want
//! structured values shaped by their schema. [`Type`] describes that shape
//! (encoded on the wire the way cty encodes types in JSON) and [`Value`] is
//! the structured value itself.
//!
//! # Flatmap conventions
//!
//! | flat key            | meaning                                  |
//! |---------------------|------------------------------------------|
//! | `name`              | primitive attribute                      |
//! | `tags.%`, `tags.k`  | map element count, map element `k`       |
//! | `rules.#`           | list or set element count                |
//! | `rules.0.port`      | attribute `port` of list element 0       |
//! | `rules.8823.port`   | attribute `port` of the set element hashed 8823 |

use crate::error::ProviderError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Number};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Placeholder the legacy SDK writes for values unknown until apply.
pub const UNKNOWN_VARIABLE_VALUE: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// Shape of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    String,
    Number,
    Bool,
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>),
    Object(BTreeMap<String, Type>),
    /// Any type, decided by the value itself
    Dynamic,
}

impl Type {
    pub fn list(element: Type) -> Self {
        Self::List(Box::new(element))
    }

    pub fn set(element: Type) -> Self {
        Self::Set(Box::new(element))
    }

    pub fn map(element: Type) -> Self {
        Self::Map(Box::new(element))
    }

    pub fn object<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (S, Type)>,
        S: Into<String>,
    {
        Self::Object(attributes.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::String | Self::Number | Self::Bool)
    }

    /// cty JSON type encoding
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String => json!("string"),
            Self::Number => json!("number"),
            Self::Bool => json!("bool"),
            Self::Dynamic => json!("dynamic"),
            Self::List(element) => json!(["list", element.to_json()]),
            Self::Set(element) => json!(["set", element.to_json()]),
            Self::Map(element) => json!(["map", element.to_json()]),
            Self::Object(attributes) => {
                let attributes: serde_json::Map<String, serde_json::Value> = attributes
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.to_json()))
                    .collect();
                json!(["object", attributes])
            }
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self, ProviderError> {
        use serde_json::Value as Json;

        match json {
            Json::String(name) => match name.as_str() {
                "string" => Ok(Self::String),
                "number" => Ok(Self::Number),
                "bool" => Ok(Self::Bool),
                "dynamic" => Ok(Self::Dynamic),
                other => Err(conversion(format!("unknown primitive type {:?}", other))),
            },
            Json::Array(parts) if parts.len() == 2 => {
                let kind = parts[0].as_str().unwrap_or_default();
                match kind {
                    "list" => Ok(Self::list(Self::from_json(&parts[1])?)),
                    "set" => Ok(Self::set(Self::from_json(&parts[1])?)),
                    "map" => Ok(Self::map(Self::from_json(&parts[1])?)),
                    "object" => {
                        let attributes = parts[1]
                            .as_object()
                            .ok_or_else(|| conversion("object type needs an attribute map"))?;
                        let attributes = attributes
                            .iter()
                            .map(|(name, ty)| Ok((name.clone(), Self::from_json(ty)?)))
                            .collect::<Result<BTreeMap<_, _>, ProviderError>>()?;
                        Ok(Self::Object(attributes))
                    }
                    other => Err(conversion(format!("unsupported type kind {:?}", other))),
                }
            }
            other => Err(conversion(format!("invalid type encoding {}", other))),
        }
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(&json).map_err(serde::de::Error::custom)
    }
}

/// A structured value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(BTreeMap<String, Value>),
}

fn conversion(message: impl Into<String>) -> ProviderError {
    ProviderError::Conversion(message.into())
}

fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attribute of an object value
    pub fn get_attr(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Object(attributes) | Self::Map(attributes) => attributes.get(name),
            _ => None,
        }
    }

    /// Plain JSON rendering; sets become arrays, objects and maps become objects
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => Json::Number(n.clone()),
            Self::String(s) => Json::String(s.clone()),
            Self::List(items) | Self::Set(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Self::Map(entries) | Self::Object(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Decode plain JSON into a value of type `ty`.
    ///
    /// Primitives convert the way Terraform does (`"1"` is a valid number,
    /// `true` a valid string). Object attributes missing from the JSON are
    /// null; JSON keys the type does not declare are dropped.
    pub fn from_json(json: &serde_json::Value, ty: &Type) -> Result<Value, ProviderError> {
        use serde_json::Value as Json;

        if json.is_null() {
            return Ok(Self::Null);
        }

        match ty {
            Type::String => match json {
                Json::String(s) => Ok(Self::String(s.clone())),
                Json::Number(n) => Ok(Self::String(n.to_string())),
                Json::Bool(b) => Ok(Self::String(b.to_string())),
                other => Err(conversion(format!("string required, got {}", other))),
            },
            Type::Number => match json {
                Json::Number(n) => Ok(Self::Number(n.clone())),
                Json::String(s) => parse_number(s),
                other => Err(conversion(format!("number required, got {}", other))),
            },
            Type::Bool => match json {
                Json::Bool(b) => Ok(Self::Bool(*b)),
                Json::String(s) => parse_bool(s),
                other => Err(conversion(format!("bool required, got {}", other))),
            },
            Type::List(element) | Type::Set(element) => {
                let items = json
                    .as_array()
                    .ok_or_else(|| conversion(format!("list required, got {}", json)))?
                    .iter()
                    .map(|item| Self::from_json(item, element))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match ty {
                    Type::Set(_) => Self::Set(items),
                    _ => Self::List(items),
                })
            }
            Type::Map(element) => {
                let entries = json
                    .as_object()
                    .ok_or_else(|| conversion(format!("map required, got {}", json)))?
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::from_json(v, element)?)))
                    .collect::<Result<BTreeMap<_, _>, ProviderError>>()?;
                Ok(Self::Map(entries))
            }
            Type::Object(attributes) => {
                let object = json
                    .as_object()
                    .ok_or_else(|| conversion(format!("object required, got {}", json)))?;
                let mut entries = BTreeMap::new();
                for (name, attribute_type) in attributes {
                    let value = match object.get(name) {
                        Some(value) => Self::from_json(value, attribute_type)
                            .map_err(|e| conversion(format!(".{}: {}", name, e)))?,
                        None => Self::Null,
                    };
                    entries.insert(name.clone(), value);
                }
                Ok(Self::Object(entries))
            }
            Type::Dynamic => Ok(Self::from_untyped_json(json)),
        }
    }

    fn from_untyped_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as Json;

        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => Self::Number(n.clone()),
            Json::String(s) => Self::String(s.clone()),
            Json::Array(items) => Self::List(items.iter().map(Self::from_untyped_json).collect()),
            Json::Object(entries) => Self::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_untyped_json(v)))
                    .collect(),
            ),
        }
    }

    /// Build a structured value of type `ty` from a flat attribute map.
    pub fn from_flatmap(attributes: &HashMap<String, String>, ty: &Type) -> Result<Value, ProviderError> {
        match ty {
            Type::Object(attribute_types) => flatmap_object(attributes, "", attribute_types),
            other => Err(conversion(format!("flatmap root must be an object type, got {:?}", other))),
        }
    }
}

fn parse_number(s: &str) -> Result<Value, ProviderError> {
    s.parse::<Number>()
        .map(Value::Number)
        .map_err(|_| conversion(format!("a number is required, got {:?}", s)))
}

fn parse_bool(s: &str) -> Result<Value, ProviderError> {
    match s {
        "true" | "1" => Ok(Value::Bool(true)),
        "false" | "0" => Ok(Value::Bool(false)),
        other => Err(conversion(format!("a bool is required, got {:?}", other))),
    }
}

fn flatmap_value(m: &HashMap<String, String>, key: &str, ty: &Type) -> Result<Value, ProviderError> {
    match ty {
        Type::String | Type::Number | Type::Bool | Type::Dynamic => flatmap_primitive(m, key, ty),
        Type::Object(attribute_types) => {
            let nested_prefix = format!("{}.", key);
            if !m.keys().any(|k| k.starts_with(&nested_prefix)) {
                return Ok(Value::Null);
            }
            flatmap_object(m, key, attribute_types)
        }
        Type::List(element) => flatmap_list(m, key, element),
        Type::Set(element) => flatmap_set(m, key, element),
        Type::Map(element) => flatmap_map(m, key, element),
    }
}

fn flatmap_primitive(m: &HashMap<String, String>, key: &str, ty: &Type) -> Result<Value, ProviderError> {
    let Some(raw) = m.get(key) else {
        return Ok(Value::Null);
    };
    if raw == UNKNOWN_VARIABLE_VALUE {
        return Ok(Value::Null);
    }

    let value = match ty {
        Type::Number => parse_number(raw),
        Type::Bool => parse_bool(raw),
        _ => Ok(Value::String(raw.clone())),
    };
    value.map_err(|e| conversion(format!("{}: {}", key, e)))
}

fn flatmap_object(
    m: &HashMap<String, String>,
    prefix: &str,
    attribute_types: &BTreeMap<String, Type>,
) -> Result<Value, ProviderError> {
    let mut entries = BTreeMap::new();
    for (name, ty) in attribute_types {
        let value = flatmap_value(m, &join_key(prefix, name), ty)?;
        entries.insert(name.clone(), value);
    }
    Ok(Value::Object(entries))
}

/// Element count stored under `key.<marker>`, `None` when absent or unknown.
fn flatmap_count(m: &HashMap<String, String>, key: &str, marker: &str) -> Result<Option<usize>, ProviderError> {
    let Some(raw) = m.get(&join_key(key, marker)) else {
        return Ok(None);
    };
    if raw == UNKNOWN_VARIABLE_VALUE {
        return Ok(None);
    }
    raw.parse::<usize>()
        .map(Some)
        .map_err(|_| conversion(format!("invalid count value for {:?}: {:?}", key, raw)))
}

fn flatmap_list(m: &HashMap<String, String>, key: &str, element: &Type) -> Result<Value, ProviderError> {
    let Some(count) = flatmap_count(m, key, "#")? else {
        return Ok(Value::Null);
    };
    let items = (0..count)
        .map(|index| flatmap_value(m, &join_key(key, &index.to_string()), element))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::List(items))
}

/// Distinct first key segments below `key.`, skipping `skip`.
fn child_segments<'a>(m: &'a HashMap<String, String>, key: &str, skip: &str) -> BTreeSet<&'a str> {
    let prefix = format!("{}.", key);
    m.keys()
        .filter_map(|k| k.strip_prefix(prefix.as_str()))
        .map(|rest| rest.split('.').next().unwrap_or(rest))
        .filter(|segment| *segment != skip)
        .collect()
}

fn flatmap_set(m: &HashMap<String, String>, key: &str, element: &Type) -> Result<Value, ProviderError> {
    if flatmap_count(m, key, "#")?.is_none() {
        return Ok(Value::Null);
    }

    let mut segments: Vec<&str> = child_segments(m, key, "#").into_iter().collect();
    // Numeric hashes in numeric order keeps the output stable
    segments.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    });

    let items = segments
        .into_iter()
        .map(|segment| flatmap_value(m, &join_key(key, segment), element))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Set(items))
}

fn flatmap_map(m: &HashMap<String, String>, key: &str, element: &Type) -> Result<Value, ProviderError> {
    let count = match flatmap_count(m, key, "%")? {
        Some(count) => Some(count),
        None => flatmap_count(m, key, "#")?,
    };
    if count.is_none() {
        return Ok(Value::Null);
    }

    let prefix = format!("{}.", key);
    let mut entries = BTreeMap::new();

    if element.is_primitive() || *element == Type::Dynamic {
        // Primitive map keys may themselves contain dots
        for (flat_key, _) in m.iter() {
            let Some(name) = flat_key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if name == "%" || name == "#" {
                continue;
            }
            entries.insert(name.to_string(), flatmap_primitive(m, flat_key, element)?);
        }
    } else {
        for segment in child_segments(m, key, "%") {
            if segment == "#" {
                continue;
            }
            entries.insert(segment.to_string(), flatmap_value(m, &join_key(key, segment), element)?);
        }
    }

    Ok(Value::Map(entries))
}
