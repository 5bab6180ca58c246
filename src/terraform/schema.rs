//! Resource schemas as declared by a provider
//!
//! Only the parts needed to shape values are modelled: attribute types and
//! nested blocks.

use super::value::Type;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub computed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NestingMode {
    Single,
    List,
    Set,
    Map,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    pub nesting: NestingMode,
    pub block: Block,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default)]
    pub block_types: BTreeMap<String, NestedBlock>,
}

impl Block {
    /// Object type of values conforming to this block
    pub fn implied_type(&self) -> Type {
        let mut attributes: BTreeMap<String, Type> = self
            .attributes
            .iter()
            .map(|(name, attribute)| (name.clone(), attribute.ty.clone()))
            .collect();

        for (name, nested) in &self.block_types {
            let element = nested.block.implied_type();
            let ty = match nested.nesting {
                // Legacy SDK flattens single blocks as one-element lists
                NestingMode::Single | NestingMode::List => Type::list(element),
                NestingMode::Set => Type::set(element),
                NestingMode::Map => Type::map(element),
            };
            attributes.insert(name.clone(), ty);
        }

        Type::Object(attributes)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub version: i64,
    pub block: Block,
}

/// Everything `GetSchema` returns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSchema {
    pub provider: Schema,
    #[serde(default)]
    pub resource_types: HashMap<String, Schema>,
}

impl ProviderSchema {
    pub fn resource_type(&self, name: &str) -> Option<&Schema> {
        self.resource_types.get(name)
    }
}
