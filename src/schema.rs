//! Schema entities: `AttributeSchema` and `TableSchema`.

use crate::types::{DataType, Value};

#[derive(Debug, Clone)]
pub struct AttributeSchema {
    /// Always lowercased on construction.
    pub name: String,
    pub data_type: DataType,
    pub is_primary_key: bool,
    /// Implied by `is_primary_key`.
    pub is_not_null: bool,
    pub default: Option<Value>,
}

impl AttributeSchema {
    pub fn new(
        name: &str,
        data_type: DataType,
        is_primary_key: bool,
        is_not_null: bool,
        default: Option<Value>,
    ) -> Self {
        Self {
            name: name.to_lowercase(),
            data_type,
            is_primary_key,
            is_not_null: is_not_null || is_primary_key,
            default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Always lowercased on construction.
    pub name: String,
    /// Insertion order is preserved; this is also record encoding order.
    pub attributes: Vec<AttributeSchema>,
    pub head_page_id: i32,
}

impl TableSchema {
    pub fn new(name: &str, attributes: Vec<AttributeSchema>) -> Self {
        Self {
            name: name.to_lowercase(),
            attributes,
            head_page_id: -1,
        }
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.attributes.iter().position(|a| a.is_primary_key)
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        let name = name.to_lowercase();
        self.attributes.iter().position(|a| a.name == name)
    }
}
