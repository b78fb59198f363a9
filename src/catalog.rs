//! Persistent metadata: page size, indexing flag, free-page list head, last
//! allocated page id, and the set of table schemas. Serialized to a sibling
//! `catalog` file on shutdown, loaded on startup.
//!
//! The on-disk format follows §4.5 of the design, with one addition: a
//! trailing CRC32 (grounded in the teacher's `FluxDbFileHeader.checksum`
//! field and in `crc32fast`, which three of the five example repos
//! depend on) so a truncated or corrupted catalog file is caught as an
//! `InvariantBreach` at load time instead of silently misreading fields.

use bitflags::bitflags;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{FluxError, Result};
use crate::record::{decode_value, encode_value};
use crate::schema::{AttributeSchema, TableSchema};
use crate::types::DataType;

bitflags! {
    /// Catalog-level flags. Only `INDEXING` is meaningful today; it is
    /// accepted and preserved per the spec's forward-compatibility note but
    /// never consulted by the engine (no index structures exist).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CatalogFlags: u8 {
        const INDEXING = 0b0000_0001;
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pub page_size: u32,
    pub flags: CatalogFlags,
    pub free_page_list_head: i32,
    pub last_page_id: i32,
    pub tables: Vec<TableSchema>,
}

impl Catalog {
    /// Defaults used when no catalog file exists yet (first run).
    pub fn new(page_size: u32, indexing: bool) -> Self {
        let mut flags = CatalogFlags::empty();
        flags.set(CatalogFlags::INDEXING, indexing);
        Self {
            page_size,
            flags,
            free_page_list_head: -1,
            last_page_id: -1,
            tables: Vec::new(),
        }
    }

    pub fn indexing_enabled(&self) -> bool {
        self.flags.contains(CatalogFlags::INDEXING)
    }

    pub fn find_table(&self, name: &str) -> Option<&TableSchema> {
        let name = name.to_lowercase();
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn find_table_mut(&mut self, name: &str) -> Option<&mut TableSchema> {
        let name = name.to_lowercase();
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.find_table(name).is_some()
    }

    pub fn load_or_default(path: &Path, page_size: u32, indexing: bool) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(page_size, indexing));
        }
        let bytes = std::fs::read(path)?;
        Self::deserialize(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.serialize();
        let mut file = std::fs::File::create(path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.page_size.to_le_bytes());
        buf.push(self.flags.bits());
        buf.extend_from_slice(&self.free_page_list_head.to_le_bytes());
        buf.extend_from_slice(&self.last_page_id.to_le_bytes());
        buf.extend_from_slice(&(self.tables.len() as u32).to_le_bytes());

        for table in &self.tables {
            write_lp_string(&mut buf, &table.name);
            buf.extend_from_slice(&table.head_page_id.to_le_bytes());
            buf.extend_from_slice(&(table.attributes.len() as u32).to_le_bytes());
            for attr in &table.attributes {
                write_lp_string(&mut buf, &attr.name);
                write_lp_string(&mut buf, attr.data_type.tag());
                buf.extend_from_slice(&attr.data_type.max_length().to_le_bytes());
                buf.push(attr.is_primary_key as u8);
                buf.push(attr.is_not_null as u8);
                match &attr.default {
                    Some(v) => {
                        buf.push(1);
                        buf.extend(
                            encode_value(&attr.name, v, &attr.data_type)
                                .expect("default value was validated at ALTER time"),
                        );
                    }
                    None => buf.push(0),
                }
            }
        }

        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(FluxError::InvariantBreach("catalog file too short".into()));
        }
        let (body, checksum_bytes) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        let actual = crc32fast::hash(body);
        if actual != expected {
            return Err(FluxError::InvariantBreach(
                "catalog checksum mismatch: file is corrupted or truncated".into(),
            ));
        }

        let mut cursor = Cursor::new(body);
        let page_size = cursor.read_u32()?;
        let flags = CatalogFlags::from_bits_truncate(cursor.read_u8()?);
        let free_page_list_head = cursor.read_i32()?;
        let last_page_id = cursor.read_i32()?;
        let table_count = cursor.read_u32()?;

        let mut tables = Vec::with_capacity(table_count as usize);
        for _ in 0..table_count {
            let name = cursor.read_lp_string()?;
            let head_page_id = cursor.read_i32()?;
            let attr_count = cursor.read_u32()?;
            let mut attributes = Vec::with_capacity(attr_count as usize);
            for _ in 0..attr_count {
                let attr_name = cursor.read_lp_string()?;
                let type_tag = cursor.read_lp_string()?;
                let max_length = cursor.read_i32()?;
                let data_type = DataType::from_tag(&type_tag, max_length)?;
                let is_primary_key = cursor.read_u8()? != 0;
                let is_not_null = cursor.read_u8()? != 0;
                let has_default = cursor.read_u8()? != 0;
                let default = if has_default {
                    let (value, consumed) = decode_value(cursor.remaining(), &data_type);
                    cursor.advance(consumed);
                    Some(value)
                } else {
                    None
                };
                attributes.push(AttributeSchema {
                    name: attr_name,
                    data_type,
                    is_primary_key,
                    is_not_null,
                    default,
                });
            }
            tables.push(TableSchema {
                name,
                attributes,
                head_page_id,
            });
        }

        Ok(Self {
            page_size,
            flags,
            free_page_list_head,
            last_page_id,
            tables,
        })
    }
}

fn write_lp_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(bytes);
}

/// Minimal cursor over an in-memory catalog byte buffer.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(FluxError::InvariantBreach(
                "catalog file ended mid-record".into(),
            ));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_lp_string(&mut self) -> Result<String> {
        let len = u16::from_le_bytes(self.take(2)?.try_into().unwrap()) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| FluxError::InvariantBreach("non-UTF-8 string in catalog".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Value};

    #[test]
    fn round_trips_empty_catalog() {
        let cat = Catalog::new(4096, false);
        let bytes = cat.serialize();
        let restored = Catalog::deserialize(&bytes).unwrap();
        assert_eq!(restored.page_size, 4096);
        assert!(!restored.indexing_enabled());
        assert_eq!(restored.free_page_list_head, -1);
        assert_eq!(restored.last_page_id, -1);
        assert!(restored.tables.is_empty());
    }

    #[test]
    fn round_trips_tables_with_defaults() {
        let mut cat = Catalog::new(128, true);
        cat.last_page_id = 3;
        cat.free_page_list_head = 2;
        cat.tables.push(TableSchema {
            name: "t".to_string(),
            head_page_id: 0,
            attributes: vec![
                AttributeSchema::new("id", DataType::Integer, true, true, None),
                AttributeSchema::new(
                    "age",
                    DataType::Integer,
                    false,
                    true,
                    Some(Value::Int(0)),
                ),
                AttributeSchema::new("name", DataType::Varchar(8), false, false, None),
            ],
        });

        let bytes = cat.serialize();
        let restored = Catalog::deserialize(&bytes).unwrap();

        assert_eq!(restored.page_size, 128);
        assert!(restored.indexing_enabled());
        assert_eq!(restored.last_page_id, 3);
        assert_eq!(restored.free_page_list_head, 2);
        let t = restored.find_table("t").unwrap();
        assert_eq!(t.attributes.len(), 3);
        assert_eq!(t.attributes[1].default, Some(Value::Int(0)));
        assert!(matches!(t.attributes[2].data_type, DataType::Varchar(8)));
    }

    #[test]
    fn detects_truncated_file() {
        let cat = Catalog::new(4096, false);
        let mut bytes = cat.serialize();
        bytes.truncate(bytes.len() - 2);
        assert!(Catalog::deserialize(&bytes).is_err());
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog");
        let cat = Catalog::load_or_default(&path, 4096, true).unwrap();
        assert_eq!(cat.page_size, 4096);
        assert!(cat.indexing_enabled());
    }

    #[test]
    fn save_then_load_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog");
        let mut cat = Catalog::new(256, false);
        cat.tables.push(TableSchema::new(
            "orders",
            vec![AttributeSchema::new(
                "id",
                DataType::Integer,
                true,
                true,
                None,
            )],
        ));
        cat.save(&path).unwrap();

        let restored = Catalog::load_or_default(&path, 9999, true).unwrap();
        // Stored page size wins over whatever was passed on restart.
        assert_eq!(restored.page_size, 256);
        assert!(!restored.indexing_enabled());
        assert!(restored.table_exists("orders"));
    }
}
