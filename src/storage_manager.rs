//! The table-level façade: create/drop table, insert with PK check, full
//! scan, and ALTER rebuild. Owns no page state itself — it composes
//! `Buffer` and `Catalog`, which are threaded through every call, mirroring
//! the teacher's `FluxPager` methods (`create_table`, `init_catalog_root`)
//! that operate directly against a pager + in-memory catalog root rather
//! than holding their own page cache.

use tracing::{info, instrument, warn};

use crate::buffer::Buffer;
use crate::catalog::Catalog;
use crate::error::{FluxError, Result};
use crate::page::Page;
use crate::record;
use crate::schema::TableSchema;
use crate::types::Value;

pub struct StorageManager;

impl StorageManager {
    pub fn new() -> Self {
        Self
    }

    /// Allocates one empty page, registers `schema` with it as head. Returns
    /// `false` if a table with the same (lowercased) name already exists.
    #[instrument(skip(self, buffer, catalog, schema), fields(table = %schema.name))]
    pub fn create_table(
        &self,
        buffer: &mut Buffer,
        catalog: &mut Catalog,
        mut schema: TableSchema,
    ) -> Result<bool> {
        if catalog.table_exists(&schema.name) {
            warn!("table already exists");
            return Ok(false);
        }
        let head_id = buffer.create_new_page(catalog)?.get_page_id();
        schema.head_page_id = head_id;
        info!(head_page_id = head_id, "created table");
        catalog.tables.push(schema);
        Ok(true)
    }

    /// Walks the page chain from head, returning each page to the free
    /// list, then removes the schema from the catalog.
    #[instrument(skip(self, buffer, catalog))]
    pub fn drop_table(&self, buffer: &mut Buffer, catalog: &mut Catalog, name: &str) -> Result<bool> {
        let schema = match catalog.find_table(name) {
            Some(s) => s.clone(),
            None => return Ok(false),
        };
        for page_id in chain_ids(buffer, schema.head_page_id)? {
            free_page(buffer, catalog, page_id)?;
        }
        catalog.tables.retain(|t| t.name != schema.name);
        info!(table = %name, "dropped table");
        Ok(true)
    }

    /// Validates arity, encodes the record, enforces the primary key, and
    /// appends it to the table's tail page — splitting the tail into two
    /// fresh pages when it doesn't fit.
    ///
    /// Recoverable rejections (unknown table, arity/type/length/null
    /// violations, primary-key conflicts) return `Ok(false)` and leave
    /// storage unchanged. `Err` is reserved for IO failures and invariant
    /// breaches.
    #[instrument(skip(self, buffer, catalog, values), fields(table))]
    pub fn insert(
        &self,
        buffer: &mut Buffer,
        catalog: &mut Catalog,
        table: &str,
        values: Vec<Value>,
    ) -> Result<bool> {
        let mut schema = match catalog.find_table(table) {
            Some(s) => s.clone(),
            None => return Ok(false),
        };

        if values.len() != schema.attributes.len() {
            warn!(
                expected = schema.attributes.len(),
                actual = values.len(),
                "insert arity mismatch"
            );
            return Ok(false);
        }

        let bytes = match record::encode(&values, &schema) {
            Ok(b) => b,
            Err(FluxError::NullInNotNull(_))
            | Err(FluxError::TypeMismatch { .. })
            | Err(FluxError::LengthExceeded { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        let pk_index = schema
            .primary_key_index()
            .expect("every table has exactly one primary key attribute");
        if values[pk_index].is_null() {
            return Ok(false);
        }
        if primary_key_conflicts(buffer, &schema, pk_index, &values[pk_index])? {
            return Ok(false);
        }

        insert_bytes(buffer, catalog, &mut schema, &bytes)?;
        catalog.find_table_mut(table).unwrap().head_page_id = schema.head_page_id;
        Ok(true)
    }

    /// Chain walk from head; decodes and returns every record in order.
    /// Returns `None` for an unknown table.
    #[instrument(skip(self, buffer, catalog))]
    pub fn select_all(
        &self,
        buffer: &mut Buffer,
        catalog: &Catalog,
        table: &str,
    ) -> Result<Option<Vec<Vec<Value>>>> {
        let schema = match catalog.find_table(table) {
            Some(s) => s.clone(),
            None => return Ok(None),
        };
        let mut rows = Vec::new();
        for page_id in chain_ids(buffer, schema.head_page_id)? {
            let page = buffer.get_page(page_id)?;
            for bytes in page.get_records() {
                rows.push(record::decode(bytes, &schema));
            }
        }
        Ok(Some(rows))
    }

    /// Rewrites every row of `old_name` under `new_schema`: allocates a
    /// fresh head page, drains the old chain record by record (copying
    /// matching-name attributes, defaulting/nulling the rest), inserting
    /// each rewritten record (splitting as needed), and frees each old page
    /// as it's drained. Rejects (returns `false`) an attempt to drop the
    /// primary key, mirroring the parser-boundary rejection in the
    /// distilled spec — kept here too as a defensive backstop.
    #[instrument(skip(self, buffer, catalog, new_schema), fields(table = %old_name))]
    pub fn alter_table(
        &self,
        buffer: &mut Buffer,
        catalog: &mut Catalog,
        old_name: &str,
        mut new_schema: TableSchema,
    ) -> Result<bool> {
        let old_schema = match catalog.find_table(old_name) {
            Some(s) => s.clone(),
            None => return Ok(false),
        };

        if new_schema.name != old_schema.name && catalog.table_exists(&new_schema.name) {
            warn!("alter_table target name collides with an existing table");
            return Ok(false);
        }

        if let Some(old_pk) = old_schema.primary_key_index() {
            let pk_name = old_schema.attributes[old_pk].name.clone();
            if new_schema.attribute_index(&pk_name).is_none() {
                warn!("alter_table would drop the primary key; rejected");
                return Ok(false);
            }
        }

        // Any attribute new to `new_schema` that isn't nullable and has no
        // default would hit `NullInNotNull` once an existing row is
        // rewritten with `rewrite_record`'s null fill-in. Reject that up
        // front, before any page is allocated or freed, so a rejected ALTER
        // leaves the old table completely untouched rather than failing
        // mid-migration with a half-rewritten chain and leaked pages.
        for new_attr in &new_schema.attributes {
            if old_schema.attribute_index(&new_attr.name).is_none()
                && new_attr.is_not_null
                && new_attr.default.is_none()
            {
                warn!(
                    attribute = %new_attr.name,
                    "alter_table would add a NOT NULL column with no default; rejected"
                );
                return Ok(false);
            }
        }

        let new_head_id = buffer.create_new_page(catalog)?.get_page_id();
        new_schema.head_page_id = new_head_id;

        let old_page_ids = chain_ids(buffer, old_schema.head_page_id)?;
        for page_id in old_page_ids {
            let old_records: Vec<Vec<u8>> = buffer.get_page(page_id)?.get_records().to_vec();
            for old_bytes in &old_records {
                let rewritten = rewrite_record(old_bytes, &old_schema, &new_schema);
                let new_bytes = record::encode(&rewritten, &new_schema)?;
                insert_bytes(buffer, catalog, &mut new_schema, &new_bytes)?;
            }
            free_page(buffer, catalog, page_id)?;
        }

        catalog.tables.retain(|t| t.name != old_schema.name);
        info!(new_head_page_id = new_schema.head_page_id, "altered table");
        catalog.tables.push(new_schema);
        Ok(true)
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a value tuple for `new_schema` out of a record encoded under
/// `old_schema`: attributes present in both (matched case-insensitively by
/// name, already normalized to lowercase) are copied; attributes new to
/// `new_schema` get their default value, or null if none was given.
fn rewrite_record(old_bytes: &[u8], old_schema: &TableSchema, new_schema: &TableSchema) -> Vec<Value> {
    let old_values = record::decode(old_bytes, old_schema);
    new_schema
        .attributes
        .iter()
        .map(|new_attr| match old_schema.attribute_index(&new_attr.name) {
            Some(old_idx) => old_values[old_idx].clone(),
            None => new_attr.default.clone().unwrap_or(Value::Null),
        })
        .collect()
}

/// Appends `bytes` to `schema`'s tail page. If the tail refuses the record,
/// splits it: the tail's existing records are partitioned across two fresh
/// pages (`Page::split`, run against an owned snapshot to sidestep holding
/// three resident-page borrows at once), the new record is added to
/// whichever half has room, the chain is rewired in place of the old tail,
/// and the old tail page is returned to the free list. Shared by `insert`
/// (schema looked up from the catalog by name) and `alter_table` (schema
/// not yet registered, so it can't be looked up mid-migration).
fn insert_bytes(
    buffer: &mut Buffer,
    catalog: &mut Catalog,
    schema: &mut TableSchema,
    bytes: &[u8],
) -> Result<()> {
    let (tail_id, predecessor_id) = find_tail(buffer, schema.head_page_id)?;

    if buffer.get_page(tail_id)?.add_record(bytes) {
        return Ok(());
    }

    let page_size = buffer.page_size();
    let mut tail_snapshot = buffer.get_page(tail_id)?.clone();
    let mut half_a = Page::new(-1, page_size);
    let mut half_b = Page::new(-1, page_size);
    tail_snapshot.split(&mut half_a, &mut half_b)?;

    let a_id = buffer.create_new_page(catalog)?.get_page_id();
    let b_id = buffer.create_new_page(catalog)?.get_page_id();
    buffer.get_page(a_id)?.bulk_load(half_a.get_records())?;
    buffer.get_page(b_id)?.bulk_load(half_b.get_records())?;

    // The new record must go to B (the second/later half), never A: A holds
    // records that came before it in insertion order, so placing the new
    // record there first would reorder the chain scan ahead of them. B's
    // refusal is therefore a fatal invariant breach, not a fallback case.
    if !buffer.get_page(b_id)?.add_record(bytes) {
        return Err(FluxError::InvariantBreach(
            "insert: record does not fit in the second half of a freshly split page".into(),
        ));
    }

    buffer.get_page(a_id)?.set_next_page(b_id);

    match predecessor_id {
        Some(pred_id) => buffer.get_page(pred_id)?.set_next_page(a_id),
        None => schema.head_page_id = a_id,
    }

    free_page(buffer, catalog, tail_id)
}

fn find_tail(buffer: &mut Buffer, head_page_id: i32) -> Result<(i32, Option<i32>)> {
    let mut predecessor = None;
    let mut current = head_page_id;
    loop {
        let next = buffer.get_page(current)?.get_next_page();
        if next == -1 {
            return Ok((current, predecessor));
        }
        predecessor = Some(current);
        current = next;
    }
}

fn chain_ids(buffer: &mut Buffer, head_page_id: i32) -> Result<Vec<i32>> {
    let mut ids = Vec::new();
    let mut current = head_page_id;
    loop {
        ids.push(current);
        let next = buffer.get_page(current)?.get_next_page();
        if next == -1 {
            break;
        }
        current = next;
    }
    Ok(ids)
}

fn primary_key_conflicts(
    buffer: &mut Buffer,
    schema: &TableSchema,
    pk_index: usize,
    candidate: &Value,
) -> Result<bool> {
    for page_id in chain_ids(buffer, schema.head_page_id)? {
        let page = buffer.get_page(page_id)?;
        for bytes in page.get_records() {
            let existing = record::decode_attribute(bytes, schema, pk_index);
            if !existing.is_null() && existing == *candidate {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Clears `page_id`'s data, marks it dirty, and appends it to the
/// catalog's free-page list.
pub(crate) fn free_page(buffer: &mut Buffer, catalog: &mut Catalog, page_id: i32) -> Result<()> {
    {
        let page = buffer.get_page(page_id)?;
        page.clean_data();
        page.set_dirty();
    }
    if catalog.free_page_list_head == -1 {
        catalog.free_page_list_head = page_id;
        return Ok(());
    }
    let mut current = catalog.free_page_list_head;
    loop {
        let next = buffer.get_page(current)?.get_next_page();
        if next == -1 {
            break;
        }
        current = next;
    }
    buffer.get_page(current)?.set_next_page(page_id);
    Ok(())
}
