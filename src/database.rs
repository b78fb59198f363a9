//! Aggregate root: wires `Buffer` + `Catalog` + `StorageManager` behind
//! `open`/`shutdown`, owning the heap-file and catalog-file paths. Grounded
//! in the teacher's `general::database::Database`, which likewise opens a
//! pager and loads a catalog once at construction time — generalized here
//! to a directory holding two sibling files (`db`, `catalog`) instead of a
//! single combined file.

use std::path::{Path, PathBuf};

use tracing::{error, info, instrument, warn};

use crate::buffer::Buffer;
use crate::catalog::Catalog;
use crate::error::Result;
use crate::schema::TableSchema;
use crate::storage_manager::StorageManager;
use crate::types::Value;

pub struct Database {
    buffer: Buffer,
    catalog: Catalog,
    manager: StorageManager,
    catalog_path: PathBuf,
}

impl Database {
    /// Opens `dir/db` and `dir/catalog`, creating both if absent. If a
    /// catalog file already exists its stored `page_size`/indexing flag
    /// win over `page_size`/`indexing` (§4.5's restart-override rule);
    /// `buffer_capacity_pages` is always taken from the argument since it
    /// is a runtime resource bound, not a persisted schema property.
    #[instrument(skip(dir))]
    pub fn open(
        dir: &Path,
        page_size: u32,
        buffer_capacity_pages: usize,
        indexing: bool,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let heap_path = dir.join("db");
        let catalog_path = dir.join("catalog");

        let catalog = Catalog::load_or_default(&catalog_path, page_size, indexing)?;
        if catalog_path.exists() && catalog.page_size != page_size {
            warn!(
                requested = page_size,
                stored = catalog.page_size,
                "ignoring requested page size; catalog already committed to a different one"
            );
        }

        let buffer = Buffer::open(&heap_path, buffer_capacity_pages, catalog.page_size)?;
        info!(
            page_size = catalog.page_size,
            buffer_capacity_pages,
            indexing = catalog.indexing_enabled(),
            tables = catalog.tables.len(),
            "database opened"
        );

        Ok(Self {
            buffer,
            catalog,
            manager: StorageManager::new(),
            catalog_path,
        })
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<bool> {
        self.manager.create_table(&mut self.buffer, &mut self.catalog, schema)
    }

    pub fn drop_table(&mut self, name: &str) -> Result<bool> {
        self.manager.drop_table(&mut self.buffer, &mut self.catalog, name)
    }

    pub fn insert(&mut self, table: &str, values: Vec<Value>) -> Result<bool> {
        self.manager.insert(&mut self.buffer, &mut self.catalog, table, values)
    }

    pub fn select_all(&mut self, table: &str) -> Result<Option<Vec<Vec<Value>>>> {
        self.manager.select_all(&mut self.buffer, &self.catalog, table)
    }

    pub fn alter_table(&mut self, old_name: &str, new_schema: TableSchema) -> Result<bool> {
        self.manager
            .alter_table(&mut self.buffer, &mut self.catalog, old_name, new_schema)
    }

    pub fn table_schema(&self, name: &str) -> Option<&TableSchema> {
        self.catalog.find_table(name)
    }

    /// Flushes every dirty resident page and saves the catalog. Best-effort
    /// on the catalog save: a failure is logged rather than panicking, so a
    /// `Database` that hit a fatal error earlier can still shut down
    /// cleanly instead of losing whatever did make it to the buffer.
    #[instrument(skip(self))]
    pub fn shutdown(&mut self) -> Result<()> {
        self.buffer.evict_all()?;
        if let Err(e) = self.catalog.save(&self.catalog_path) {
            error!(error = %e, "failed to save catalog on shutdown");
            return Err(e);
        }
        info!("database shut down cleanly");
        Ok(())
    }
}
