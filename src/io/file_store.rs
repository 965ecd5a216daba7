//! Newline-delimited JSON table files.
//!
//! Each table lives at `<root>/<project>.<dataset>.<table>.ndjson`, next to a
//! `.schema.json` file holding its column descriptors. A write goes to a
//! temporary file that is renamed over the table file, so readers see either
//! the old table or the whole new batch.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::domain::{Batch, FinancialRecord, WriteMode};
use crate::io::{LoadTarget, TableId, WarehouseWriter, WriteError, WriteReceipt};

#[derive(Debug, Clone)]
pub struct FileWarehouse {
    root: PathBuf,
}

impl FileWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn table_path(&self, table: &TableId) -> PathBuf {
        self.root.join(format!("{table}.ndjson"))
    }

    pub fn schema_path(&self, table: &TableId) -> PathBuf {
        self.root.join(format!("{table}.schema.json"))
    }

    /// Read every row currently committed to `table`.
    pub fn read_table(&self, table: &TableId) -> Result<Vec<FinancialRecord>, WriteError> {
        let path = self.table_path(table);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).map_err(|e| io_error("open", &path, e))?;
        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| io_error("read", &path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let row = serde_json::from_str(&line).map_err(|e| {
                WriteError::Fatal(format!("Corrupt row in '{}': {e}", path.display()))
            })?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn write_rows(
        &self,
        tmp_path: &Path,
        table_path: &Path,
        batch: &Batch,
        mode: WriteMode,
    ) -> Result<(), WriteError> {
        let file = File::create(tmp_path).map_err(|e| io_error("create", tmp_path, e))?;
        let mut out = BufWriter::new(file);

        if mode == WriteMode::Append && table_path.exists() {
            let mut existing =
                File::open(table_path).map_err(|e| io_error("open", table_path, e))?;
            std::io::copy(&mut existing, &mut out).map_err(|e| io_error("copy", table_path, e))?;
        }

        for record in &batch.records {
            serde_json::to_writer(&mut out, record)
                .map_err(|e| WriteError::Fatal(format!("Failed to serialize row: {e}")))?;
            out.write_all(b"\n").map_err(|e| io_error("write", tmp_path, e))?;
        }
        out.flush().map_err(|e| io_error("flush", tmp_path, e))?;
        Ok(())
    }
}

impl WarehouseWriter for FileWarehouse {
    fn write(&self, batch: &Batch, target: &LoadTarget) -> Result<WriteReceipt, WriteError> {
        fs::create_dir_all(&self.root).map_err(|e| io_error("create", &self.root, e))?;

        let schema_path = self.schema_path(&target.table);
        let schema = serde_json::to_vec_pretty(&target.schema)
            .map_err(|e| WriteError::Fatal(format!("Failed to serialize schema: {e}")))?;
        fs::write(&schema_path, schema).map_err(|e| io_error("write", &schema_path, e))?;

        let table_path = self.table_path(&target.table);
        let tmp_path = self.root.join(format!("{}.ndjson.tmp", target.table));

        if let Err(err) = self.write_rows(&tmp_path, &table_path, batch, target.write_mode) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        fs::rename(&tmp_path, &table_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            io_error("commit", &table_path, e)
        })?;

        Ok(WriteReceipt {
            rows_written: batch.len(),
        })
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> WriteError {
    WriteError::Transient(format!("Failed to {action} '{}': {err}", path.display()))
}
