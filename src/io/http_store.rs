//! Load a batch through an HTTP warehouse endpoint.

use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Serialize;

use crate::domain::{Batch, ColumnSpec, FinancialRecord};
use crate::io::{LoadTarget, WarehouseWriter, WriteError, WriteReceipt};

pub struct HttpWarehouse {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct LoadRequest<'a> {
    table: String,
    schema: &'a [ColumnSpec],
    write_mode: &'static str,
    rows: &'a [FinancialRecord],
}

impl HttpWarehouse {
    pub fn new(url: impl Into<String>) -> Result<Self, WriteError> {
        let client = Client::builder()
            .build()
            .map_err(|e| WriteError::Fatal(format!("failed to build warehouse client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl WarehouseWriter for HttpWarehouse {
    fn write(&self, batch: &Batch, target: &LoadTarget) -> Result<WriteReceipt, WriteError> {
        let body = LoadRequest {
            table: target.table.to_string(),
            schema: &target.schema,
            write_mode: target.write_mode.disposition(),
            rows: &batch.records,
        };

        let resp = self
            .client
            .post(&self.url)
            .timeout(target.timeout)
            .json(&body)
            .send()
            .map_err(|e| WriteError::Transient(format!("Warehouse request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().unwrap_or_default();
            return Err(classify_status(status, detail.trim()));
        }

        Ok(WriteReceipt {
            rows_written: batch.len(),
        })
    }
}

/// Overload and server-side failures are retryable; anything else is a rejection.
fn classify_status(status: StatusCode, detail: &str) -> WriteError {
    let message = if detail.is_empty() {
        format!("warehouse responded with status {status}")
    } else {
        format!("warehouse responded with status {status}: {detail}")
    };
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        WriteError::Transient(message)
    } else {
        WriteError::Fatal(message)
    }
}
