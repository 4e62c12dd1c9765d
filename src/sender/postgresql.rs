//! Transactional batch writer for PostgreSQL.
//!
//! Each flush is one transaction: one INSERT per record, then commit. Any
//! failure rolls the whole transaction back, so a flush is all-or-nothing.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error};

use super::SenderError;
use crate::domain::HttpLog;

const INSERT_HTTP_LOG: &str = "\
INSERT INTO http_log (
    request_date, client_ip, client_port,
    frontend_name, backend_name, server_name,
    http_proto, http_method, http_url, http_query,
    header_request,
    cookie_request, cookie_response, termination_state,
    bytes_read, status_code,
    time_request, time_wait, time_connect, time_response, time_all,
    conn_active, conn_frontend, conn_backend, conn_server, retries,
    server_queue, backend_queue
) VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28
)";

pub struct PostgresqlWriter {
    pool: PgPool,
}

impl PostgresqlWriter {
    /// Validate the DSN and build a lazy pool; the first connection is
    /// opened on the first flush.
    pub fn new(dsn: &str) -> Result<Self, SenderError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_lazy(dsn)?;
        Ok(Self { pool })
    }

    /// Best-effort write; failures are logged and the batch is dropped.
    pub async fn forwards(&mut self, batch: &[HttpLog]) {
        if let Err(err) = self.try_forwards(batch).await {
            error!("postgresql: forward failed: {err}");
        }
    }

    async fn try_forwards(&self, batch: &[HttpLog]) -> Result<(), SenderError> {
        let mut tx = self.pool.begin().await?;

        if let Err(err) = Self::insert_batch(&mut tx, batch).await {
            let _ = tx.rollback().await;
            return Err(err);
        }

        tx.commit().await?;
        debug!(rows = batch.len(), "postgresql: batch committed");
        Ok(())
    }

    async fn insert_batch(
        tx: &mut Transaction<'static, Postgres>,
        batch: &[HttpLog],
    ) -> Result<(), SenderError> {
        for log in batch {
            let header_request =
                serde_json::to_string(&log.request_headers).unwrap_or_default();

            sqlx::query(INSERT_HTTP_LOG)
                .bind(log.timestamp)
                .bind(&log.client_ip)
                .bind(log.client_port)
                .bind(&log.frontend_name)
                .bind(&log.backend_name)
                .bind(&log.server_name)
                .bind(&log.http_proto)
                .bind(&log.http_method)
                .bind(&log.http_url)
                .bind(&log.http_query)
                .bind(header_request)
                .bind(&log.cookie_request)
                .bind(&log.cookie_response)
                .bind(&log.termination_state)
                .bind(log.bytes_read)
                .bind(log.http_status)
                .bind(log.time_request)
                .bind(log.time_wait)
                .bind(log.time_connect)
                .bind(log.time_response)
                .bind(log.time_all)
                .bind(log.conn_active)
                .bind(log.conn_frontend)
                .bind(log.conn_backend)
                .bind(log.conn_server)
                .bind(log.retries)
                .bind(log.queue_server)
                .bind(log.queue_backend)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}
