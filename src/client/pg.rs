//! PostgreSQL binding of the [`Client`] seam over `sqlx`.

use super::{Client, ClientTransaction, Row, TxOptions};
use crate::error::{ExecError, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use tokio::sync::Mutex;

/// Pooled PostgreSQL client.
pub struct PgClient {
    pool: PgPool,
}

impl PgClient {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| ExecError::new("PgClient.connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Client for PgClient {
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Row>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ExecError::new("PgClient.fetch_rows", e))?;
        rows.iter().map(row_to_json).collect()
    }

    async fn begin(&self, opts: TxOptions) -> Result<Box<dyn ClientTransaction>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ExecError::new("PgClient.begin", e))?;

        if let Some(level) = opts.isolation.as_sql() {
            sqlx::query(&format!("SET TRANSACTION ISOLATION LEVEL {level}"))
                .execute(&mut *tx)
                .await
                .map_err(|e| ExecError::new("PgClient.begin", e))?;
        }
        if opts.read_only {
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(|e| ExecError::new("PgClient.begin", e))?;
        }

        Ok(Box::new(PgTransactionClient {
            tx: Mutex::new(Some(tx)),
        }))
    }
}

/// An open transaction. Queries issued through it run sequentially
/// on the transaction's connection.
pub struct PgTransactionClient {
    tx: Mutex<Option<sqlx::Transaction<'static, sqlx::Postgres>>>,
}

impl PgTransactionClient {
    fn closed_error(op: &str) -> crate::error::Error {
        ExecError::message(op, "transaction already closed").into()
    }
}

#[async_trait]
impl Client for PgTransactionClient {
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Row>> {
        let mut guard = self.tx.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| Self::closed_error("PgTransactionClient.fetch_rows"))?;
        let rows = sqlx::query(sql)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| ExecError::new("PgTransactionClient.fetch_rows", e))?;
        rows.iter().map(row_to_json).collect()
    }

    async fn begin(&self, _opts: TxOptions) -> Result<Box<dyn ClientTransaction>> {
        Err(ExecError::message("PgTransactionClient.begin", "nested transactions are not supported").into())
    }
}

#[async_trait]
impl ClientTransaction for PgTransactionClient {
    async fn commit(self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .into_inner()
            .ok_or_else(|| Self::closed_error("PgTransactionClient.commit"))?;
        tx.commit()
            .await
            .map_err(|e| ExecError::new("PgTransactionClient.commit", e).into())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .into_inner()
            .ok_or_else(|| Self::closed_error("PgTransactionClient.rollback"))?;
        tx.rollback()
            .await
            .map_err(|e| ExecError::new("PgTransactionClient.rollback", e).into())
    }
}

fn row_to_json(row: &PgRow) -> Result<Row> {
    let mut out = serde_json::Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Result<Value> {
    let raw = row
        .try_get_raw(idx)
        .map_err(|e| ExecError::new("PgClient.decode", e))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let decode_err = |e: sqlx::Error| ExecError::new("PgClient.decode", e);

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(idx).map_err(decode_err)?),
        "INT2" => Value::from(row.try_get::<i16, _>(idx).map_err(decode_err)?),
        "INT4" => Value::from(row.try_get::<i32, _>(idx).map_err(decode_err)?),
        "INT8" => Value::from(row.try_get::<i64, _>(idx).map_err(decode_err)?),
        "FLOAT4" => float_value(row.try_get::<f32, _>(idx).map_err(decode_err)? as f64),
        "FLOAT8" => float_value(row.try_get::<f64, _>(idx).map_err(decode_err)?),
        "NUMERIC" => {
            let decimal = row.try_get::<BigDecimal, _>(idx).map_err(decode_err)?;
            let repr = decimal.to_string();
            match repr.parse::<f64>() {
                Ok(f) => float_value(f),
                Err(_) => Value::String(repr),
            }
        }
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => {
            Value::String(row.try_get::<String, _>(idx).map_err(decode_err)?)
        }
        "TIMESTAMPTZ" => Value::String(
            row.try_get::<DateTime<Utc>, _>(idx)
                .map_err(decode_err)?
                .to_rfc3339(),
        ),
        "TIMESTAMP" => Value::String(
            row.try_get::<NaiveDateTime, _>(idx)
                .map_err(decode_err)?
                .to_string(),
        ),
        "DATE" => Value::String(
            row.try_get::<NaiveDate, _>(idx)
                .map_err(decode_err)?
                .to_string(),
        ),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx).map_err(decode_err)?,
        _ => match row.try_get::<String, _>(idx) {
            Ok(s) => Value::String(s),
            Err(e) => return Err(decode_err(e).into()),
        },
    };
    Ok(value)
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
