//! PostgreSQL product cache store.
//!
//! Uses a deadpool-postgres connection pool. Monetary and rating values
//! cross the driver as text and are cast to `NUMERIC` in SQL, so no binary
//! float is involved at any point.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use favcache_core::config::env_parse;
use favcache_core::{
    CachedProduct, ConfigError, FavcacheError, FavcacheResult, ProductId, Review, StorageError,
    Timestamp,
};
use std::str::FromStr;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, error, info};

use super::traits::ProductCacheStore;

/// Schema for the cache table.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS products_cache (
    id            BIGINT PRIMARY KEY,
    title         TEXT NOT NULL,
    image_url     TEXT NOT NULL,
    price         NUMERIC(12, 2) NOT NULL,
    review_rate   NUMERIC(3, 2),
    review_count  INTEGER,
    fetched_at    TIMESTAMPTZ NOT NULL
)
"#;

const SELECT_COLUMNS: &str = "id, title, image_url, price::text AS price, \
     review_rate::text AS review_rate, review_count, fetched_at";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long to wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "favcache".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `FAVCACHE_DB_HOST`, `FAVCACHE_DB_PORT`, `FAVCACHE_DB_NAME`
    /// - `FAVCACHE_DB_USER`, `FAVCACHE_DB_PASSWORD`
    /// - `FAVCACHE_DB_POOL_SIZE` (default: 16)
    /// - `FAVCACHE_DB_TIMEOUT` in seconds (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: std::env::var("FAVCACHE_DB_HOST").unwrap_or(defaults.host),
            port: env_parse("FAVCACHE_DB_PORT")?.unwrap_or(defaults.port),
            dbname: std::env::var("FAVCACHE_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("FAVCACHE_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("FAVCACHE_DB_PASSWORD").unwrap_or_default(),
            max_size: env_parse("FAVCACHE_DB_POOL_SIZE")?.unwrap_or(defaults.max_size),
            timeout: env_parse::<u64>("FAVCACHE_DB_TIMEOUT")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_size".to_string(),
                value: "0".to_string(),
                reason: "pool needs at least one connection".to_string(),
            });
        }
        Ok(())
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> FavcacheResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            error!(host = %self.host, port = self.port, error = %e, "Failed to create connection pool");
            backend(format!("Failed to create pool: {}", e))
        })
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Product cache backed by the `products_cache` table.
#[derive(Clone)]
pub struct PgProductCache {
    pool: Pool,
}

impl PgProductCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> FavcacheResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Create the cache table if it does not exist yet.
    pub async fn ensure_schema(&self) -> FavcacheResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA_SQL).await.map_err(db_error)?;
        info!("products_cache schema ready");
        Ok(())
    }

    /// Get a connection from the pool.
    pub async fn get_conn(&self) -> FavcacheResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| {
                error!(error = %e, pool_size = self.pool.status().size, "Failed to get connection");
                backend(format!("Failed to get connection: {}", e))
            })
    }

    /// Current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }
}

impl std::fmt::Debug for PgProductCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgProductCache")
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

#[async_trait]
impl ProductCacheStore for PgProductCache {
    async fn get_one(&self, id: ProductId) -> FavcacheResult<Option<CachedProduct>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM products_cache WHERE id = $1", SELECT_COLUMNS);
        let row = conn.query_opt(&sql, &[&id]).await.map_err(db_error)?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn get_many(&self, ids: &[ProductId]) -> FavcacheResult<Vec<CachedProduct>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM products_cache WHERE id = ANY($1)",
            SELECT_COLUMNS
        );
        let ids: Vec<ProductId> = ids.to_vec();
        let rows = conn.query(&sql, &[&ids]).await.map_err(db_error)?;
        rows.iter().map(product_from_row).collect()
    }

    async fn insert(&self, product: &CachedProduct) -> FavcacheResult<()> {
        let conn = self.get_conn().await?;
        let (review_rate, review_count) = review_params(product.review.as_ref());
        let result = conn
            .execute(
                "INSERT INTO products_cache \
                 (id, title, image_url, price, review_rate, review_count, fetched_at) \
                 VALUES ($1, $2, $3, $4::text::numeric, $5::text::numeric, $6, $7)",
                &[
                    &product.id,
                    &product.title,
                    &product.image_url,
                    &product.price.to_string(),
                    &review_rate,
                    &review_count,
                    &product.fetched_at,
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                debug!(product_id = product.id, "insert hit an existing row");
                Err(StorageError::Conflict { id: product.id }.into())
            }
            Err(e) => Err(db_error(e)),
        }
    }

    async fn refresh(&self, product: &CachedProduct) -> FavcacheResult<CachedProduct> {
        let conn = self.get_conn().await?;
        let (review_rate, review_count) = review_params(product.review.as_ref());
        let sql = format!(
            "UPDATE products_cache SET \
                 title = $2, \
                 image_url = $3, \
                 price = $4::text::numeric, \
                 review_rate = $5::text::numeric, \
                 review_count = $6, \
                 fetched_at = GREATEST($7, fetched_at + INTERVAL '1 microsecond') \
             WHERE id = $1 \
             RETURNING {}",
            SELECT_COLUMNS
        );
        let row = conn
            .query_opt(
                &sql,
                &[
                    &product.id,
                    &product.title,
                    &product.image_url,
                    &product.price.to_string(),
                    &review_rate,
                    &review_count,
                    &product.fetched_at,
                ],
            )
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => product_from_row(&row),
            None => {
                debug!(product_id = product.id, "refresh matched no row");
                Err(StorageError::NotFound { id: product.id }.into())
            }
        }
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn review_params(review: Option<&Review>) -> (Option<String>, Option<i32>) {
    match review {
        Some(r) => (
            Some(r.rate.to_string()),
            Some(i32::try_from(r.count).unwrap_or(i32::MAX)),
        ),
        None => (None, None),
    }
}

fn product_from_row(row: &Row) -> FavcacheResult<CachedProduct> {
    let id: ProductId = row.try_get("id").map_err(db_error)?;
    let title: String = row.try_get("title").map_err(db_error)?;
    let image_url: String = row.try_get("image_url").map_err(db_error)?;
    let price: String = row.try_get("price").map_err(db_error)?;
    let review_rate: Option<String> = row.try_get("review_rate").map_err(db_error)?;
    let review_count: Option<i32> = row.try_get("review_count").map_err(db_error)?;
    let fetched_at: Timestamp = row.try_get("fetched_at").map_err(db_error)?;

    let review = match (review_rate, review_count) {
        (Some(rate), Some(count)) => Some(Review::new(
            parse_decimal("review_rate", &rate)?,
            u32::try_from(count).unwrap_or(0),
        )),
        _ => None,
    };

    Ok(CachedProduct::new(
        id,
        title,
        image_url,
        parse_decimal("price", &price)?,
        review,
        fetched_at,
    ))
}

fn parse_decimal(column: &str, raw: &str) -> FavcacheResult<BigDecimal> {
    BigDecimal::from_str(raw)
        .map_err(|e| backend(format!("Invalid decimal in column {}: {} ({})", column, raw, e)))
}

fn backend(reason: String) -> FavcacheError {
    StorageError::Backend { reason }.into()
}

fn db_error(e: tokio_postgres::Error) -> FavcacheError {
    error!(
        sqlstate = e.code().map(|c| c.code()),
        error = %e,
        "Database error"
    );
    backend(format!("Database error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_params_none() {
        assert_eq!(review_params(None), (None, None));
    }

    #[test]
    fn test_review_params_decimal_text() {
        let review = Review::new(BigDecimal::from_str("4.10").unwrap(), 7);
        let (rate, count) = review_params(Some(&review));
        assert_eq!(BigDecimal::from_str(&rate.unwrap()).unwrap(), review.rate);
        assert_eq!(count, Some(7));
    }

    #[test]
    fn test_parse_decimal_rejects_garbage() {
        let err = parse_decimal("price", "twelve").unwrap_err();
        assert!(format!("{}", err).contains("price"));
    }

    #[test]
    fn test_db_config_zero_pool_rejected() {
        let config = DbConfig {
            max_size: 0,
            ..DbConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
