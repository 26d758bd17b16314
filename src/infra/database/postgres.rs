//! PostgreSQL store for the versioned marketplace tables.

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, Attribute, Collection, DatabaseClient, DatabaseError, EntityStore, Fraction,
    Ownership, RecordStatus, Rental, Token, Transaction, VersionedRecord,
};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL database client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(err: sqlx::Error) -> AppError {
    AppError::Database(DatabaseError::from(err))
}

/// Column mapping between a record type and its table.
///
/// `COLUMNS` lists the kind-specific columns in the order `bind_columns`
/// binds them. `id`, `previous_id`, `status`, `transaction_hash` and the
/// timestamps are handled for every table alike.
pub trait PgRecord: VersionedRecord + Unpin {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn bind_columns<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q>;

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error>;
}

const SHARED_COLUMNS: [&str; 3] = ["previous_id", "status", "transaction_hash"];

fn all_columns<R: PgRecord>() -> impl Iterator<Item = &'static str> {
    R::COLUMNS.iter().copied().chain(SHARED_COLUMNS)
}

fn select_sql<R: PgRecord>(filter: &str) -> String {
    let columns: Vec<&str> = all_columns::<R>().collect();
    format!(
        "SELECT id, {}, created_at, updated_at FROM {} {}",
        columns.join(", "),
        R::TABLE,
        filter
    )
}

fn update_sql<R: PgRecord>() -> String {
    let assignments: Vec<String> = all_columns::<R>()
        .enumerate()
        .map(|(i, column)| format!("{} = ${}", column, i + 2))
        .collect();
    format!(
        "UPDATE {} SET {}, updated_at = NOW() WHERE id = $1",
        R::TABLE,
        assignments.join(", ")
    )
}

fn insert_sql<R: PgRecord>() -> String {
    let columns: Vec<&str> = all_columns::<R>().collect();
    let placeholders: Vec<String> = (1..=columns.len() + 1).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {} (id, {}) VALUES ({})",
        R::TABLE,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Binds `$1` (id) followed by every column in `all_columns` order.
fn bind_record<'q, R: PgRecord>(sql: &'q str, record: &'q R) -> PgQuery<'q> {
    let query = sqlx::query(sql).bind(record.id());
    record
        .bind_columns(query)
        .bind(record.previous_id())
        .bind(record.status().as_str())
        .bind(record.ledger_reference())
}

fn previous_id_from_row(row: &PgRow) -> Result<Option<Uuid>, sqlx::Error> {
    let previous: Option<Uuid> = row.try_get("previous_id")?;
    Ok(previous.filter(|id| !id.is_nil()))
}

fn status_from_row(row: &PgRow) -> Result<RecordStatus, sqlx::Error> {
    let raw: String = row.try_get("status")?;
    raw.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }
}

#[async_trait]
impl<R: PgRecord> EntityStore<R> for PostgresClient {
    #[instrument(skip(self), fields(kind = %R::KIND))]
    async fn list_pending(&self) -> Result<Vec<R>, AppError> {
        let sql = select_sql::<R>("WHERE status = $1 ORDER BY created_at ASC, id ASC");
        let rows = sqlx::query(&sql)
            .bind(RecordStatus::WaitingConfirmation.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter()
            .map(|row| R::from_row(row).map_err(db_error))
            .collect()
    }

    #[instrument(skip(self), fields(kind = %R::KIND))]
    async fn get_by_id(&self, id: Uuid) -> Result<Option<R>, AppError> {
        let sql = select_sql::<R>("WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref()
            .map(|row| R::from_row(row).map_err(db_error))
            .transpose()
    }

    #[instrument(skip(self, record), fields(kind = %R::KIND, id = %record.id()))]
    async fn update(&self, record: &R) -> Result<(), AppError> {
        let sql = update_sql::<R>();
        let result = bind_record(&sql, record)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "{} {}",
                R::KIND,
                record.id()
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %R::KIND))]
    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", R::TABLE);
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, record), fields(kind = %R::KIND, id = %record.id()))]
    async fn insert_pending(&self, record: &R) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        if let Some(previous_id) = record.previous_id() {
            let lock_sql = format!("SELECT status FROM {} WHERE id = $1 FOR UPDATE", R::TABLE);
            let status: Option<String> = sqlx::query_scalar(&lock_sql)
                .bind(previous_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;

            match status.as_deref() {
                None => {
                    return Err(AppError::Database(DatabaseError::Conflict(format!(
                        "{} {} does not exist",
                        R::KIND,
                        previous_id
                    ))));
                }
                Some(status) if status != RecordStatus::Active.as_str() => {
                    return Err(AppError::Database(DatabaseError::Conflict(format!(
                        "{} {} is {}, not active",
                        R::KIND,
                        previous_id,
                        status
                    ))));
                }
                Some(_) => {}
            }

            let rival_sql = format!(
                "SELECT id FROM {} WHERE previous_id = $1 AND status = $2 LIMIT 1",
                R::TABLE
            );
            let rival: Option<Uuid> = sqlx::query_scalar(&rival_sql)
                .bind(previous_id)
                .bind(RecordStatus::WaitingConfirmation.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;

            if let Some(rival) = rival {
                return Err(AppError::Database(DatabaseError::Conflict(format!(
                    "{} {} already superseded by pending {}",
                    R::KIND,
                    previous_id,
                    rival
                ))));
            }
        }

        let sql = insert_sql::<R>();
        bind_record(&sql, record)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    #[instrument(skip(self, superseded), fields(kind = %R::KIND, superseded_id = %superseded.id()))]
    async fn commit_supersede(&self, superseded: &R, pending_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let sql = update_sql::<R>();
        let updated = bind_record(&sql, superseded)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        if updated.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "{} {}",
                R::KIND,
                superseded.id()
            ))));
        }

        let delete_sql = format!("DELETE FROM {} WHERE id = $1", R::TABLE);
        let deleted = sqlx::query(&delete_sql)
            .bind(pending_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        if deleted.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "{} {}",
                R::KIND,
                pending_id
            ))));
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }
}

impl PgRecord for Token {
    const TABLE: &'static str = "tokens";
    const COLUMNS: &'static [&'static str] = &[
        "token_index",
        "title",
        "description",
        "category_id",
        "collection_id",
        "image",
        "uri",
        "source_id",
        "fraction_id",
        "supply",
        "last_price",
        "initial_price",
        "views",
        "number_of_transactions",
        "volume_transactions",
        "creator_id",
        "attributes",
    ];

    fn bind_columns<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(self.token_index)
            .bind(&self.title)
            .bind(&self.description)
            .bind(self.category_id)
            .bind(self.collection_id)
            .bind(&self.image)
            .bind(&self.uri)
            .bind(self.source_id)
            .bind(self.fraction_id)
            .bind(self.supply)
            .bind(self.last_price)
            .bind(self.initial_price)
            .bind(self.views)
            .bind(self.number_of_transactions)
            .bind(self.volume_transactions)
            .bind(self.creator_id)
            .bind(Json(&self.attributes))
    }

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let Json(attributes): Json<Vec<Attribute>> = row.try_get("attributes")?;
        Ok(Self {
            id: row.try_get("id")?,
            previous_id: previous_id_from_row(row)?,
            token_index: row.try_get("token_index")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            category_id: row.try_get("category_id")?,
            collection_id: row.try_get("collection_id")?,
            image: row.try_get("image")?,
            uri: row.try_get("uri")?,
            source_id: row.try_get("source_id")?,
            fraction_id: row.try_get("fraction_id")?,
            supply: row.try_get("supply")?,
            last_price: row.try_get("last_price")?,
            initial_price: row.try_get("initial_price")?,
            views: row.try_get("views")?,
            number_of_transactions: row.try_get("number_of_transactions")?,
            volume_transactions: row.try_get("volume_transactions")?,
            creator_id: row.try_get("creator_id")?,
            attributes,
            status: status_from_row(row)?,
            ledger_reference: row.try_get("transaction_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl PgRecord for Ownership {
    const TABLE: &'static str = "ownerships";
    const COLUMNS: &'static [&'static str] = &[
        "token_id",
        "user_id",
        "quantity",
        "sale_price",
        "rent_cost",
        "available_for_sale",
        "available_for_rent",
    ];

    fn bind_columns<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(self.token_id)
            .bind(self.user_id)
            .bind(self.quantity)
            .bind(self.sale_price)
            .bind(self.rent_cost)
            .bind(self.available_for_sale)
            .bind(self.available_for_rent)
    }

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            previous_id: previous_id_from_row(row)?,
            token_id: row.try_get("token_id")?,
            user_id: row.try_get("user_id")?,
            quantity: row.try_get("quantity")?,
            sale_price: row.try_get("sale_price")?,
            rent_cost: row.try_get("rent_cost")?,
            available_for_sale: row.try_get("available_for_sale")?,
            available_for_rent: row.try_get("available_for_rent")?,
            status: status_from_row(row)?,
            ledger_reference: row.try_get("transaction_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl PgRecord for Collection {
    const TABLE: &'static str = "collections";
    const COLUMNS: &'static [&'static str] = &[
        "thumbnail",
        "cover",
        "title",
        "description",
        "views",
        "number_of_items",
        "number_of_transactions",
        "volume_transactions",
        "floor",
        "category_id",
        "creator_id",
    ];

    fn bind_columns<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(self.thumbnail.as_deref())
            .bind(self.cover.as_deref())
            .bind(self.title.as_deref())
            .bind(self.description.as_deref())
            .bind(self.views)
            .bind(self.number_of_items)
            .bind(self.number_of_transactions)
            .bind(self.volume_transactions)
            .bind(self.floor)
            .bind(self.category_id)
            .bind(self.creator_id)
    }

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            previous_id: previous_id_from_row(row)?,
            thumbnail: row.try_get("thumbnail")?,
            cover: row.try_get("cover")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            views: row.try_get("views")?,
            number_of_items: row.try_get("number_of_items")?,
            number_of_transactions: row.try_get("number_of_transactions")?,
            volume_transactions: row.try_get("volume_transactions")?,
            floor: row.try_get("floor")?,
            category_id: row.try_get("category_id")?,
            creator_id: row.try_get("creator_id")?,
            status: status_from_row(row)?,
            ledger_reference: row.try_get("transaction_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl PgRecord for Rental {
    const TABLE: &'static str = "rentals";
    const COLUMNS: &'static [&'static str] =
        &["user_id", "owner_id", "token_id", "ownership_id", "timestamp"];

    fn bind_columns<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(self.user_id)
            .bind(self.owner_id)
            .bind(self.token_id)
            .bind(self.ownership_id)
            .bind(self.timestamp)
    }

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            previous_id: previous_id_from_row(row)?,
            user_id: row.try_get("user_id")?,
            owner_id: row.try_get("owner_id")?,
            token_id: row.try_get("token_id")?,
            ownership_id: row.try_get("ownership_id")?,
            timestamp: row.try_get("timestamp")?,
            status: status_from_row(row)?,
            ledger_reference: row.try_get("transaction_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl PgRecord for Transaction {
    const TABLE: &'static str = "transactions";
    const COLUMNS: &'static [&'static str] = &[
        "user_from_id",
        "user_to_id",
        "ownership_id",
        "rental_id",
        "token_id",
        "collection_id",
        "transaction_type",
        "quantity",
        "amount",
        "gas_fee",
    ];

    fn bind_columns<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query
            .bind(self.user_from_id)
            .bind(self.user_to_id)
            .bind(self.ownership_id)
            .bind(self.rental_id)
            .bind(self.token_id)
            .bind(self.collection_id)
            .bind(&self.transaction_type)
            .bind(self.quantity)
            .bind(self.amount)
            .bind(self.gas_fee)
    }

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            previous_id: previous_id_from_row(row)?,
            user_from_id: row.try_get("user_from_id")?,
            user_to_id: row.try_get("user_to_id")?,
            ownership_id: row.try_get("ownership_id")?,
            rental_id: row.try_get("rental_id")?,
            token_id: row.try_get("token_id")?,
            collection_id: row.try_get("collection_id")?,
            transaction_type: row.try_get("transaction_type")?,
            quantity: row.try_get("quantity")?,
            amount: row.try_get("amount")?,
            gas_fee: row.try_get("gas_fee")?,
            status: status_from_row(row)?,
            ledger_reference: row.try_get("transaction_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl PgRecord for Fraction {
    const TABLE: &'static str = "fractions";
    const COLUMNS: &'static [&'static str] = &["token_parent_id", "token_fraction_id"];

    fn bind_columns<'q>(&'q self, query: PgQuery<'q>) -> PgQuery<'q> {
        query.bind(self.token_parent_id).bind(self.token_fraction_id)
    }

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            previous_id: previous_id_from_row(row)?,
            token_parent_id: row.try_get("token_parent_id")?,
            token_fraction_id: row.try_get("token_fraction_id")?,
            status: status_from_row(row)?,
            ledger_reference: row.try_get("transaction_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
