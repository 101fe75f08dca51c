// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Catalog Store
//!
//! Production `CatalogStore` backed by the `registry_*`, `portal_*`,
//! `card_grant`, `service_grant` and `bootstrap_state` tables (see
//! `cli/migrations`). Attribute bags are stored as JSONB.
//!
//! Per-twin serialization uses a transaction-scoped advisory lock on
//! `hashtextextended(twin_id, 0)`; linked cards are additionally row-locked
//! with `FOR UPDATE`. Event rows take `clock_timestamp()` so timestamps
//! follow insertion order within one session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::domain::events::{CatalogEvent, CatalogEventType, NewCatalogEvent};
use crate::domain::portal::{CardGrant, CardId, PortalCard, ServiceGrant, User, UserId};
use crate::domain::repository::{CatalogStore, CatalogTransaction, RepositoryError};
use crate::domain::service::{Service, ServiceCategory, ServiceId};
use crate::domain::twin::{Twin, TwinFilter, TwinId};

const TWIN_COLUMNS: &str =
    "twin_id, tenant, metadata, interfaces, dependencies, created_at, updated_at";
const SERVICE_COLUMNS: &str =
    "service_id, name, tenant, category, interfaces, health, twin_ref, created_at, updated_at";
const CARD_COLUMNS: &str = "card_id, name, url, linked_twin, created_at, updated_at";
const USER_COLUMNS: &str = "user_id, username, email, is_staff, created_at";

pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &PgRow, column: &str) -> Result<T, RepositoryError> {
    let value: Value = row.try_get(column)?;
    Ok(serde_json::from_value(value)?)
}

fn twin_from_row(row: &PgRow) -> Result<Twin, RepositoryError> {
    Ok(Twin {
        twin_id: TwinId(row.try_get("twin_id")?),
        tenant: row.try_get("tenant")?,
        metadata: json_column(row, "metadata")?,
        interfaces: json_column(row, "interfaces")?,
        dependencies: json_column(row, "dependencies")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn service_from_row(row: &PgRow) -> Result<Service, RepositoryError> {
    let category: String = row.try_get("category")?;
    let category = category
        .parse::<ServiceCategory>()
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
    let twin_ref: Option<String> = row.try_get("twin_ref")?;

    Ok(Service {
        service_id: ServiceId(row.try_get("service_id")?),
        name: row.try_get("name")?,
        tenant: row.try_get("tenant")?,
        category,
        interfaces: json_column(row, "interfaces")?,
        health: row.try_get("health")?,
        twin_ref: twin_ref.map(TwinId),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn card_from_row(row: &PgRow) -> Result<PortalCard, RepositoryError> {
    let linked_twin: Option<String> = row.try_get("linked_twin")?;
    Ok(PortalCard {
        card_id: CardId(row.try_get("card_id")?),
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        linked_twin: linked_twin.map(TwinId),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, RepositoryError> {
    Ok(User {
        user_id: UserId(row.try_get("user_id")?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        is_staff: row.try_get("is_staff")?,
        created_at: row.try_get("created_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<CatalogEvent, RepositoryError> {
    let event_type: String = row.try_get("event_type")?;
    Ok(CatalogEvent {
        event_id: row.try_get("id")?,
        tenant: row.try_get("tenant")?,
        event_type: event_type
            .parse::<CatalogEventType>()
            .map_err(RepositoryError::Serialization)?,
        payload: row.try_get("payload")?,
        created_at: row.try_get("created_at")?,
    })
}

fn collect_rows<T>(
    rows: Vec<PgRow>,
    map: impl Fn(&PgRow) -> Result<T, RepositoryError>,
) -> Result<Vec<T>, RepositoryError> {
    rows.iter().map(map).collect()
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn find_twin(&self, id: &TwinId) -> Result<Option<Twin>, RepositoryError> {
        let sql = format!("SELECT {} FROM registry_twin WHERE twin_id = $1", TWIN_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(twin_from_row).transpose()
    }

    fn stream_twins(&self, filter: TwinFilter) -> BoxStream<'_, Result<Twin, RepositoryError>> {
        sqlx::query(
            r#"
            SELECT twin_id, tenant, metadata, interfaces, dependencies, created_at, updated_at
            FROM registry_twin
            WHERE ($1::text IS NULL OR tenant = $1)
              AND ($2::text IS NULL OR metadata->>'status' = $2)
              AND ($3::text IS NULL OR metadata->'domain' ? $3)
            ORDER BY twin_id
            "#,
        )
        .bind(filter.tenant)
        .bind(filter.status)
        .bind(filter.domain)
        .fetch(&self.pool)
        .map(|row| row.map_err(RepositoryError::from).and_then(|r| twin_from_row(&r)))
        .boxed()
    }

    async fn list_services(&self, tenant: Option<&str>) -> Result<Vec<Service>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM registry_service WHERE ($1::text IS NULL OR tenant = $1) ORDER BY created_at, service_id",
            SERVICE_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(tenant).fetch_all(&self.pool).await?;
        collect_rows(rows, service_from_row)
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {} FROM portal_user WHERE user_id = $1", USER_COLUMNS);
        let row = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {} FROM portal_user WHERE username = $1", USER_COLUMNS);
        let row = sqlx::query(&sql).bind(username).fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>, RepositoryError> {
        let sql = format!("SELECT {} FROM portal_user ORDER BY username", USER_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        collect_rows(rows, user_from_row)
    }

    async fn find_card(&self, id: CardId) -> Result<Option<PortalCard>, RepositoryError> {
        let sql = format!("SELECT {} FROM portal_card WHERE card_id = $1", CARD_COLUMNS);
        let row = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await?;
        row.as_ref().map(card_from_row).transpose()
    }

    async fn list_cards(&self) -> Result<Vec<PortalCard>, RepositoryError> {
        let sql = format!("SELECT {} FROM portal_card ORDER BY created_at, card_id", CARD_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        collect_rows(rows, card_from_row)
    }

    async fn cards_granted_to(&self, user: UserId) -> Result<Vec<PortalCard>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT c.card_id, c.name, c.url, c.linked_twin, c.created_at, c.updated_at
            FROM portal_card c
            JOIN card_grant g ON g.card_id = c.card_id
            WHERE g.user_id = $1
            ORDER BY c.created_at, c.card_id
            "#,
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await?;
        collect_rows(rows, card_from_row)
    }

    async fn services_granted_to(&self, user: UserId) -> Result<Vec<ServiceId>, RepositoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT service_id FROM service_grant WHERE user_id = $1")
            .bind(user.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(ServiceId).collect())
    }

    async fn list_card_grants(&self, user: Option<UserId>) -> Result<Vec<CardGrant>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_id, card_id FROM card_grant WHERE ($1::uuid IS NULL OR user_id = $1) ORDER BY user_id, card_id",
        )
        .bind(user.map(|u| u.0))
        .fetch_all(&self.pool)
        .await?;
        collect_rows(rows, |row| {
            Ok(CardGrant {
                user_id: UserId(row.try_get("user_id")?),
                card_id: CardId(row.try_get("card_id")?),
            })
        })
    }

    async fn list_service_grants(&self, user: Option<UserId>) -> Result<Vec<ServiceGrant>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_id, service_id FROM service_grant WHERE ($1::uuid IS NULL OR user_id = $1) ORDER BY user_id, service_id",
        )
        .bind(user.map(|u| u.0))
        .fetch_all(&self.pool)
        .await?;
        collect_rows(rows, |row| {
            Ok(ServiceGrant {
                user_id: UserId(row.try_get("user_id")?),
                service_id: ServiceId(row.try_get("service_id")?),
            })
        })
    }

    async fn events_since(
        &self,
        tenant: &str,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CatalogEvent>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant, event_type, payload, created_at
            FROM portal_event
            WHERE tenant = $1 AND created_at > $2
            ORDER BY created_at, id
            LIMIT $3
            "#,
        )
        .bind(tenant)
        .bind(after)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        collect_rows(rows, event_from_row)
    }

    async fn bootstrap_applied(&self, key: &str) -> Result<bool, RepositoryError> {
        let applied: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM bootstrap_state WHERE key = $1)")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        Ok(applied)
    }
}

pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTransaction for PostgresTransaction {
    async fn lock_twin(&mut self, id: &TwinId) -> Result<(), RepositoryError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find_twin(&mut self, id: &TwinId) -> Result<Option<Twin>, RepositoryError> {
        let sql = format!("SELECT {} FROM registry_twin WHERE twin_id = $1", TWIN_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(twin_from_row).transpose()
    }

    async fn save_twin(&mut self, twin: &Twin) -> Result<bool, RepositoryError> {
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO registry_twin (
                twin_id, tenant, metadata, interfaces, dependencies, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (twin_id) DO UPDATE SET
                tenant = EXCLUDED.tenant,
                metadata = EXCLUDED.metadata,
                interfaces = EXCLUDED.interfaces,
                dependencies = EXCLUDED.dependencies,
                updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0)
            "#,
        )
        .bind(twin.twin_id.as_str())
        .bind(&twin.tenant)
        .bind(serde_json::to_value(&twin.metadata)?)
        .bind(serde_json::to_value(&twin.interfaces)?)
        .bind(serde_json::to_value(&twin.dependencies)?)
        .bind(twin.created_at)
        .bind(twin.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(inserted)
    }

    async fn delete_twin(&mut self, id: &TwinId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM registry_twin WHERE twin_id = $1")
            .bind(id.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_service(&mut self, service: &Service) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO registry_service (
                service_id, name, tenant, category, interfaces, health, twin_ref, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (service_id) DO UPDATE SET
                name = EXCLUDED.name,
                tenant = EXCLUDED.tenant,
                interfaces = EXCLUDED.interfaces,
                health = EXCLUDED.health,
                twin_ref = EXCLUDED.twin_ref,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(service.service_id.0)
        .bind(&service.name)
        .bind(&service.tenant)
        .bind(service.category.as_str())
        .bind(serde_json::to_value(&service.interfaces)?)
        .bind(&service.health)
        .bind(service.twin_ref.as_ref().map(TwinId::as_str))
        .bind(service.created_at)
        .bind(service.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn cards_linked_to(&mut self, id: &TwinId) -> Result<Vec<PortalCard>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM portal_card WHERE linked_twin = $1 ORDER BY created_at, card_id FOR UPDATE",
            CARD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_all(&mut *self.tx)
            .await?;
        collect_rows(rows, card_from_row)
    }

    async fn find_unlinked_card_by_name(&mut self, name: &str) -> Result<Option<PortalCard>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM portal_card WHERE linked_twin IS NULL AND name = $1 \
             ORDER BY created_at, card_id LIMIT 1 FOR UPDATE",
            CARD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(card_from_row).transpose()
    }

    async fn save_card(&mut self, card: &PortalCard) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO portal_card (card_id, name, url, linked_twin, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (card_id) DO UPDATE SET
                name = EXCLUDED.name,
                url = EXCLUDED.url,
                linked_twin = EXCLUDED.linked_twin,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(card.card_id.0)
        .bind(&card.name)
        .bind(&card.url)
        .bind(card.linked_twin.as_ref().map(TwinId::as_str))
        .bind(card.created_at)
        .bind(card.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_card(&mut self, id: CardId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM portal_card WHERE card_id = $1")
            .bind(id.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn card_grantees(&mut self, card: CardId) -> Result<Vec<UserId>, RepositoryError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM card_grant WHERE card_id = $1 ORDER BY user_id")
                .bind(card.0)
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn grant_card(&mut self, user: UserId, card: CardId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO card_grant (user_id, card_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user.0)
        .bind(card.0)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_card(&mut self, user: UserId, card: CardId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM card_grant WHERE user_id = $1 AND card_id = $2")
            .bind(user.0)
            .bind(card.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn move_card_grants(&mut self, from: CardId, to: CardId) -> Result<usize, RepositoryError> {
        let result = sqlx::query(
            r#"
            WITH moved AS (
                DELETE FROM card_grant WHERE card_id = $1 RETURNING user_id
            )
            INSERT INTO card_grant (user_id, card_id)
            SELECT user_id, $2 FROM moved
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(from.0)
        .bind(to.0)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn service_grantees(&mut self, service: ServiceId) -> Result<Vec<UserId>, RepositoryError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM service_grant WHERE service_id = $1 ORDER BY user_id")
                .bind(service.0)
                .fetch_all(&mut *self.tx)
                .await?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn grant_service(&mut self, user: UserId, service: ServiceId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO service_grant (user_id, service_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user.0)
        .bind(service.0)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_service(&mut self, user: UserId, service: ServiceId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM service_grant WHERE user_id = $1 AND service_id = $2")
            .bind(user.0)
            .bind(service.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO portal_user (user_id, username, email, is_staff, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.user_id.0)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.is_staff)
        .bind(user.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_user(&mut self, id: UserId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM portal_user WHERE user_id = $1")
            .bind(id.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_user_ids(&mut self) -> Result<Vec<UserId>, RepositoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT user_id FROM portal_user ORDER BY user_id")
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn append_event(&mut self, event: &NewCatalogEvent) -> Result<CatalogEvent, RepositoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO portal_event (tenant, event_type, payload)
            VALUES ($1, $2, $3)
            RETURNING id, tenant, event_type, payload, created_at
            "#,
        )
        .bind(&event.tenant)
        .bind(event.event_type.as_str())
        .bind(&event.payload)
        .fetch_one(&mut *self.tx)
        .await?;
        event_from_row(&row)
    }

    async fn mark_bootstrap(&mut self, key: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("INSERT INTO bootstrap_state (key) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn savepoint(&mut self, name: &'static str) -> Result<(), RepositoryError> {
        let sql = format!("SAVEPOINT {}", name);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &'static str) -> Result<(), RepositoryError> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", name);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &'static str) -> Result<(), RepositoryError> {
        let sql = format!("RELEASE SAVEPOINT {}", name);
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }
}
