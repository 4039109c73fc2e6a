//! SeaORM-backed ledger storage.
//!
//! Production persistence for users, subscriptions, sites, HTML backups,
//! drafts, and processed webhook events.

use async_trait::async_trait;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use uuid::Uuid;

use super::store::{
    HtmlBackup, LedgerStore, SiteJoined, SiteRecord, SubscriptionRecord, SubscriptionStatus,
    UserRecord,
};
use crate::error::Result;

// =============================================================================
// SeaORM Entities
// =============================================================================

mod entity {
    use sea_orm::entity::prelude::*;

    pub mod user {
        use super::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "users")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub id: Uuid,
            #[sea_orm(unique)]
            pub email: String,
            pub external_customer_id: String,
            pub created_at: DateTimeWithTimeZone,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod subscription {
        use super::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "subscriptions")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub id: Uuid,
            pub user_id: Uuid,
            #[sea_orm(unique)]
            pub external_subscription_id: String,
            pub status: String,
            pub current_period_start: i64,
            pub current_period_end: i64,
            pub cancel_at_period_end: bool,
            pub canceled_at: Option<i64>,
            pub created_at: DateTimeWithTimeZone,
            pub updated_at: DateTimeWithTimeZone,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod site {
        use super::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "sites")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub id: Uuid,
            pub user_id: Uuid,
            pub subscription_id: Option<Uuid>,
            #[sea_orm(unique)]
            pub subdomain: String,
            pub site_label: String,
            pub is_active: bool,
            #[sea_orm(column_type = "JsonBinary")]
            pub generation_inputs: Json,
            pub created_at: DateTimeWithTimeZone,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod html_backup {
        use super::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "html_backups")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub subdomain: String,
            #[sea_orm(column_type = "Text")]
            pub html: String,
            pub created_at: i64,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod site_draft {
        use super::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "site_drafts")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub subdomain: String,
            #[sea_orm(column_type = "Text")]
            pub html: String,
            pub created_at: DateTimeWithTimeZone,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod processed_event {
        use super::*;

        #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
        #[sea_orm(table_name = "processed_events")]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub event_id: String,
            pub processed_at: DateTimeWithTimeZone,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }
}

use entity::{html_backup, processed_event, site, site_draft, subscription, user};

// =============================================================================
// Helpers
// =============================================================================

/// Convert i64 to u64 safely (negative values become 0).
#[inline]
fn i64_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Convert u64 to i64 safely (values > i64::MAX become i64::MAX).
#[inline]
fn u64_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn model_to_user(model: user::Model) -> UserRecord {
    UserRecord {
        id: model.id,
        email: model.email,
        external_customer_id: model.external_customer_id,
    }
}

fn model_to_subscription(model: subscription::Model) -> SubscriptionRecord {
    SubscriptionRecord {
        id: model.id,
        user_id: model.user_id,
        external_subscription_id: model.external_subscription_id,
        status: SubscriptionStatus::from_processor(&model.status),
        current_period_start: i64_to_u64(model.current_period_start),
        current_period_end: i64_to_u64(model.current_period_end),
        cancel_at_period_end: model.cancel_at_period_end,
        canceled_at: model.canceled_at.map(i64_to_u64),
    }
}

fn model_to_site(model: site::Model) -> SiteRecord {
    SiteRecord {
        id: model.id,
        user_id: model.user_id,
        subscription_id: model.subscription_id,
        subdomain: model.subdomain,
        site_label: model.site_label,
        is_active: model.is_active,
        generation_inputs: model.generation_inputs,
    }
}

// =============================================================================
// SeaOrmLedger
// =============================================================================

/// SeaORM-backed ledger implementing [`LedgerStore`].
///
/// Constructed explicitly and passed to each component at startup; the
/// underlying pool may be lazy, but the client itself always exists.
#[derive(Clone, Debug)]
pub struct SeaOrmLedger {
    db: DatabaseConnection,
}

impl SeaOrmLedger {
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Best-effort schema creation.
    ///
    /// Creates every ledger table if it does not exist. Failures are the
    /// caller's to log; this is a convenience for fresh environments, not a
    /// migration system.
    pub async fn ensure_schema(&self) -> Result<()> {
        const DDL: &[&str] = &[
            "CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                external_customer_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS subscriptions (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                external_subscription_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                current_period_start BIGINT NOT NULL DEFAULT 0,
                current_period_end BIGINT NOT NULL DEFAULT 0,
                cancel_at_period_end BOOLEAN NOT NULL DEFAULT FALSE,
                canceled_at BIGINT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS sites (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                subscription_id UUID,
                subdomain TEXT NOT NULL UNIQUE,
                site_label TEXT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                generation_inputs JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS html_backups (
                subdomain TEXT PRIMARY KEY,
                html TEXT NOT NULL,
                created_at BIGINT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS site_drafts (
                subdomain TEXT PRIMARY KEY,
                html TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS processed_events (
                event_id TEXT PRIMARY KEY,
                processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        ];

        for ddl in DDL {
            self.db.execute_unprepared(ddl).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for SeaOrmLedger {
    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let found = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&self.db)
            .await?;
        Ok(found.map(model_to_user))
    }

    async fn upsert_user(&self, email: &str, external_customer_id: &str) -> Result<UserRecord> {
        tracing::debug!(email = %email, "upserting user");

        let now = chrono::Utc::now().fixed_offset();
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            external_customer_id: Set(external_customer_id.to_string()),
            created_at: Set(now),
        };

        user::Entity::insert(model)
            .on_conflict(
                OnConflict::column(user::Column::Email)
                    .update_column(user::Column::ExternalCustomerId)
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        // Re-read so callers get the surviving row id on conflict.
        self.find_user_by_email(email)
            .await?
            .ok_or_else(|| crate::error::SitewardError::internal("user upsert did not persist"))
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    async fn find_subscription(&self, external_id: &str) -> Result<Option<SubscriptionRecord>> {
        let found = subscription::Entity::find()
            .filter(subscription::Column::ExternalSubscriptionId.eq(external_id))
            .one(&self.db)
            .await?;
        Ok(found.map(model_to_subscription))
    }

    async fn upsert_subscription(&self, sub: &SubscriptionRecord) -> Result<()> {
        tracing::debug!(
            external_subscription_id = %sub.external_subscription_id,
            status = %sub.status,
            "upserting subscription"
        );

        let now = chrono::Utc::now().fixed_offset();
        let model = subscription::ActiveModel {
            id: Set(sub.id),
            user_id: Set(sub.user_id),
            external_subscription_id: Set(sub.external_subscription_id.clone()),
            status: Set(sub.status.as_str().to_string()),
            current_period_start: Set(u64_to_i64(sub.current_period_start)),
            current_period_end: Set(u64_to_i64(sub.current_period_end)),
            cancel_at_period_end: Set(sub.cancel_at_period_end),
            canceled_at: Set(sub.canceled_at.map(u64_to_i64)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        subscription::Entity::insert(model)
            .on_conflict(
                OnConflict::column(subscription::Column::ExternalSubscriptionId)
                    .update_columns([
                        subscription::Column::Status,
                        subscription::Column::CurrentPeriodStart,
                        subscription::Column::CurrentPeriodEnd,
                        subscription::Column::CancelAtPeriodEnd,
                        subscription::Column::CanceledAt,
                        subscription::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Sites
    // -------------------------------------------------------------------------

    async fn find_site(&self, subdomain: &str) -> Result<Option<SiteRecord>> {
        let found = site::Entity::find()
            .filter(site::Column::Subdomain.eq(subdomain))
            .one(&self.db)
            .await?;
        Ok(found.map(model_to_site))
    }

    async fn find_site_by_subscription(&self, subscription_id: Uuid) -> Result<Option<SiteRecord>> {
        let found = site::Entity::find()
            .filter(site::Column::SubscriptionId.eq(subscription_id))
            .one(&self.db)
            .await?;
        Ok(found.map(model_to_site))
    }

    async fn upsert_site(&self, record: &SiteRecord) -> Result<()> {
        tracing::debug!(subdomain = %record.subdomain, "upserting site");

        let now = chrono::Utc::now().fixed_offset();
        let model = site::ActiveModel {
            id: Set(record.id),
            user_id: Set(record.user_id),
            subscription_id: Set(record.subscription_id),
            subdomain: Set(record.subdomain.clone()),
            site_label: Set(record.site_label.clone()),
            is_active: Set(record.is_active),
            generation_inputs: Set(record.generation_inputs.clone()),
            created_at: Set(now),
        };

        site::Entity::insert(model)
            .on_conflict(
                OnConflict::column(site::Column::Subdomain)
                    .update_columns([
                        site::Column::SubscriptionId,
                        site::Column::SiteLabel,
                        site::Column::IsActive,
                        site::Column::GenerationInputs,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn set_site_active(&self, subdomain: &str, active: bool) -> Result<()> {
        tracing::debug!(subdomain = %subdomain, active = active, "setting site activation");

        site::Entity::update_many()
            .col_expr(site::Column::IsActive, sea_orm::sea_query::Expr::value(active))
            .filter(site::Column::Subdomain.eq(subdomain))
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn list_sites(&self) -> Result<Vec<SiteJoined>> {
        // Three queries joined in memory; the reconciliation batch runs at
        // most daily over a modest site count.
        let sites = site::Entity::find().all(&self.db).await?;
        let subscriptions = subscription::Entity::find().all(&self.db).await?;
        let users = user::Entity::find().all(&self.db).await?;

        let subs_by_id: std::collections::HashMap<Uuid, SubscriptionRecord> = subscriptions
            .into_iter()
            .map(|m| (m.id, model_to_subscription(m)))
            .collect();
        let emails_by_user: std::collections::HashMap<Uuid, String> =
            users.into_iter().map(|m| (m.id, m.email)).collect();

        Ok(sites
            .into_iter()
            .map(|m| {
                let record = model_to_site(m);
                let subscription = record
                    .subscription_id
                    .and_then(|id| subs_by_id.get(&id).cloned());
                let owner_email = emails_by_user
                    .get(&record.user_id)
                    .cloned()
                    .unwrap_or_default();
                SiteJoined {
                    site: record,
                    subscription,
                    owner_email,
                }
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // HTML backups
    // -------------------------------------------------------------------------

    async fn get_backup(&self, subdomain: &str) -> Result<Option<HtmlBackup>> {
        let found = html_backup::Entity::find_by_id(subdomain).one(&self.db).await?;
        Ok(found.map(|m| HtmlBackup {
            subdomain: m.subdomain,
            html: m.html,
            created_at: i64_to_u64(m.created_at),
        }))
    }

    async fn upsert_backup(&self, subdomain: &str, html: &str) -> Result<()> {
        tracing::debug!(subdomain = %subdomain, bytes = html.len(), "upserting html backup");

        let now = chrono::Utc::now().timestamp();
        let model = html_backup::ActiveModel {
            subdomain: Set(subdomain.to_string()),
            html: Set(html.to_string()),
            created_at: Set(now),
        };

        html_backup::Entity::insert(model)
            .on_conflict(
                OnConflict::column(html_backup::Column::Subdomain)
                    .update_columns([html_backup::Column::Html, html_backup::Column::CreatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Provisional drafts
    // -------------------------------------------------------------------------

    async fn save_draft(&self, subdomain: &str, html: &str) -> Result<()> {
        let now = chrono::Utc::now().fixed_offset();
        let model = site_draft::ActiveModel {
            subdomain: Set(subdomain.to_string()),
            html: Set(html.to_string()),
            created_at: Set(now),
        };

        site_draft::Entity::insert(model)
            .on_conflict(
                OnConflict::column(site_draft::Column::Subdomain)
                    .update_columns([site_draft::Column::Html, site_draft::Column::CreatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn take_draft(&self, subdomain: &str) -> Result<Option<String>> {
        let found = site_draft::Entity::find_by_id(subdomain).one(&self.db).await?;
        match found {
            Some(model) => {
                site_draft::Entity::delete_by_id(subdomain).exec(&self.db).await?;
                Ok(Some(model.html))
            }
            None => Ok(None),
        }
    }

    // -------------------------------------------------------------------------
    // Webhook idempotency
    // -------------------------------------------------------------------------

    async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        let found = processed_event::Entity::find_by_id(event_id).one(&self.db).await?;
        Ok(found.is_some())
    }

    async fn mark_event_processed(&self, event_id: &str) -> Result<()> {
        let model = processed_event::ActiveModel {
            event_id: Set(event_id.to_string()),
            processed_at: Set(chrono::Utc::now().fixed_offset()),
        };

        // Redelivered events may race; the conflict is benign.
        processed_event::Entity::insert(model)
            .on_conflict(
                OnConflict::column(processed_event::Column::EventId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }
}
