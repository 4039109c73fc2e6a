//! The subscription ledger: the relational record of what should currently
//! be true for every user, subscription, and site.
//!
//! The ledger is shared mutable state read and written by the webhook
//! ingestor, the publication controller, and the reconciliation job. It is
//! deliberately upsert-oriented: every write is keyed by a unique identifier
//! (email, external subscription id, subdomain) so that redelivered webhook
//! events and retried reconciliation passes are harmless.

mod sea_orm_store;
mod store;

pub use sea_orm_store::SeaOrmLedger;
pub use store::{
    HtmlBackup, LedgerStore, SiteJoined, SiteRecord, SubscriptionRecord, SubscriptionStatus,
    UserRecord,
};
