//! End-to-end webhook flows over the in-memory stores: checkout through
//! cancellation and back, with redeliveries thrown in.

use std::sync::Arc;

use siteward::content::{is_placeholder, ContentStore};
use siteward::ledger::{LedgerStore, SubscriptionStatus};
use siteward::tasks::{InMemoryTaskQueue, TaskQueue};
use siteward::testing::{memory_stores, MemoryContentStore, MemoryLedger};
use siteward::webhook::{BillingEvent, EventOutcome};
use siteward::{EventIngestor, PublicationController};

struct Harness {
    ledger: Arc<MemoryLedger>,
    content: Arc<MemoryContentStore>,
    tasks: Arc<InMemoryTaskQueue>,
    ingestor: EventIngestor,
}

fn harness() -> Harness {
    let (ledger, content, _processor) = memory_stores();
    let tasks = Arc::new(InMemoryTaskQueue::default());
    let publisher = PublicationController::new(ledger.clone(), content.clone());
    let ingestor = EventIngestor::new(
        ledger.clone(),
        content.clone(),
        publisher,
        tasks.clone(),
        "whsec_test",
    );
    Harness {
        ledger,
        content,
        tasks,
        ingestor,
    }
}

fn event(id: &str, event_type: &str, object: serde_json::Value) -> BillingEvent {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "type": event_type,
        "created": 1_700_000_000u64,
        "data": { "object": object }
    }))
    .expect("valid event json")
}

fn checkout(id: &str, subdomain: &str, subscription: &str) -> BillingEvent {
    event(
        id,
        "checkout.session.completed",
        serde_json::json!({
            "customer": "cus_42",
            "subscription": subscription,
            "customer_details": { "email": "owner@example.com" },
            "metadata": { "subdomain": subdomain, "site_label": "Acme Plumbing" }
        }),
    )
}

#[tokio::test]
async fn checkout_provisions_everything_and_publishes_draft() {
    let h = harness();
    h.ledger
        .save_draft("acme", "<html>generated draft</html>")
        .await
        .unwrap();

    let outcome = h
        .ingestor
        .handle_event(checkout("evt_1", "acme", "sub_1"))
        .await
        .unwrap();
    assert_eq!(outcome, EventOutcome::Processed);

    let user = h
        .ledger
        .find_user_by_email("owner@example.com")
        .await
        .unwrap()
        .expect("user created");
    let sub = h
        .ledger
        .find_subscription("sub_1")
        .await
        .unwrap()
        .expect("subscription created");
    assert_eq!(sub.user_id, user.id);
    assert_eq!(sub.status, SubscriptionStatus::Active);

    let site = h.ledger.find_site("acme").await.unwrap().expect("site created");
    assert!(site.is_active);
    assert_eq!(site.subscription_id, Some(sub.id));

    assert_eq!(
        h.content.read("acme").await.unwrap().as_deref(),
        Some("<html>generated draft</html>")
    );
    assert_eq!(h.tasks.pending_len().await, 1);
}

#[tokio::test]
async fn full_lifecycle_cancel_then_repurchase() {
    let h = harness();
    h.ledger.save_draft("acme", "<html>v1</html>").await.unwrap();
    h.ingestor
        .handle_event(checkout("evt_1", "acme", "sub_1"))
        .await
        .unwrap();

    // Subscription sync fills in the period bounds.
    h.ingestor
        .handle_event(event(
            "evt_2",
            "customer.subscription.created",
            serde_json::json!({
                "id": "sub_1",
                "customer": "cus_42",
                "status": "active",
                "current_period_start": 1_700_000_000u64,
                "current_period_end": 1_702_592_000u64
            }),
        ))
        .await
        .unwrap();

    // Cancellation takes the site down behind the placeholder.
    h.ingestor
        .handle_event(event(
            "evt_3",
            "customer.subscription.deleted",
            serde_json::json!({ "id": "sub_1", "canceled_at": 1_701_000_000u64 }),
        ))
        .await
        .unwrap();

    let site = h.ledger.find_site("acme").await.unwrap().unwrap();
    assert!(!site.is_active);
    assert!(is_placeholder(&h.content.read("acme").await.unwrap().unwrap()));
    assert_eq!(
        h.ledger.get_backup("acme").await.unwrap().unwrap().html,
        "<html>v1</html>"
    );

    // The customer buys again: a fresh checkout reuses the subdomain.
    h.ingestor
        .handle_event(checkout("evt_4", "acme", "sub_2"))
        .await
        .unwrap();

    let site = h.ledger.find_site("acme").await.unwrap().unwrap();
    assert!(site.is_active);
    let new_sub = h.ledger.find_subscription("sub_2").await.unwrap().unwrap();
    assert_eq!(site.subscription_id, Some(new_sub.id));
    // The old subscription row stays canceled alongside the new one.
    assert_eq!(
        h.ledger.find_subscription("sub_1").await.unwrap().unwrap().status,
        SubscriptionStatus::Canceled
    );
}

#[tokio::test]
async fn deleted_event_redelivery_converges_to_one_backup() {
    let h = harness();
    h.ledger.save_draft("acme", "<html>real</html>").await.unwrap();
    h.ingestor
        .handle_event(checkout("evt_1", "acme", "sub_1"))
        .await
        .unwrap();

    let deleted = serde_json::json!({ "id": "sub_1" });

    // Same event id: short-circuits on idempotency.
    h.ingestor
        .handle_event(event("evt_2", "customer.subscription.deleted", deleted.clone()))
        .await
        .unwrap();
    let replay = h
        .ingestor
        .handle_event(event("evt_2", "customer.subscription.deleted", deleted.clone()))
        .await
        .unwrap();
    assert_eq!(replay, EventOutcome::AlreadyProcessed);

    // Fresh event id for the same fact: handled again, but the site is
    // already inactive so the backup is untouched.
    h.ingestor
        .handle_event(event("evt_3", "customer.subscription.deleted", deleted))
        .await
        .unwrap();

    let backup = h.ledger.get_backup("acme").await.unwrap().unwrap();
    assert_eq!(backup.html, "<html>real</html>");
    let site = h.ledger.find_site("acme").await.unwrap().unwrap();
    assert!(!site.is_active);
}

#[tokio::test]
async fn payment_failure_gives_grace_not_takedown() {
    let h = harness();
    h.ledger.save_draft("acme", "<html>real</html>").await.unwrap();
    h.ingestor
        .handle_event(checkout("evt_1", "acme", "sub_1"))
        .await
        .unwrap();

    h.ingestor
        .handle_event(event(
            "evt_2",
            "invoice.payment_failed",
            serde_json::json!({ "subscription": "sub_1" }),
        ))
        .await
        .unwrap();

    let sub = h.ledger.find_subscription("sub_1").await.unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::PastDue);

    // The site is still serving the real page.
    let site = h.ledger.find_site("acme").await.unwrap().unwrap();
    assert!(site.is_active);
    assert_eq!(
        h.content.read("acme").await.unwrap().as_deref(),
        Some("<html>real</html>")
    );

    // A later successful charge restores active and advances the period.
    h.ingestor
        .handle_event(event(
            "evt_3",
            "invoice.paid",
            serde_json::json!({
                "subscription": "sub_1",
                "period_start": 1_702_592_000u64,
                "period_end": 1_705_184_000u64
            }),
        ))
        .await
        .unwrap();

    let sub = h.ledger.find_subscription("sub_1").await.unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.current_period_end, 1_705_184_000);
}
