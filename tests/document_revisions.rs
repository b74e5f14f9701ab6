use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use pulse_aggregator::config::load_providers_from;
use pulse_aggregator::ingest::providers::documents::{tests_support::ScriptedDocs, Document, Revision};
use pulse_aggregator::ingest::transport::{DocumentBackend, FeedTransport};
use pulse_aggregator::provider::{never_updated, Token};
use pulse_aggregator::registry::sync_from_config;
use pulse_aggregator::timeline;
use pulse_aggregator::{ManualClock, MemoryStore, PollContext, PollOutcome, ProviderKind, PulseError, Scheduler, Sources, Store};

const PROVIDERS_TOML: &str = r#"
[[providers]]
slug = "docs"
name = "Team docs"
update_frequency = 15
tags = ["docs"]
kind = { type = "document_revision", api_base = "https://docs.example", account = "me@example.org", password = "hunter2" }
"#;

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2012, 7, day, hour, 0, 0).unwrap()
}

fn service() -> ScriptedDocs {
    ScriptedDocs::new("hunter2", "durable-1").with_document(
        Document {
            id: "d1".into(),
            title: "Roadmap".into(),
            owner: "owner@example.org".into(),
            url: "https://docs.example/d1".into(),
        },
        vec![
            Revision { id: "r1".into(), author: None, updated: at(1, 9), url: None },
            Revision {
                id: "r2".into(),
                author: Some("sam@example.org".into()),
                updated: at(2, 14),
                url: Some("https://docs.example/d1?rev=2".into()),
            },
        ],
    )
}

#[tokio::test]
async fn configured_password_becomes_token_then_revisions_are_polled() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = dir.path().join("providers.toml");
    std::fs::write(&cfg_path, PROVIDERS_TOML).unwrap();
    let configs = load_providers_from(&cfg_path).unwrap();

    let docs = Arc::new(service());
    let sources = Sources {
        feeds: FeedTransport::fixtures(Vec::<(String, String)>::new()),
        documents: DocumentBackend::Fixed(docs.clone()),
    };
    let clock = Arc::new(ManualClock::new(at(3, 0)));
    let ctx = PollContext::new(clock.clone());
    let store = Arc::new(MemoryStore::open(dir.path().join("state.json")).unwrap());

    sync_from_config(&ctx, store.as_ref(), &sources, &configs).await.unwrap();
    let p = store.provider_by_slug("docs").await.unwrap().unwrap();
    assert!(matches!(
        &p.kind,
        ProviderKind::DocumentRevision { token: Some(t), .. } if *t == Token("durable-1".into())
    ));
    let persisted = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
    assert!(!persisted.contains("hunter2"));

    // Two expiries in one run: re-auth once, then give up.
    docs.expire_next(2);
    let scheduler = Scheduler::new(store.clone(), sources);
    let err = scheduler.update(&ctx, p.id).await.unwrap_err();
    assert!(matches!(err, PulseError::Auth(_)));
    assert_eq!(store.get_provider(p.id).await.unwrap().unwrap().last_update, never_updated());

    // One expiry: recovered within the run.
    docs.expire_next(1);
    let before = docs.sessions_opened.load(Ordering::SeqCst);
    let PollOutcome::Committed { blip_set, count } = scheduler.update(&ctx, p.id).await.unwrap() else {
        panic!("expected a commit");
    };
    assert_eq!(docs.sessions_opened.load(Ordering::SeqCst) - before, 2);
    assert_eq!(count, 2);

    let detail = timeline::blip_set_detail(store.as_ref(), blip_set).await.unwrap();
    assert_eq!(detail.set.summary, "2 new items from Team docs");
    assert_eq!(detail.set.timestamp, at(2, 14));
    assert_eq!(detail.blips[0].who.as_deref(), Some("sam@example.org"));
    assert_eq!(detail.blips[1].who.as_deref(), Some("owner@example.org"));
    assert_eq!(detail.blips[1].title, "Roadmap revised");

    clock.advance(Duration::minutes(15));
    let ctx = PollContext::new(clock.clone());
    assert_eq!(scheduler.update(&ctx, p.id).await.unwrap(), PollOutcome::NoNewData);
    assert_eq!(docs.logins.load(Ordering::SeqCst), 1);
}
