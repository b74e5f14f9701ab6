use chrono::{TimeZone, Utc};
use std::sync::Arc;

use pulse_aggregator::ingest::providers::documents::tests_support::ScriptedDocs;
use pulse_aggregator::ingest::transport::{DocumentBackend, FeedTransport};
use pulse_aggregator::registry::register_provider;
use pulse_aggregator::timeline;
use pulse_aggregator::{ManualClock, MemoryStore, NewProvider, PollContext, PollOutcome, ProviderKind, Scheduler, Sources};

const MEDIA_XML: &str = include_str!("fixtures/media_rss.xml");
const MEDIA_URL: &str = "http://photos.example/kim/feed";

fn sources() -> Sources {
    Sources {
        feeds: FeedTransport::fixtures([(MEDIA_URL, MEDIA_XML)]),
        documents: DocumentBackend::Fixed(Arc::new(ScriptedDocs::default())),
    }
}

async fn poll(kind: ProviderKind) -> (Arc<MemoryStore>, timeline::BlipSetDetail) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2012, 3, 4, 0, 0, 0).unwrap()));
    let ctx = PollContext::new(clock);
    let store = Arc::new(MemoryStore::new());
    let p = register_provider(&ctx, store.as_ref(), &sources(), NewProvider::new("kim", kind))
        .await
        .unwrap();
    let scheduler = Scheduler::new(store.clone(), sources());
    let PollOutcome::Committed { blip_set, count } = scheduler.update(&ctx, p.id).await.unwrap() else {
        panic!("expected a commit");
    };
    assert_eq!(count, 2);
    let detail = timeline::blip_set_detail(store.as_ref(), blip_set).await.unwrap();
    (store, detail)
}

#[tokio::test]
async fn media_feed_with_both_descriptions_uses_the_media_one() {
    let (_store, detail) = poll(ProviderKind::Media { url: MEDIA_URL.into() }).await;

    assert_eq!(detail.set.summary, "2 new items from Uploads from kim");
    let newest = &detail.blips[0];
    assert_eq!(newest.title, "Harbour at dawn");
    assert_eq!(newest.source_url, "http://photos.example/kim/2");
    assert_eq!(newest.summary.as_deref(), Some("Fishing boats leaving the harbour"));

    // No media:description: falls back to the plain description.
    assert_eq!(detail.blips[1].summary.as_deref(), Some("kim posted a photo"));
}

#[tokio::test]
async fn timeline_feed_takes_who_from_dc_creator() {
    let (_store, detail) = poll(ProviderKind::Timeline { url: MEDIA_URL.into() }).await;

    assert!(detail.blips.iter().all(|b| b.who.as_deref() == Some("kim")));
    let newest = &detail.blips[0];
    assert!(newest.tags.contains("harbour") && newest.tags.contains("boats"));
    assert!(!newest.tags.contains("harbour boats"));
}
