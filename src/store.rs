//! Persistence collaborator.
//!
//! [`Store`] is the seam to whatever holds providers, blips and blip sets.
//! [`MemoryStore`] keeps everything behind one mutex and can mirror its state
//! to a JSON file so a cron-driven binary remembers `last_update` between runs.
//! Every write applies to a draft copy that replaces the live state only after
//! the whole operation (and the optional file write) succeeded, so readers
//! never observe a half-applied commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{PulseError, Result};
use crate::model::{
    sort_newest_first, Attribution, Blip, BlipId, BlipSet, BlipSetId, NewBlip, ProviderId, TagSet,
};
use crate::provider::{NewProvider, Provider};

/// Everything one successful poll writes, applied as a single unit.
#[derive(Debug, Clone)]
pub struct PollCommit {
    pub provider: ProviderId,
    /// `last_update` the poller observed when it passed the rate-limit gate.
    pub expected_last_update: DateTime<Utc>,
    pub polled_at: DateTime<Utc>,
    pub events: Vec<NewBlip>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_provider(&self, p: NewProvider) -> Result<Provider>;
    async fn get_provider(&self, id: ProviderId) -> Result<Option<Provider>>;
    async fn provider_by_slug(&self, slug: &str) -> Result<Option<Provider>>;
    async fn list_providers(&self) -> Result<Vec<Provider>>;
    /// Replace a provider's settings. `last_update` is left as stored.
    async fn update_provider(&self, p: &Provider) -> Result<()>;

    /// Create the blip set (if any events), attach the blips, copy the
    /// provider's tags onto the set and advance `last_update`. Fails with
    /// [`PulseError::Conflict`] if `last_update` moved since the gate check.
    async fn commit_poll(&self, commit: PollCommit) -> Result<Option<BlipSetId>>;

    /// Single-blip set with a fixed summary and no provider.
    async fn insert_manual(&self, blip: NewBlip, summary: String) -> Result<BlipSetId>;

    /// All blip sets, newest first.
    async fn list_blip_sets(&self) -> Result<Vec<BlipSet>>;
    async fn blip_set(&self, id: BlipSetId) -> Result<Option<BlipSet>>;
    async fn blip_sets_for_provider(&self, id: ProviderId) -> Result<Vec<BlipSet>>;
    /// Sets carrying at least one of `tags`, newest first.
    async fn blip_sets_with_any_tag(&self, tags: &TagSet) -> Result<Vec<BlipSet>>;
    /// Blips of a set, newest first.
    async fn blips_for_set(&self, id: BlipSetId) -> Result<Vec<Blip>>;
    async fn blip_count(&self, id: BlipSetId) -> Result<usize>;
    async fn add_blip_tags(&self, id: BlipId, tags: &TagSet) -> Result<()>;

    /// Render each of the provider's sets with the provider as stored,
    /// freeze that text onto the set, detach it and remove the provider, all
    /// in one write. Returns the removed provider and how many sets were
    /// frozen.
    async fn delete_provider(&self, id: ProviderId) -> Result<(Provider, usize)>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    next_provider: u64,
    next_blip_set: u64,
    next_blip: u64,
    providers: BTreeMap<ProviderId, Provider>,
    blip_sets: BTreeMap<BlipSetId, BlipSet>,
    blips: BTreeMap<BlipId, Blip>,
}

impl State {
    fn alloc_provider(&mut self) -> ProviderId {
        self.next_provider += 1;
        ProviderId(self.next_provider)
    }

    fn alloc_blip_set(&mut self) -> BlipSetId {
        self.next_blip_set += 1;
        BlipSetId(self.next_blip_set)
    }

    fn alloc_blip(&mut self) -> BlipId {
        self.next_blip += 1;
        BlipId(self.next_blip)
    }

    fn attach(&mut self, set: BlipSetId, events: Vec<NewBlip>) {
        for ev in events {
            let id = self.alloc_blip();
            self.blips.insert(id, Blip::from_new(id, set, ev));
        }
    }

    fn sets_where<F: Fn(&BlipSet) -> bool>(&self, pred: F) -> Vec<BlipSet> {
        let mut v: Vec<BlipSet> = self.blip_sets.values().filter(|s| pred(s)).cloned().collect();
        sort_newest_first(&mut v, |s| s.timestamp);
        v
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from `path` if it exists; every later write is mirrored there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), providers = state.providers.len(), "store opened");
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| PulseError::Store("store mutex poisoned".into()))
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T> {
        let g = self.lock()?;
        Ok(f(&g))
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut g = self.lock()?;
        let mut draft = g.clone();
        let out = f(&mut draft)?;
        if let Some(path) = &self.path {
            persist(path, &draft)?;
        }
        *g = draft;
        Ok(out)
    }
}

fn persist(path: &Path, state: &State) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_provider(&self, p: NewProvider) -> Result<Provider> {
        self.write(|s| {
            if s.providers.values().any(|x| x.slug == p.slug) {
                return Err(PulseError::Conflict(format!("provider slug '{}' already registered", p.slug)));
            }
            let id = s.alloc_provider();
            let provider = p.into_provider(id);
            s.providers.insert(id, provider.clone());
            Ok(provider)
        })
    }

    async fn get_provider(&self, id: ProviderId) -> Result<Option<Provider>> {
        self.read(|s| s.providers.get(&id).cloned())
    }

    async fn provider_by_slug(&self, slug: &str) -> Result<Option<Provider>> {
        self.read(|s| s.providers.values().find(|p| p.slug == slug).cloned())
    }

    async fn list_providers(&self) -> Result<Vec<Provider>> {
        self.read(|s| s.providers.values().cloned().collect())
    }

    async fn update_provider(&self, p: &Provider) -> Result<()> {
        self.write(|s| {
            let slot = s
                .providers
                .get_mut(&p.id)
                .ok_or_else(|| PulseError::NotFound(p.id.to_string()))?;
            let last_update = slot.last_update;
            *slot = p.clone();
            slot.last_update = last_update;
            Ok(())
        })
    }

    async fn commit_poll(&self, commit: PollCommit) -> Result<Option<BlipSetId>> {
        self.write(|s| {
            let provider = s
                .providers
                .get(&commit.provider)
                .ok_or_else(|| PulseError::NotFound(commit.provider.to_string()))?;
            if provider.last_update != commit.expected_last_update {
                return Err(PulseError::Conflict(format!(
                    "{} was updated concurrently",
                    commit.provider
                )));
            }
            let tags = provider.tags.clone();
            let next_update = commit.polled_at.max(provider.last_update);

            let created = match crate::model::newest_timestamp(&commit.events) {
                Some(timestamp) => {
                    let id = s.alloc_blip_set();
                    s.blip_sets.insert(
                        id,
                        BlipSet {
                            id,
                            timestamp,
                            tags: TagSet::new(),
                            attribution: Attribution::Live { provider: commit.provider },
                        },
                    );
                    s.attach(id, commit.events);
                    if let Some(set) = s.blip_sets.get_mut(&id) {
                        set.tags.extend(tags);
                    }
                    Some(id)
                }
                None => None,
            };

            if let Some(p) = s.providers.get_mut(&commit.provider) {
                p.last_update = next_update;
            }
            Ok(created)
        })
    }

    async fn insert_manual(&self, blip: NewBlip, summary: String) -> Result<BlipSetId> {
        self.write(|s| {
            let id = s.alloc_blip_set();
            s.blip_sets.insert(
                id,
                BlipSet {
                    id,
                    timestamp: blip.timestamp,
                    tags: TagSet::new(),
                    attribution: Attribution::Frozen { summary },
                },
            );
            s.attach(id, vec![blip]);
            Ok(id)
        })
    }

    async fn list_blip_sets(&self) -> Result<Vec<BlipSet>> {
        self.read(|s| s.sets_where(|_| true))
    }

    async fn blip_set(&self, id: BlipSetId) -> Result<Option<BlipSet>> {
        self.read(|s| s.blip_sets.get(&id).cloned())
    }

    async fn blip_sets_for_provider(&self, id: ProviderId) -> Result<Vec<BlipSet>> {
        self.read(|s| s.sets_where(|b| b.provider() == Some(id)))
    }

    async fn blip_sets_with_any_tag(&self, tags: &TagSet) -> Result<Vec<BlipSet>> {
        self.read(|s| s.sets_where(|b| !b.tags.is_disjoint(tags)))
    }

    async fn blips_for_set(&self, id: BlipSetId) -> Result<Vec<Blip>> {
        self.read(|s| {
            let mut v: Vec<Blip> = s.blips.values().filter(|b| b.blip_set == Some(id)).cloned().collect();
            sort_newest_first(&mut v, |b| b.timestamp);
            v
        })
    }

    async fn blip_count(&self, id: BlipSetId) -> Result<usize> {
        self.read(|s| s.blips.values().filter(|b| b.blip_set == Some(id)).count())
    }

    async fn add_blip_tags(&self, id: BlipId, tags: &TagSet) -> Result<()> {
        self.write(|s| {
            let blip = s.blips.get_mut(&id).ok_or_else(|| PulseError::NotFound(format!("blip#{}", id.0)))?;
            blip.tags.extend(tags.iter().cloned());
            Ok(())
        })
    }

    async fn delete_provider(&self, id: ProviderId) -> Result<(Provider, usize)> {
        self.write(|s| {
            let provider = s
                .providers
                .remove(&id)
                .ok_or_else(|| PulseError::NotFound(id.to_string()))?;
            let mut counts: BTreeMap<BlipSetId, usize> = BTreeMap::new();
            for set in s.blips.values().filter_map(|b| b.blip_set) {
                *counts.entry(set).or_default() += 1;
            }
            let mut frozen = 0;
            for set in s.blip_sets.values_mut().filter(|b| b.provider() == Some(id)) {
                let count = counts.get(&set.id).copied().unwrap_or(0);
                set.attribution = Attribution::Frozen {
                    summary: provider.render_summary(count),
                };
                frozen += 1;
            }
            Ok((provider, frozen))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2012, 6, 1, h, 0, 0).unwrap()
    }

    fn rss(slug: &str) -> NewProvider {
        NewProvider::new(slug, ProviderKind::Rss { url: format!("http://example.org/{slug}") })
            .named(slug)
            .tagged(["web"])
    }

    #[tokio::test]
    async fn slugs_are_unique() {
        let store = MemoryStore::new();
        store.insert_provider(rss("a")).await.unwrap();
        let err = store.insert_provider(rss("a")).await.unwrap_err();
        assert!(matches!(err, PulseError::Conflict(_)));
    }

    #[tokio::test]
    async fn commit_rejects_stale_gate_observation() {
        let store = MemoryStore::new();
        let p = store.insert_provider(rss("a")).await.unwrap();
        let commit = PollCommit {
            provider: p.id,
            expected_last_update: p.last_update,
            polled_at: ts(12),
            events: vec![NewBlip::new("u", "t", ts(11))],
        };
        store.commit_poll(commit.clone()).await.unwrap();
        let err = store.commit_poll(commit).await.unwrap_err();
        assert!(matches!(err, PulseError::Conflict(_)));
        assert_eq!(store.list_blip_sets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tag_lookup_is_any_of() {
        let store = MemoryStore::new();
        let a = store.insert_provider(rss("a").tagged(["web", "news"])).await.unwrap();
        let b = store.insert_provider(rss("b").tagged(["ops"])).await.unwrap();
        for (p, h) in [(&a, 1), (&b, 2)] {
            store
                .commit_poll(PollCommit {
                    provider: p.id,
                    expected_last_update: p.last_update,
                    polled_at: ts(h),
                    events: vec![NewBlip::new("u", "t", ts(h))],
                })
                .await
                .unwrap();
        }
        let want: TagSet = ["news".to_string(), "ops".to_string()].into_iter().collect();
        assert_eq!(store.blip_sets_with_any_tag(&want).await.unwrap().len(), 2);
        let only_ops: TagSet = ["ops".to_string()].into_iter().collect();
        let hits = store.blip_sets_with_any_tag(&only_ops).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].provider(), Some(b.id));
    }

    #[tokio::test]
    async fn delete_freezes_the_name_stored_at_delete_time() {
        let store = MemoryStore::new();
        let mut p = store.insert_provider(rss("a")).await.unwrap();
        store
            .commit_poll(PollCommit {
                provider: p.id,
                expected_last_update: p.last_update,
                polled_at: ts(3),
                events: vec![NewBlip::new("u1", "t", ts(2)), NewBlip::new("u2", "t", ts(2))],
            })
            .await
            .unwrap();

        p.name = "Renamed".into();
        store.update_provider(&p).await.unwrap();
        let (removed, frozen) = store.delete_provider(p.id).await.unwrap();
        assert_eq!(removed.name, "Renamed");
        assert_eq!(frozen, 1);

        let sets = store.list_blip_sets().await.unwrap();
        assert_eq!(sets[0].frozen_summary(), Some("2 new items from Renamed"));
        assert!(store.get_provider(p.id).await.unwrap().is_none());
        assert!(matches!(store.update_provider(&p).await, Err(PulseError::NotFound(_))));
    }

    #[tokio::test]
    async fn rename_racing_delete_never_freezes_a_stale_name() {
        for _ in 0..32 {
            let store = Arc::new(MemoryStore::new());
            let mut p = store.insert_provider(rss("a")).await.unwrap();
            store
                .commit_poll(PollCommit {
                    provider: p.id,
                    expected_last_update: p.last_update,
                    polled_at: ts(3),
                    events: vec![NewBlip::new("u", "t", ts(2))],
                })
                .await
                .unwrap();

            p.name = "Renamed".into();
            let renamer = {
                let store = Arc::clone(&store);
                let p = p.clone();
                tokio::spawn(async move { store.update_provider(&p).await })
            };
            let deleter = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.delete_provider(p.id).await })
            };
            let renamed = renamer.await.unwrap().is_ok();
            let (removed, _) = deleter.await.unwrap().unwrap();

            let sets = store.list_blip_sets().await.unwrap();
            let want = if renamed { "1 new items from Renamed" } else { "1 new items from a" };
            assert_eq!(sets[0].frozen_summary(), Some(want));
            assert_eq!(removed.render_summary(1), want);
        }
    }

    #[tokio::test]
    async fn blip_tags_only_grow() {
        let store = MemoryStore::new();
        let mut nb = NewBlip::new("u", "t", ts(1));
        nb.tags = ["a".to_string()].into_iter().collect();
        let set = store.insert_manual(nb, "Manual update from x".into()).await.unwrap();
        let blip = store.blips_for_set(set).await.unwrap().remove(0);

        let more: TagSet = ["b".to_string(), "a".to_string()].into_iter().collect();
        store.add_blip_tags(blip.id, &more).await.unwrap();
        let blip = store.blips_for_set(set).await.unwrap().remove(0);
        assert_eq!(blip.tags, more);
        assert!(matches!(
            store.add_blip_tags(BlipId(99), &more).await,
            Err(PulseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("pulse.json");
        {
            let store = MemoryStore::open(&path).unwrap();
            let p = store.insert_provider(rss("a")).await.unwrap();
            store
                .commit_poll(PollCommit {
                    provider: p.id,
                    expected_last_update: p.last_update,
                    polled_at: ts(9),
                    events: vec![NewBlip::new("u", "t", ts(8))],
                })
                .await
                .unwrap();
        }
        let store = MemoryStore::open(&path).unwrap();
        let p = store.provider_by_slug("a").await.unwrap().unwrap();
        assert_eq!(p.last_update, ts(9));
        let sets = store.list_blip_sets().await.unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(store.blip_count(sets[0].id).await.unwrap(), 1);
    }
}
