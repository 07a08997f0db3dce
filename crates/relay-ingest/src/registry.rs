use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use relay_proto::ObjectTrack;

type TrackMap = BTreeMap<i64, ObjectTrack>;

/// Currently visible object tracks keyed by their source-assigned id.
///
/// The map lives behind an `Arc` that is swapped whole on `replace_all`, so
/// readers see either the old set or the new one, never a half-cleared map.
/// Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct TrackRegistry {
    inner: Arc<RwLock<Arc<TrackMap>>>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a full detection frame. Later duplicates of an id win.
    /// Returns the number of tracks now held.
    pub fn replace_all(&self, tracks: impl IntoIterator<Item = ObjectTrack>) -> usize {
        let next: TrackMap = tracks.into_iter().map(|t| (t.id, t)).collect();
        let n = next.len();
        *self.write() = Arc::new(next);
        debug!("ingest: registry replaced, {} tracks", n);
        n
    }

    /// Returns the previous track with the same id, if any.
    pub fn upsert(&self, track: ObjectTrack) -> Option<ObjectTrack> {
        let mut guard = self.write();
        Arc::make_mut(&mut *guard).insert(track.id, track)
    }

    pub fn clear(&self) {
        *self.write() = Arc::new(TrackMap::new());
    }

    /// Selection lookup for the overlay's click handling.
    pub fn on_select(&self, id: i64) -> Option<ObjectTrack> {
        let track = self.get(id);
        match &track {
            Some(t) => {
                let (cx, cy) = t.rect.center();
                info!("ingest: selected track {} '{}' @ ({:.1}, {:.1})", t.id, t.label, cx, cy);
            }
            None => info!("ingest: selected track {} is no longer present", id),
        }
        track
    }

    pub fn get(&self, id: i64) -> Option<ObjectTrack> {
        self.snapshot().get(&id).cloned()
    }

    /// Hit test in source-frame coordinates: the smallest track containing
    /// the point, higher id on ties.
    pub fn track_at(&self, x: f64, y: f64) -> Option<ObjectTrack> {
        let snap = self.snapshot();
        snap.values()
            .filter(|t| t.rect.contains(x, y))
            .min_by(|a, b| {
                let (aa, ab) = (a.rect.w * a.rect.h, b.rect.w * b.rect.h);
                aa.total_cmp(&ab).then(b.id.cmp(&a.id))
            })
            .cloned()
    }

    /// Consistent point-in-time view of every track.
    pub fn snapshot(&self) -> Arc<TrackMap> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn tracks(&self) -> Vec<ObjectTrack> {
        self.snapshot().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Arc<TrackMap>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
