//! Track placement in the 3D scene
//!
//! Tracks are grouped by the scene object they are attached to. The `None`
//! bucket holds unassigned tracks. A track lives in at most one bucket.

use std::fmt;

use hashbrown::HashMap;

use crate::track::TrackId;

/// Identifier of a scene object, as the host names it
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransformMode {
    #[default]
    Translate,
    Rotate,
    Scale,
}

/// Editor state the host owns and passes to operations that need it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UiContext {
    pub selected: Option<ObjectId>,
    pub transform_mode: TransformMode,
}

impl UiContext {
    pub fn with_selection(selected: impl Into<ObjectId>) -> Self {
        Self {
            selected: Some(selected.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Assignments {
    buckets: HashMap<Option<ObjectId>, Vec<TrackId>>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `track` in `object`'s bucket, taking it out of any other.
    /// Reassigning to the same bucket keeps its position.
    pub fn assign(&mut self, track: TrackId, object: Option<ObjectId>) {
        if self.buckets.get(&object).is_some_and(|b| b.contains(&track)) {
            return;
        }
        self.remove(track);
        self.buckets.entry(object).or_default().push(track);
    }

    /// Take `track` out of its bucket. Returns the bucket it was in.
    pub fn remove(&mut self, track: TrackId) -> Option<Option<ObjectId>> {
        let key = self
            .buckets
            .iter()
            .find(|(_, tracks)| tracks.contains(&track))
            .map(|(key, _)| key.clone())?;

        if let Some(tracks) = self.buckets.get_mut(&key) {
            tracks.retain(|t| *t != track);
            if tracks.is_empty() {
                self.buckets.remove(&key);
            }
        }
        Some(key)
    }

    /// Tracks attached to `object`, in assignment order
    pub fn tracks_in(&self, object: Option<&ObjectId>) -> &[TrackId] {
        self.buckets
            .get(&object.cloned())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The bucket holding `track`: `None` if it isn't placed at all,
    /// `Some(None)` if it sits in the unassigned bucket.
    pub fn object_of(&self, track: TrackId) -> Option<Option<&ObjectId>> {
        self.buckets
            .iter()
            .find(|(_, tracks)| tracks.contains(&track))
            .map(|(key, _)| key.as_ref())
    }

    /// Objects with at least one track
    pub fn objects(&self) -> impl Iterator<Item = &ObjectId> {
        self.buckets.keys().filter_map(Option::as_ref)
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_track_lives_in_one_bucket() {
        let mut a = Assignments::new();
        let cube = ObjectId::from("cube");
        a.assign(TrackId(1), None);
        a.assign(TrackId(1), Some(cube.clone()));

        assert!(a.tracks_in(None).is_empty());
        assert_eq!(a.tracks_in(Some(&cube)), &[TrackId(1)]);
        assert_eq!(a.object_of(TrackId(1)), Some(Some(&cube)));
    }

    #[test]
    fn reassigning_same_bucket_keeps_order() {
        let mut a = Assignments::new();
        let sphere = ObjectId::from("sphere");
        a.assign(TrackId(1), Some(sphere.clone()));
        a.assign(TrackId(2), Some(sphere.clone()));
        a.assign(TrackId(1), Some(sphere.clone()));
        assert_eq!(a.tracks_in(Some(&sphere)), &[TrackId(1), TrackId(2)]);
    }

    #[test]
    fn removing_last_track_drops_the_bucket() {
        let mut a = Assignments::new();
        a.assign(TrackId(4), Some("cone".into()));
        assert_eq!(a.remove(TrackId(4)), Some(Some(ObjectId::from("cone"))));
        assert_eq!(a.objects().count(), 0);
        assert_eq!(a.object_of(TrackId(4)), None);
        assert_eq!(a.remove(TrackId(4)), None);
    }
}
