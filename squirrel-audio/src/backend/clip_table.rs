//! Clip metadata shared by every backend: markers, sprites and the
//! resolution of symbolic positions into frames.

use std::collections::HashMap;

use squirrel_types::{
    ClipId, ClipSpec, EndPos, EndSymbol, FollowActionArgs, JumpTarget, Marker, MarkerArgs,
    MarkerRef, StartPos,
};

use crate::error::{AudioError, AudioResult};

/// Where a voice stops, after resolving markers and sprites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayEnd {
    /// Exclusive clip frame.
    Frame(u64),
    ClipEnd,
    /// Held until stopped; without a loop it still ends with the buffer.
    NoteOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: PlayEnd,
}

#[derive(Debug, Clone, Default)]
pub struct ClipTable {
    clips: HashMap<ClipId, ClipSpec>,
}

impl ClipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a clip after checking that its ids and names are unique.
    pub fn insert(&mut self, spec: ClipSpec) -> AudioResult {
        if self.clips.contains_key(&spec.id) {
            return Err(AudioError::DuplicateClip(spec.id));
        }
        for (i, marker) in spec.markers.iter().enumerate() {
            if spec.markers[..i].iter().any(|m| m.name == marker.name) {
                return Err(AudioError::DuplicateName {
                    clip_id: spec.id.clone(),
                    what: "marker",
                    name: marker.name.clone(),
                });
            }
        }
        for (i, sprite) in spec.sprites.iter().enumerate() {
            if spec.sprites[..i].iter().any(|s| s.name == sprite.name) {
                return Err(AudioError::DuplicateName {
                    clip_id: spec.id.clone(),
                    what: "sprite",
                    name: sprite.name.clone(),
                });
            }
            if sprite.end < sprite.start {
                return Err(AudioError::InvalidArgument(format!(
                    "sprite '{}' ends before it starts",
                    sprite.name
                )));
            }
        }
        self.clips.insert(spec.id.clone(), spec);
        Ok(())
    }

    pub fn remove(&mut self, id: &ClipId) -> AudioResult<ClipSpec> {
        self.clips.remove(id).ok_or_else(|| AudioError::UnknownClip(id.clone()))
    }

    pub fn get(&self, id: &ClipId) -> AudioResult<&ClipSpec> {
        self.clips.get(id).ok_or_else(|| AudioError::UnknownClip(id.clone()))
    }

    pub fn get_mut(&mut self, id: &ClipId) -> AudioResult<&mut ClipSpec> {
        self.clips.get_mut(id).ok_or_else(|| AudioError::UnknownClip(id.clone()))
    }

    pub fn contains(&self, id: &ClipId) -> bool {
        self.clips.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn marker_frame(&self, clip_id: &ClipId, name: &str) -> AudioResult<u64> {
        self.get(clip_id)?
            .markers
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.frame)
            .ok_or_else(|| AudioError::unresolved_marker(clip_id, name))
    }

    /// Resolve `start`/`end` into frames. A sprite start implies the sprite's
    /// end unless an explicit end is given.
    pub fn resolve_range(
        &self,
        clip_id: &ClipId,
        start: Option<&StartPos>,
        end: Option<&EndPos>,
    ) -> AudioResult<ResolvedRange> {
        let spec = self.get(clip_id)?;
        let (start, implied_end) = match start {
            None => (0, None),
            Some(StartPos::Frame(frame)) => (*frame, None),
            Some(StartPos::Marker { marker }) => (self.marker_frame(clip_id, marker)?, None),
            Some(StartPos::Sprite { sprite }) => {
                let found = spec
                    .sprites
                    .iter()
                    .find(|s| &s.name == sprite)
                    .ok_or_else(|| AudioError::unresolved_sprite(clip_id, sprite))?;
                (found.start, Some(found.end))
            }
        };
        let end = match end {
            None => implied_end.map_or(PlayEnd::ClipEnd, PlayEnd::Frame),
            Some(EndPos::Frame(frame)) => PlayEnd::Frame(*frame),
            Some(EndPos::Marker { marker }) => PlayEnd::Frame(self.marker_frame(clip_id, marker)?),
            Some(EndPos::Symbol(EndSymbol::ClipEnd)) => PlayEnd::ClipEnd,
            Some(EndPos::Symbol(EndSymbol::UntilNoteOff)) => PlayEnd::NoteOff,
        };
        if let PlayEnd::Frame(frame) = end {
            if frame < start {
                return Err(AudioError::InvalidArgument(format!(
                    "end frame {} precedes start frame {}",
                    frame, start
                )));
            }
        }
        Ok(ResolvedRange { start, end })
    }

    pub fn resolve_jump(&self, clip_id: &ClipId, to: &JumpTarget) -> AudioResult<u64> {
        match to {
            JumpTarget::Frame(frame) => {
                self.get(clip_id)?;
                Ok(*frame)
            }
            JumpTarget::Marker { marker } => self.marker_frame(clip_id, marker),
        }
    }

    pub fn add_marker(&mut self, args: &MarkerArgs) -> AudioResult {
        let spec = self.get_mut(&args.clip_id)?;
        if spec.markers.iter().any(|m| m.name == args.name) {
            return Err(AudioError::DuplicateName {
                clip_id: args.clip_id.clone(),
                what: "marker",
                name: args.name.clone(),
            });
        }
        spec.markers.push(Marker::new(args.name.clone(), args.frame));
        Ok(())
    }

    pub fn remove_marker(&mut self, args: &MarkerRef) -> AudioResult<Marker> {
        let spec = self.get_mut(&args.clip_id)?;
        let index = spec
            .markers
            .iter()
            .position(|m| m.name == args.name)
            .ok_or_else(|| AudioError::unresolved_marker(&args.clip_id, &args.name))?;
        Ok(spec.markers.remove(index))
    }

    pub fn set_follow_actions(&mut self, args: &FollowActionArgs) -> AudioResult {
        let marker = self.marker_mut(&args.clip_id, &args.marker)?;
        marker.follow_actions = args.actions.clone();
        Ok(())
    }

    pub fn clear_follow_actions(&mut self, args: &MarkerRef) -> AudioResult {
        self.marker_mut(&args.clip_id, &args.name)?.follow_actions.clear();
        Ok(())
    }

    fn marker_mut(&mut self, clip_id: &ClipId, name: &str) -> AudioResult<&mut Marker> {
        self.get_mut(clip_id)?
            .markers
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| AudioError::unresolved_marker(clip_id, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squirrel_types::{FollowAction, FollowKind};

    fn table() -> ClipTable {
        let mut table = ClipTable::new();
        table
            .insert(
                ClipSpec::new("c1", "a.wav")
                    .with_marker("A", 1000)
                    .with_marker("B", 4000)
                    .with_sprite("hit", 200, 800),
            )
            .unwrap();
        table
    }

    fn id() -> ClipId {
        ClipId::new("c1")
    }

    #[test]
    fn resolves_markers_and_sprites() {
        let table = table();
        let by_marker = table
            .resolve_range(&id(), Some(&StartPos::Marker { marker: "A".into() }), None)
            .unwrap();
        assert_eq!(by_marker, ResolvedRange { start: 1000, end: PlayEnd::ClipEnd });

        let by_sprite = table
            .resolve_range(&id(), Some(&StartPos::Sprite { sprite: "hit".into() }), None)
            .unwrap();
        assert_eq!(by_sprite, ResolvedRange { start: 200, end: PlayEnd::Frame(800) });

        let to_marker = table
            .resolve_range(&id(), None, Some(&EndPos::Marker { marker: "B".into() }))
            .unwrap();
        assert_eq!(to_marker.end, PlayEnd::Frame(4000));
    }

    #[test]
    fn missing_marker_is_an_error_not_frame_zero() {
        let table = table();
        let err = table
            .resolve_range(&id(), Some(&StartPos::Marker { marker: "Z".into() }), None)
            .unwrap_err();
        assert!(matches!(err, AudioError::UnresolvedReference { what: "marker", .. }));
    }

    #[test]
    fn end_before_start_is_rejected() {
        let table = table();
        let err = table
            .resolve_range(&id(), Some(&StartPos::Frame(5000)), Some(&EndPos::Frame(10)))
            .unwrap_err();
        assert!(matches!(err, AudioError::InvalidArgument(_)));
    }

    #[test]
    fn add_then_remove_marker_restores_state() {
        let mut table = table();
        let before = table.get(&id()).unwrap().markers.clone();
        table
            .add_marker(&MarkerArgs { clip_id: id(), name: "C".into(), frame: 9000 })
            .unwrap();
        assert_eq!(table.marker_frame(&id(), "C").unwrap(), 9000);
        table.remove_marker(&MarkerRef { clip_id: id(), name: "C".into() }).unwrap();
        assert_eq!(table.get(&id()).unwrap().markers, before);
    }

    #[test]
    fn marker_names_are_unique() {
        let mut table = table();
        let err = table
            .add_marker(&MarkerArgs { clip_id: id(), name: "A".into(), frame: 1 })
            .unwrap_err();
        assert!(matches!(err, AudioError::DuplicateName { .. }));

        let dup = ClipSpec::new("c2", "b.wav").with_marker("X", 1).with_marker("X", 2);
        assert!(matches!(table.insert(dup), Err(AudioError::DuplicateName { .. })));
        assert!(!table.contains(&ClipId::new("c2")));
    }

    #[test]
    fn follow_actions_attach_to_markers() {
        let mut table = table();
        let action = FollowAction {
            action: FollowKind::Jump,
            target_marker: Some("A".into()),
            target_clip_id: None,
            probability: None,
        };
        table
            .set_follow_actions(&FollowActionArgs {
                clip_id: id(),
                marker: "B".into(),
                actions: vec![action.clone()],
            })
            .unwrap();
        let spec = table.get(&id()).unwrap();
        assert_eq!(spec.markers[1].follow_actions, vec![action]);

        table.clear_follow_actions(&MarkerRef { clip_id: id(), name: "B".into() }).unwrap();
        assert!(table.get(&id()).unwrap().markers[1].follow_actions.is_empty());

        let err = table
            .clear_follow_actions(&MarkerRef { clip_id: id(), name: "nope".into() })
            .unwrap_err();
        assert!(matches!(err, AudioError::UnresolvedReference { .. }));
    }

    #[test]
    fn duplicate_clip_ids_are_rejected() {
        let mut table = table();
        let err = table.insert(ClipSpec::new("c1", "other.wav")).unwrap_err();
        assert_eq!(err, AudioError::DuplicateClip(id()));
        assert_eq!(table.get(&id()).unwrap().path_or_bookmark, "a.wav");
    }
}
