use std::{cell::RefCell, rc::Rc};

use crate::lua_host::{FrameSnapshot, RenderCallback};

/// Render collaborator that keeps every frame it is handed, so a run can be
/// replayed or written out as a JSON frame log.
#[derive(Clone, Default)]
pub struct RecordingRenderCallback {
    frames: Rc<RefCell<Vec<FrameSnapshot>>>,
}

impl RecordingRenderCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<FrameSnapshot> {
        self.frames.borrow().clone()
    }

    pub fn last_frame(&self) -> Option<FrameSnapshot> {
        self.frames.borrow().last().cloned()
    }
}

impl RenderCallback for RecordingRenderCallback {
    fn render(&self, frame: &FrameSnapshot) {
        self.frames.borrow_mut().push(frame.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_host::SpriteFrame;

    #[test]
    fn recording_callback_tracks_frames_in_order() {
        let callback = RecordingRenderCallback::new();
        callback.render(&FrameSnapshot {
            tick: 1,
            redraw: true,
            sprites: vec![SpriteFrame {
                name: "cat".to_string(),
                x: 10.0,
                y: 0.0,
                direction: 90.0,
                costume: Some("costume1".to_string()),
                image: Some("cat.png".to_string()),
            }],
        });
        callback.render(&FrameSnapshot {
            tick: 2,
            redraw: false,
            sprites: Vec::new(),
        });

        let frames = callback.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].tick, 1);
        assert!(frames[0].redraw);
        assert_eq!(frames[0].sprites[0].x, 10.0);
        assert_eq!(callback.last_frame().unwrap().tick, 2);
    }
}
