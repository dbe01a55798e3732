use anyhow::Result;

use crate::config::ClassAsset;
use crate::detect::Detection;
use crate::pipeline::DetectionGate;

/// Audio/visual cue playback, owned by the host application.
pub trait CuePlayer {
    /// Start `cue` and show its indicator.
    fn play(&mut self, cue: &str) -> Result<()>;

    /// Stop playback and hide the indicator.
    fn stop(&mut self);

    fn is_playing(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FocusOutcome {
    /// A cue was playing and has been stopped; detection resumed.
    Released,
    /// The center target's cue started; detection paused.
    Acquired { class_id: usize },
    /// Nothing at the center this cycle.
    NoTarget,
    /// The center target's class has no cue, or playback failed.
    NoCue { class_id: usize },
}

/// Takes exclusive focus on the center target by closing the detection gate
/// while its cue plays.
pub struct FocusController {
    gate: DetectionGate,
    cues: Vec<Option<String>>,
    focused: Option<usize>,
}

impl FocusController {
    pub fn new(gate: DetectionGate, classes: &[ClassAsset]) -> Self {
        Self {
            gate,
            cues: classes.iter().map(|asset| asset.cue.clone()).collect(),
            focused: None,
        }
    }

    /// Class currently holding focus.
    pub fn focused(&self) -> Option<usize> {
        self.focused
    }

    /// Toggle focus from a user trigger.
    pub fn trigger(&mut self, center: Option<&Detection>, player: &mut dyn CuePlayer) -> FocusOutcome {
        if self.focused.is_some() || player.is_playing() {
            player.stop();
            self.release();
            return FocusOutcome::Released;
        }

        let Some(target) = center else {
            return FocusOutcome::NoTarget;
        };
        let class_id = target.class_id();
        let Some(cue) = self.cues.get(class_id).and_then(|cue| cue.as_deref()) else {
            log::warn!("focus: class {} has no cue", class_id);
            return FocusOutcome::NoCue { class_id };
        };
        if let Err(err) = player.play(cue) {
            log::warn!("focus: failed to play {} for class {}: {:#}", cue, class_id, err);
            return FocusOutcome::NoCue { class_id };
        }

        self.focused = Some(class_id);
        self.gate.set_detecting(false);
        log::debug!("focus: acquired class {}", class_id);
        FocusOutcome::Acquired { class_id }
    }

    /// Release focus once the cue has finished. Returns true on release.
    pub fn poll(&mut self, player: &dyn CuePlayer) -> bool {
        if self.focused.is_some() && !player.is_playing() {
            self.release();
            return true;
        }
        false
    }

    /// Drop focus without a user trigger, e.g. when the AR session stops
    /// tracking. Stops any playing cue. Returns true if focus was held.
    pub fn interrupt(&mut self, player: &mut dyn CuePlayer) -> bool {
        if player.is_playing() {
            player.stop();
        }
        let held = self.focused.is_some();
        self.release();
        held
    }

    fn release(&mut self) {
        if let Some(class_id) = self.focused.take() {
            log::debug!("focus: released class {}", class_id);
        }
        self.gate.set_detecting(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[derive(Default)]
    struct FakePlayer {
        playing: Option<String>,
        fail: bool,
    }

    impl CuePlayer for FakePlayer {
        fn play(&mut self, cue: &str) -> Result<()> {
            if self.fail {
                anyhow::bail!("audio device busy");
            }
            self.playing = Some(cue.to_string());
            Ok(())
        }

        fn stop(&mut self) {
            self.playing = None;
        }

        fn is_playing(&self) -> bool {
            self.playing.is_some()
        }
    }

    fn classes() -> Vec<ClassAsset> {
        vec![
            ClassAsset {
                name: "drum".into(),
                sprite: "drum.png".into(),
                native_width: 1.0,
                cue: Some("drum.wav".into()),
            },
            ClassAsset {
                name: "bell".into(),
                sprite: "bell.png".into(),
                native_width: 1.0,
                cue: None,
            },
        ]
    }

    fn target(class_id: usize) -> Detection {
        Detection::candidate(class_id, 0.9, BoundingBox::new(300.0, 300.0, 40.0, 40.0))
    }

    #[test]
    fn trigger_toggles_focus_and_gate() {
        let gate = DetectionGate::new();
        let mut focus = FocusController::new(gate.clone(), &classes());
        let mut player = FakePlayer::default();

        let t = target(0);
        assert_eq!(
            focus.trigger(Some(&t), &mut player),
            FocusOutcome::Acquired { class_id: 0 }
        );
        assert!(!gate.is_detecting());
        assert_eq!(player.playing.as_deref(), Some("drum.wav"));

        assert_eq!(focus.trigger(Some(&t), &mut player), FocusOutcome::Released);
        assert!(gate.is_detecting());
        assert!(!player.is_playing());
        assert_eq!(focus.focused(), None);
    }

    #[test]
    fn missing_cue_or_target_changes_nothing() {
        let gate = DetectionGate::new();
        let mut focus = FocusController::new(gate.clone(), &classes());
        let mut player = FakePlayer::default();

        assert_eq!(focus.trigger(None, &mut player), FocusOutcome::NoTarget);
        let bell = target(1);
        assert_eq!(
            focus.trigger(Some(&bell), &mut player),
            FocusOutcome::NoCue { class_id: 1 }
        );
        let unknown = target(5);
        assert_eq!(
            focus.trigger(Some(&unknown), &mut player),
            FocusOutcome::NoCue { class_id: 5 }
        );
        player.fail = true;
        let drum = target(0);
        assert_eq!(
            focus.trigger(Some(&drum), &mut player),
            FocusOutcome::NoCue { class_id: 0 }
        );
        assert!(gate.is_detecting());
    }

    #[test]
    fn poll_releases_after_cue_finishes() {
        let gate = DetectionGate::new();
        let mut focus = FocusController::new(gate.clone(), &classes());
        let mut player = FakePlayer::default();
        let t = target(0);
        focus.trigger(Some(&t), &mut player);

        assert!(!focus.poll(&player));
        assert!(!gate.is_detecting());

        player.playing = None;
        assert!(focus.poll(&player));
        assert!(gate.is_detecting());
        assert!(!focus.poll(&player));
    }

    #[test]
    fn interrupt_stops_cue_and_reopens_gate() {
        let gate = DetectionGate::new();
        let mut focus = FocusController::new(gate.clone(), &classes());
        let mut player = FakePlayer::default();
        let t = target(0);
        focus.trigger(Some(&t), &mut player);

        assert!(focus.interrupt(&mut player));
        assert!(!player.is_playing());
        assert!(gate.is_detecting());
        assert_eq!(focus.focused(), None);
        assert!(!focus.interrupt(&mut player));
    }
}
