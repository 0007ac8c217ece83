//! Discrete camera views and the transitions between them.
//!
//! Each [`CameraView`] maps to a distance and pitch from which the clip planes,
//! shadow frustum and outline opacity are derived. Listeners hear about a view
//! change before the camera starts moving.

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

use crate::{
    config::CameraConfig,
    hex::{HexCoord, HexLayout},
};

/// Level of detail, ordered from most to least detailed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum CameraView {
    Close = 1,
    #[default]
    Medium = 2,
    Far = 3,
}

impl CameraView {
    pub fn level(self) -> i32 {
        self as i32
    }

    /// Number of detail levels between `self` and `other`.
    pub fn steps_to(self, other: CameraView) -> u32 {
        self.level().abs_diff(other.level())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShadowBounds {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for ShadowBounds {
    fn default() -> Self {
        Self {
            left: -22.0,
            right: 18.0,
            top: 14.0,
            bottom: -12.0,
            near: 8.0,
            far: 38.0,
        }
    }
}

impl ShadowBounds {
    fn scaled(&self, factor: f32) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
            top: self.top * factor,
            bottom: self.bottom * factor,
            near: self.near * factor,
            far: self.far * factor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewParameters {
    pub view: CameraView,
    pub distance: f32,
    pub angle: f32,
    /// Camera position relative to its target.
    pub offset: Vec3,
    pub shadows_enabled: bool,
    pub shadow: ShadowBounds,
    pub near_clip: f32,
    pub far_clip: f32,
    pub outline_opacity: f32,
}

impl ViewParameters {
    pub fn for_view(config: &CameraConfig, view: CameraView) -> Self {
        let preset = config.preset(view);
        let distance = preset.distance;
        let angle = preset.angle_degrees.to_radians();
        let offset = Vec3::new(0.0, angle.sin() * distance, angle.cos() * distance);

        let shadow_scale = if config.shadow_reference_distance > 0.0 {
            distance / config.shadow_reference_distance
        } else {
            1.0
        };

        let nearest = config.close.distance.min(config.far.distance);
        let farthest = config.close.distance.max(config.far.distance);
        let t = if farthest > nearest {
            ((distance - nearest) / (farthest - nearest)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let outline_opacity =
            config.outline_opacity_near + (config.outline_opacity_far - config.outline_opacity_near) * t;

        Self {
            view,
            distance,
            angle,
            offset,
            shadows_enabled: preset.shadows,
            shadow: config.shadow.scaled(shadow_scale),
            near_clip: config.near_clip,
            far_clip: distance * config.far_clip_factor,
            outline_opacity,
        }
    }
}

/// Cubic ease-in-out over `[0, 1]`.
pub fn ease_in_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraAnimation {
    pub from_position: Vec3,
    pub to_position: Vec3,
    pub from_target: Vec3,
    pub to_target: Vec3,
    pub duration: f32,
    elapsed: f32,
}

impl CameraAnimation {
    pub fn new(
        from_position: Vec3,
        to_position: Vec3,
        from_target: Vec3,
        to_target: Vec3,
        duration: f32,
    ) -> Self {
        Self {
            from_position,
            to_position,
            from_target,
            to_target,
            duration: duration.max(0.0),
            elapsed: 0.0,
        }
    }

    pub fn progress(&self) -> f32 {
        if self.duration <= 0.0 {
            1.0
        } else {
            (self.elapsed / self.duration).clamp(0.0, 1.0)
        }
    }

    /// `(position, target)` at the current progress.
    pub fn sample(&self) -> (Vec3, Vec3) {
        let k = ease_in_out_cubic(self.progress());
        (
            self.from_position.lerp(self.to_position, k),
            self.from_target.lerp(self.to_target, k),
        )
    }

    pub fn advance(&mut self, dt: f32) -> bool {
        self.elapsed += dt.max(0.0);
        self.is_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.progress() >= 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ViewListener = Box<dyn FnMut(CameraView)>;

pub struct CameraViewController {
    config: CameraConfig,
    layout: HexLayout,
    view: CameraView,
    params: ViewParameters,
    position: Vec3,
    target: Vec3,
    animation: Option<CameraAnimation>,
    listeners: Vec<(ListenerId, ViewListener)>,
    next_listener: u64,
}

impl CameraViewController {
    pub fn new(config: CameraConfig, layout: HexLayout) -> Self {
        let view = config.initial_view;
        let params = ViewParameters::for_view(&config, view);
        Self {
            position: params.offset,
            target: Vec3::ZERO,
            config,
            layout,
            view,
            params,
            animation: None,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn view(&self) -> CameraView {
        self.view
    }

    pub fn parameters(&self) -> &ViewParameters {
        &self.params
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn animation(&self) -> Option<&CameraAnimation> {
        self.animation.as_ref()
    }

    /// Registers `listener` and immediately calls it with the active view.
    pub fn add_listener(&mut self, mut listener: impl FnMut(CameraView) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        listener(self.view);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify(&mut self, view: CameraView) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(view);
        }
    }

    pub fn transition_duration(&self, from: CameraView, to: CameraView) -> f32 {
        self.config.transition_base_secs + from.steps_to(to) as f32 * self.config.transition_step_secs
    }

    /// Switches to `view`, notifies listeners, then starts the camera animation.
    pub fn transition(&mut self, view: CameraView) -> ViewParameters {
        let from = self.view;
        self.view = view;
        self.params = ViewParameters::for_view(&self.config, view);
        self.notify(view);

        let duration = self.transition_duration(from, view);
        let destination = self.target + self.params.offset;
        self.animation = Some(CameraAnimation::new(
            self.position,
            destination,
            self.target,
            self.target,
            duration,
        ));
        self.params
    }

    /// Recenters on `hex`, keeping the current view offset.
    pub fn move_center(&mut self, hex: HexCoord, flat: bool) -> CameraAnimation {
        let new_target = self.layout.to_world(hex, flat);
        self.move_to(new_target)
    }

    pub fn move_to(&mut self, new_target: Vec3) -> CameraAnimation {
        let delta = Vec3::new(new_target.x - self.target.x, 0.0, new_target.z - self.target.z);
        let animation = CameraAnimation::new(
            self.position,
            self.position + delta,
            self.target,
            new_target,
            self.config.move_duration_secs,
        );
        self.animation = Some(animation);
        animation
    }

    /// Steps the active animation. Returns true while the camera is still moving.
    pub fn advance(&mut self, dt: f32) -> bool {
        let Some(animation) = self.animation.as_mut() else {
            return false;
        };
        let finished = animation.advance(dt);
        let (position, target) = animation.sample();
        self.position = position;
        self.target = target;
        if finished {
            self.animation = None;
        }
        !finished
    }

    /// Briefly pulses labels open while in the medium view.
    pub fn expand_labels_temporarily(&mut self) -> bool {
        if self.view != CameraView::Medium {
            return false;
        }
        for (_, listener) in self.listeners.iter_mut() {
            listener(CameraView::Close);
            listener(CameraView::Medium);
        }
        true
    }
}
