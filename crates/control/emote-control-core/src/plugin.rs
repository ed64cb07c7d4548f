//! Extension points. Plugins implement these; the engine never needs to know
//! which plugin it is talking to.

use crate::data::AnimationClip;

/// Supplies extra clips at registration time.
pub trait ClipProvider {
    fn name(&self) -> &str;

    /// Clips to add to the engine's library. Only differential clips are
    /// accepted.
    fn clips(&self) -> Vec<AnimationClip>;
}

/// Yields a drag impulse on every tick.
pub trait PhysicsPerturber: Send {
    fn name(&self) -> &str;

    /// `(dx, dy)` to feed into `apply_drag` for a tick of `dt` seconds.
    fn perturb(&mut self, dt: f32) -> (f32, f32);
}
