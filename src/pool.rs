//! Reusable visual handles.
//!
//! Handles are created in batches through a [`HandleRenderer`] and then
//! cycle between free (hidden) and bound (visible). The pool never shrinks;
//! handles are destroyed only by [`HandlePool::teardown`].

use anyhow::Result;
use nalgebra::{UnitQuaternion, Vector3};

use crate::detect::DetectionKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub usize);

/// Everything a renderer needs to show one detection.
#[derive(Clone, Debug, PartialEq)]
pub struct HandleBinding<'a> {
    pub key: DetectionKey,
    pub class_id: usize,
    pub sprite: &'a str,
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    /// Uniform scale.
    pub scale: f32,
}

/// Display side of the pool.
///
/// Implementations own the heavy per-handle resources. A failing `bind`
/// skips that one detection; the rest of the cycle still reconciles.
pub trait HandleRenderer {
    /// Allocate the resources behind `id`. New handles start hidden.
    fn create(&mut self, id: HandleId) -> Result<()>;

    fn set_visible(&mut self, id: HandleId, visible: bool);

    fn bind(&mut self, id: HandleId, binding: &HandleBinding<'_>) -> Result<()>;

    fn destroy(&mut self, id: HandleId);
}

struct Slot {
    rotation: UnitQuaternion<f32>,
    bound: bool,
}

pub struct HandlePool {
    slots: Vec<Slot>,
    /// Stack of free ids; the lowest id is on top.
    free: Vec<HandleId>,
    /// Bound this cycle, in binding order.
    bound: Vec<HandleId>,
    batch_size: usize,
    growths: u64,
}

impl HandlePool {
    pub fn new(batch_size: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            bound: Vec::new(),
            batch_size: batch_size.max(1),
            growths: 0,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Total handles ever created and not torn down.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }

    pub fn growths(&self) -> u64 {
        self.growths
    }

    /// Take a free handle, growing the pool by one batch when none is left.
    pub fn acquire(&mut self, renderer: &mut dyn HandleRenderer) -> Result<HandleId> {
        if self.free.is_empty() {
            self.grow(renderer)?;
        }
        // grow() always leaves at least one free id on success
        let id = match self.free.pop() {
            Some(id) => id,
            None => anyhow::bail!("handle pool has no free handles after growth"),
        };
        self.slots[id.0].bound = true;
        self.bound.push(id);
        Ok(id)
    }

    /// Hide one bound handle and return it to the free stack.
    pub fn release(&mut self, id: HandleId, renderer: &mut dyn HandleRenderer) {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return;
        };
        if !slot.bound {
            return;
        }
        slot.bound = false;
        renderer.set_visible(id, false);
        self.bound.retain(|b| *b != id);
        self.free.push(id);
    }

    /// Hide every bound handle and make all of them free again.
    pub fn release_all(&mut self, renderer: &mut dyn HandleRenderer) {
        // reverse so the next cycle hands out ids in the same order
        while let Some(id) = self.bound.pop() {
            self.slots[id.0].bound = false;
            renderer.set_visible(id, false);
            self.free.push(id);
        }
    }

    pub fn rotation(&self, id: HandleId) -> Option<UnitQuaternion<f32>> {
        self.slots.get(id.0).map(|slot| slot.rotation)
    }

    pub fn set_rotation(&mut self, id: HandleId, rotation: UnitQuaternion<f32>) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            slot.rotation = rotation;
        }
    }

    /// Destroy every handle. The pool is empty afterwards.
    pub fn teardown(&mut self, renderer: &mut dyn HandleRenderer) {
        for index in 0..self.slots.len() {
            renderer.destroy(HandleId(index));
        }
        log::info!("pool: destroyed {} handles", self.slots.len());
        self.slots.clear();
        self.free.clear();
        self.bound.clear();
    }

    fn grow(&mut self, renderer: &mut dyn HandleRenderer) -> Result<()> {
        let start = self.slots.len();
        let mut created = Vec::with_capacity(self.batch_size);
        for index in start..start + self.batch_size {
            let id = HandleId(index);
            if let Err(err) = renderer.create(id) {
                // keep what was created; the pool stays consistent
                for id in created.into_iter().rev() {
                    self.free.push(id);
                }
                return Err(err.context(format!("failed to create handle {}", index)));
            }
            self.slots.push(Slot {
                rotation: UnitQuaternion::identity(),
                bound: false,
            });
            created.push(id);
        }
        for id in created.into_iter().rev() {
            self.free.push(id);
        }
        self.growths += 1;
        log::debug!(
            "pool: grew by {} to {} handles",
            self.batch_size,
            self.slots.len()
        );
        Ok(())
    }
}
