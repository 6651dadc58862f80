//! Arena of submix nodes owned by the render thread.
//!
//! Nodes refer to each other only by [`SubmixId`]. To render a child, its node
//! is checked out of the arena (its slot is marked [`Slot::Rendering`]),
//! processed with mutable access to the rest of the arena, and checked back
//! in. A node that is asked to render while checked out is part of a cycle and
//! is skipped.

use std::collections::HashMap;

use crate::mixer::source::SourceManager;
use crate::mixer::submix::SubmixNode;
use crate::mixer::types::{LogThrottle, RenderContext, SubmixId};
use crate::soundfield::{AmbisonicPacket, Rotation};

/// Per-callback inputs shared by every node.
#[derive(Clone, Copy)]
pub struct RenderInputs<'a> {
    pub ctx: RenderContext,
    pub sources: &'a SourceManager,
    pub listener_rotation: Rotation,
}

/// Result of asking the arena to render one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    /// The id does not resolve; callers drop their reference.
    Missing,
    /// The node is already on the render stack.
    InFlight,
}

/// What is currently known about an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Missing,
    InFlight,
    Ready { soundfield: bool },
}

enum Slot {
    Ready(Box<SubmixNode>),
    Rendering,
}

#[derive(Default)]
pub struct SubmixRegistry {
    slots: HashMap<SubmixId, Slot>,
    /// `None` grows on demand.
    capacity: Option<usize>,
    packet_log: LogThrottle,
}

impl SubmixRegistry {
    /// A registry that holds at most `capacity` nodes without reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: HashMap::with_capacity(capacity),
            capacity: Some(capacity),
            packet_log: LogThrottle::default(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|capacity| self.slots.len() >= capacity)
    }

    /// Register a node. Hands it back if the id is taken or the registry is
    /// full.
    pub fn insert(&mut self, node: Box<SubmixNode>) -> Result<(), Box<SubmixNode>> {
        if self.is_full() || self.slots.contains_key(&node.id()) {
            return Err(node);
        }
        self.slots.insert(node.id(), Slot::Ready(node));
        Ok(())
    }

    pub fn remove(&mut self, id: SubmixId) -> Option<Box<SubmixNode>> {
        match self.slots.remove(&id)? {
            Slot::Ready(node) => Some(node),
            Slot::Rendering => {
                // Removal only happens between callbacks; keep the marker so
                // the checked-out node can return.
                self.slots.insert(id, Slot::Rendering);
                None
            }
        }
    }

    pub fn contains(&self, id: SubmixId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: SubmixId) -> Option<&SubmixNode> {
        match self.slots.get(&id)? {
            Slot::Ready(node) => Some(&**node),
            Slot::Rendering => None,
        }
    }

    pub fn get_mut(&mut self, id: SubmixId) -> Option<&mut SubmixNode> {
        match self.slots.get_mut(&id)? {
            Slot::Ready(node) => Some(&mut **node),
            Slot::Rendering => None,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = SubmixId> + '_ {
        self.slots.keys().copied()
    }

    pub fn lookup(&self, id: SubmixId) -> Lookup {
        match self.slots.get(&id) {
            None => Lookup::Missing,
            Some(Slot::Rendering) => Lookup::InFlight,
            Some(Slot::Ready(node)) => Lookup::Ready {
                soundfield: node.is_soundfield(),
            },
        }
    }

    fn checkout(&mut self, id: SubmixId) -> Result<Box<SubmixNode>, RenderOutcome> {
        let slot = self.slots.get_mut(&id).ok_or(RenderOutcome::Missing)?;
        match std::mem::replace(slot, Slot::Rendering) {
            Slot::Ready(node) => Ok(node),
            Slot::Rendering => Err(RenderOutcome::InFlight),
        }
    }

    fn checkin(&mut self, node: Box<SubmixNode>) {
        if let Some(slot) = self.slots.get_mut(&node.id()) {
            *slot = Slot::Ready(node);
        }
    }

    /// Render `id` as PCM and add it into `out`.
    pub fn render_into(
        &mut self,
        id: SubmixId,
        out: &mut [f32],
        inputs: &RenderInputs<'_>,
    ) -> RenderOutcome {
        let mut node = match self.checkout(id) {
            Ok(node) => node,
            Err(outcome) => return outcome,
        };
        node.process_audio(out, self, inputs);
        self.checkin(node);
        RenderOutcome::Rendered
    }

    /// Render soundfield node `id` into `packet`.
    pub fn render_packet(
        &mut self,
        id: SubmixId,
        packet: &mut dyn AmbisonicPacket,
        inputs: &RenderInputs<'_>,
    ) -> RenderOutcome {
        let mut node = match self.checkout(id) {
            Ok(node) => node,
            Err(outcome) => return outcome,
        };
        if node.is_soundfield() {
            node.process_packet(packet, self, inputs);
        } else if self.packet_log.ready() {
            log::error!("{} cannot render into a soundfield packet", id);
        }
        self.checkin(node);
        RenderOutcome::Rendered
    }
}

impl std::fmt::Debug for SubmixRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmixRegistry")
            .field("nodes", &self.slots.len())
            .finish()
    }
}
