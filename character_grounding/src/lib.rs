//! Multi-ray ground probe: raw samples, contact classification, active-contact
//! ranking and the aggregated ground state that drives grounding.
//!
//! All scratch storage is sized once from [`ProbeSettings`] and reused every
//! tick; nothing here allocates after construction.
#![forbid(unsafe_code)]

use character_settings::{GroundSettings, ProbeSettings};
use physics_rapier::{
    lerp_color, masked_filter, DebugDraw, PhysicsWorld, DEBUG_CYAN, DEBUG_RED, DEBUG_WHITE,
};
use rapier3d::math::{Point, Vector};
use rapier3d::prelude::{Real, RigidBodyHandle};

const CONTACT_MARKER_SIZE: Real = 0.04;
const ACTIVE_MARKER_SIZE: Real = 0.05;
const PROBE_RAY_COLOR: [f32; 4] = [0.6, 0.6, 0.6, 1.0];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroundHit {
    pub point: Point<Real>,
    pub normal: Vector<Real>,
}

/// Downward ray queries used by the probe and by foot placement.
pub trait GroundRaycast {
    fn cast_down(&self, origin: Point<Real>, max_distance: Real, mask: u32) -> Option<GroundHit>;
}

/// Casts against a Rapier world, skipping the colliders of `exclude`.
pub struct WorldRaycast<'a> {
    world: &'a PhysicsWorld,
    exclude: Option<RigidBodyHandle>,
}

impl<'a> WorldRaycast<'a> {
    pub fn new(world: &'a PhysicsWorld, exclude: Option<RigidBodyHandle>) -> Self {
        Self { world, exclude }
    }
}

impl GroundRaycast for WorldRaycast<'_> {
    fn cast_down(&self, origin: Point<Real>, max_distance: Real, mask: u32) -> Option<GroundHit> {
        self.world
            .cast_ray(
                origin,
                -Vector::y(),
                max_distance,
                masked_filter(mask, self.exclude),
            )
            .map(|hit| GroundHit {
                point: hit.point,
                normal: hit.normal,
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastSample {
    pub hit: bool,
    pub point: Point<Real>,
    pub normal: Vector<Real>,
    pub origin: Point<Real>,
    pub direction: Vector<Real>,
    pub cast_distance: Real,
}

impl RaycastSample {
    pub fn empty() -> Self {
        Self {
            hit: false,
            point: Point::origin(),
            normal: Vector::zeros(),
            origin: Point::origin(),
            direction: Vector::zeros(),
            cast_distance: 0.0,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::empty();
    }
}

/// Fixed-capacity hit buffer; hits past capacity are dropped.
#[derive(Clone, Debug)]
pub struct ProbeBuffer {
    samples: Vec<RaycastSample>,
    len: usize,
}

impl ProbeBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: vec![RaycastSample::empty(); capacity],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn hits(&self) -> &[RaycastSample] {
        &self.samples[..self.len]
    }

    pub fn clear(&mut self) {
        for sample in &mut self.samples[..self.len] {
            sample.clear();
        }
        self.len = 0;
    }

    fn push(&mut self, sample: RaycastSample) -> bool {
        match self.samples.get_mut(self.len) {
            Some(slot) => {
                *slot = sample;
                self.len += 1;
                true
            }
            None => false,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ProbePattern {
    /// Radius of the outermost ring; rings are evenly spaced inside it.
    pub radius: Real,
    /// Cast distance beyond `radius`.
    pub max_distance: Real,
    pub rings: u32,
    pub samples_per_ring: u32,
    pub mask: u32,
}

impl ProbePattern {
    pub fn from_settings(settings: &ProbeSettings, radius: Real) -> Self {
        Self {
            radius,
            max_distance: settings.distance,
            rings: settings.rings,
            samples_per_ring: settings.samples_per_ring,
            mask: settings.ground_mask,
        }
    }

    pub fn ray_count(&self) -> usize {
        self.rings as usize * self.samples_per_ring as usize + 1
    }

    fn ring_offset(&self, ring: u32, lap: u32) -> Vector<Real> {
        let ring_radius = self.radius * (ring + 1) as Real / self.rings as Real;
        let angle = lap as Real / self.samples_per_ring as Real * std::f32::consts::TAU;
        Vector::new(angle.sin(), 0.0, angle.cos()) * ring_radius
    }
}

/// Casts the center ray, then every ring from the inside out, writing hits
/// into `buffer` in emission order. Returns the number of recorded hits.
pub fn probe_downwards<C: GroundRaycast + ?Sized>(
    caster: &C,
    origin: Point<Real>,
    pattern: &ProbePattern,
    buffer: &mut ProbeBuffer,
    debug: &mut dyn DebugDraw,
) -> usize {
    buffer.clear();
    let distance = pattern.radius + pattern.max_distance;
    if distance <= 0.0 {
        return 0;
    }
    let direction = -Vector::y();
    let mut cast = |start: Point<Real>, buffer: &mut ProbeBuffer| {
        debug.line(start, start + direction * distance, PROBE_RAY_COLOR);
        if let Some(hit) = caster.cast_down(start, distance, pattern.mask) {
            // Overflow is a silent drop; inner rings were already recorded.
            buffer.push(RaycastSample {
                hit: true,
                point: hit.point,
                normal: hit.normal,
                origin: start,
                direction,
                cast_distance: distance,
            });
        }
    };
    cast(origin, buffer);
    if pattern.rings > 0 && pattern.samples_per_ring > 0 {
        for ring in 0..pattern.rings {
            for lap in 0..pattern.samples_per_ring {
                cast(origin + pattern.ring_offset(ring, lap), buffer);
            }
        }
    }
    buffer.len()
}

/// Where the character would ideally touch the ground: the center of the
/// capsule's lower sphere, and that sphere's radius.
#[derive(Clone, Copy, Debug)]
pub struct ContactFrame {
    pub ideal_contact: Point<Real>,
    pub radius: Real,
}

#[derive(Clone, Copy, Debug)]
pub struct SlopeLimits {
    pub max_detect: Real,
    pub max_ground: Real,
}

impl SlopeLimits {
    pub fn from_settings(settings: &GroundSettings) -> Self {
        Self {
            max_detect: settings.max_detect_slope,
            max_ground: settings.max_ground_slope,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroundContact {
    pub id: usize,
    pub contact: bool,
    pub point: Point<Real>,
    pub normal: Vector<Real>,
    /// Hit point pushed out along the normal by the collider radius.
    pub world_position: Point<Real>,
    /// Ideal contact point minus `world_position`.
    pub offset: Vector<Real>,
    pub vertical_offset: Real,
    pub horizontal_offset_sq: Real,
    pub slope_degrees: Real,
    pub influence: Real,
}

impl GroundContact {
    pub fn empty(id: usize) -> Self {
        Self {
            id,
            contact: false,
            point: Point::origin(),
            normal: Vector::zeros(),
            world_position: Point::origin(),
            offset: Vector::zeros(),
            vertical_offset: 0.0,
            horizontal_offset_sq: 0.0,
            slope_degrees: 0.0,
            influence: 0.0,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::empty(self.id);
    }
}

/// Angle in degrees between world up and `normal`. Zero-length normals read as vertical walls.
pub fn slope_degrees(normal: &Vector<Real>) -> Real {
    let len = normal.norm();
    if len <= 1.0e-6 {
        return 90.0;
    }
    let cos = (normal.y / len).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

pub fn contact_influence(
    slope_degrees: Real,
    max_ground_slope: Real,
    horizontal_offset_sq: Real,
    radius: Real,
) -> Real {
    let slope_ratio = if max_ground_slope > 0.0 {
        (slope_degrees / max_ground_slope).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let reach = radius * 0.4;
    let offset_ratio = if reach > 0.0 {
        (horizontal_offset_sq / reach).clamp(0.0, 1.0)
    } else {
        1.0
    };
    (1.0 - slope_ratio * 0.5) * (1.0 - offset_ratio)
}

pub fn classify(
    id: usize,
    sample: &RaycastSample,
    frame: &ContactFrame,
    limits: SlopeLimits,
) -> GroundContact {
    let normal = sample.normal;
    let world_position = sample.point + normal * frame.radius;
    let slope = slope_degrees(&normal);
    let offset = frame.ideal_contact - world_position;
    let vertical_offset = offset.y;
    let horizontal_offset_sq = offset.x * offset.x + offset.z * offset.z;
    GroundContact {
        id,
        contact: slope <= limits.max_detect,
        point: sample.point,
        normal,
        world_position,
        offset,
        vertical_offset,
        horizontal_offset_sq,
        slope_degrees: slope,
        influence: contact_influence(slope, limits.max_ground, horizontal_offset_sq, frame.radius),
    }
}

/// Top-K contacts by influence, stored as indices into the contact arena.
#[derive(Clone, Debug)]
pub struct ActiveContacts {
    slots: Vec<Option<usize>>,
}

impl ActiveContacts {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().take_while(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.first().map_or(true, Option::is_none)
    }

    pub fn slots(&self) -> &[Option<usize>] {
        &self.slots
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// Ranks `contacts[index]` into the pool. Slots below the insertion point
    /// shift down one place and the last occupant falls off. Equal influence
    /// keeps the earlier contact ahead. Returns the slot taken, if any.
    pub fn offer(&mut self, contacts: &[GroundContact], index: usize) -> Option<usize> {
        let candidate = contacts.get(index)?;
        if !candidate.contact {
            return None;
        }
        for slot in 0..self.slots.len() {
            let take = match self.slots[slot] {
                None => true,
                Some(occupant) => contacts
                    .get(occupant)
                    .map_or(true, |existing| existing.influence < candidate.influence),
            };
            if take {
                for shifted in (slot + 1..self.slots.len()).rev() {
                    self.slots[shifted] = self.slots[shifted - 1];
                }
                self.slots[slot] = Some(index);
                return Some(slot);
            }
        }
        None
    }

    pub fn iter<'a>(
        &'a self,
        contacts: &'a [GroundContact],
    ) -> impl Iterator<Item = &'a GroundContact> + 'a {
        self.slots
            .iter()
            .filter_map(move |slot| slot.and_then(|index| contacts.get(index)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroundAggregate {
    /// Normalized mean of the active normals; world up when there are none.
    pub normal: Vector<Real>,
    /// Sum of active influences divided by the pool capacity.
    pub influence: Real,
    pub active_count: usize,
}

impl GroundAggregate {
    pub fn airborne() -> Self {
        Self {
            normal: Vector::y(),
            influence: 0.0,
            active_count: 0,
        }
    }

    pub fn is_grounded(&self, threshold: Real) -> bool {
        self.influence > threshold
    }
}

impl Default for GroundAggregate {
    fn default() -> Self {
        Self::airborne()
    }
}

/// Empty slots count toward the divisor, so a sparse pool scores low.
pub fn aggregate(pool: &ActiveContacts, contacts: &[GroundContact]) -> GroundAggregate {
    let capacity = pool.capacity();
    if capacity == 0 {
        return GroundAggregate::airborne();
    }
    let mut influence = 0.0;
    let mut normal = Vector::zeros();
    let mut active_count = 0;
    for contact in pool.iter(contacts) {
        influence += contact.influence;
        normal += contact.normal;
        active_count += 1;
    }
    let divisor = capacity as Real;
    let mean = normal / divisor;
    let normal = if mean.norm_squared() > 1.0e-12 {
        mean.normalize()
    } else {
        Vector::y()
    };
    GroundAggregate {
        normal,
        influence: (influence / divisor).clamp(0.0, 1.0),
        active_count,
    }
}

/// Per-character probe state: hit buffer, contact arena and active pool.
#[derive(Clone, Debug)]
pub struct GroundSensor {
    probe: ProbeSettings,
    limits: SlopeLimits,
    threshold: Real,
    buffer: ProbeBuffer,
    contacts: Vec<GroundContact>,
    contact_count: usize,
    active: ActiveContacts,
    aggregate: GroundAggregate,
    grounded: bool,
}

impl GroundSensor {
    pub fn new(probe: &ProbeSettings, ground: &GroundSettings) -> Self {
        let capacity = probe.ray_count();
        Self {
            probe: *probe,
            limits: SlopeLimits::from_settings(ground),
            threshold: ground.amount_threshold,
            buffer: ProbeBuffer::with_capacity(capacity),
            contacts: (0..capacity).map(GroundContact::empty).collect(),
            contact_count: 0,
            active: ActiveContacts::new(probe.max_active_points as usize),
            aggregate: GroundAggregate::airborne(),
            grounded: false,
        }
    }

    pub fn sense<C: GroundRaycast + ?Sized>(
        &mut self,
        caster: &C,
        frame: ContactFrame,
        debug: &mut dyn DebugDraw,
    ) -> GroundAggregate {
        for contact in &mut self.contacts[..self.contact_count] {
            contact.clear();
        }
        self.active.reset();

        let pattern = ProbePattern::from_settings(&self.probe, frame.radius);
        let hits = probe_downwards(caster, frame.ideal_contact, &pattern, &mut self.buffer, debug);
        self.contact_count = hits.min(self.contacts.len());

        for index in 0..self.contact_count {
            let contact = classify(index, &self.buffer.hits()[index], &frame, self.limits);
            self.contacts[index] = contact;
            self.active.offer(&self.contacts, index);
            debug.marker(
                contact.point,
                CONTACT_MARKER_SIZE,
                lerp_color(DEBUG_CYAN, DEBUG_RED, contact.influence),
            );
            debug.line(contact.point, contact.world_position, DEBUG_CYAN);
        }
        for contact in self.active.iter(&self.contacts) {
            debug.marker(contact.point, ACTIVE_MARKER_SIZE, DEBUG_WHITE);
        }

        self.aggregate = aggregate(&self.active, &self.contacts);
        let grounded = self.aggregate.is_grounded(self.threshold);
        if grounded != self.grounded {
            log::debug!(
                "grounded -> {} (influence {:.3}, {} active)",
                grounded,
                self.aggregate.influence,
                self.aggregate.active_count
            );
        }
        self.grounded = grounded;
        self.aggregate
    }

    pub fn aggregate(&self) -> GroundAggregate {
        self.aggregate
    }

    pub fn grounded(&self) -> bool {
        self.grounded
    }

    pub fn threshold(&self) -> Real {
        self.threshold
    }

    pub fn samples(&self) -> &[RaycastSample] {
        self.buffer.hits()
    }

    pub fn contacts(&self) -> &[GroundContact] {
        &self.contacts[..self.contact_count]
    }

    pub fn active(&self) -> &ActiveContacts {
        &self.active
    }

    pub fn active_contacts(&self) -> impl Iterator<Item = &GroundContact> + '_ {
        self.active.iter(&self.contacts)
    }

    pub fn best_contact(&self) -> Option<&GroundContact> {
        self.active_contacts().next()
    }
}
