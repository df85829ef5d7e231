//! Orientation tracking from DMP packets.
//!
//! The control loop decodes every packet into a quaternion, rotates the unit
//! basis with it and logs how far the basis moved since the previous sample.
//! The movement figure is informational only; it never feeds the detonation
//! state machine.

use core::ops::{Add, Sub};

use crate::fifo::FifoPacket;

/// Fixed-point scale of the DMP quaternion words (1.0 == 2^14).
pub const QUATERNION_SCALE: f32 = 16_384.0;

/// Basis movement above which a sample counts as a large jolt.
pub const LARGE_MOVEMENT_THRESHOLD: f32 = 0.5;

/// Packet offsets of the w, x, y and z words.
const QUATERNION_OFFSETS: [usize; 4] = [0, 4, 8, 12];

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const UNIT_X: Self = Self::new(1.0, 0.0, 0.0);
    pub const UNIT_Y: Self = Self::new(0.0, 1.0, 0.0);
    pub const UNIT_Z: Self = Self::new(0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn scale(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }
}

impl Add for Vector3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Rotation quaternion decoded from a packet.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 0.0);

    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Decodes the big-endian quaternion words of a default-format packet.
    pub fn from_packet(packet: &FifoPacket) -> Self {
        let [w, x, y, z] =
            QUATERNION_OFFSETS.map(|offset| f32::from(packet.be_i16(offset)) / QUATERNION_SCALE);
        Self::new(w, x, y, z)
    }

    pub fn norm(self) -> f32 {
        libm::sqrtf(self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z)
    }

    /// Unit-length copy; a zero quaternion maps to the identity.
    #[must_use]
    pub fn normalized(self) -> Self {
        let norm = self.norm();
        if norm <= f32::EPSILON {
            return Self::IDENTITY;
        }
        Self::new(self.w / norm, self.x / norm, self.y / norm, self.z / norm)
    }

    /// Rotates `v` by this (unit) quaternion.
    pub fn rotate(self, v: Vector3) -> Vector3 {
        let axis = Vector3::new(self.x, self.y, self.z);
        let t = axis.cross(v).scale(2.0);
        v + t.scale(self.w) + axis.cross(t)
    }
}

/// The unit basis after rotation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OrientationFrame {
    pub i: Vector3,
    pub j: Vector3,
    pub k: Vector3,
}

impl OrientationFrame {
    pub const REST: Self = Self {
        i: Vector3::UNIT_X,
        j: Vector3::UNIT_Y,
        k: Vector3::UNIT_Z,
    };

    pub fn from_quaternion(q: Quaternion) -> Self {
        let q = q.normalized();
        Self {
            i: q.rotate(Vector3::UNIT_X),
            j: q.rotate(Vector3::UNIT_Y),
            k: q.rotate(Vector3::UNIT_Z),
        }
    }

    /// Euclidean distance between the two frames' basis vectors taken together.
    pub fn change_since(&self, previous: &Self) -> f32 {
        let squared = (self.i - previous.i).length_squared()
            + (self.j - previous.j).length_squared()
            + (self.k - previous.k).length_squared();
        libm::sqrtf(squared)
    }
}

/// One processed packet.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OrientationSample {
    pub quaternion: Quaternion,
    pub frame: OrientationFrame,
    /// Movement since the previous sample; `None` for the first one.
    pub change: Option<f32>,
}

impl OrientationSample {
    /// Returns `true` when the movement since the previous sample exceeds
    /// [`LARGE_MOVEMENT_THRESHOLD`].
    pub fn is_large_movement(&self) -> bool {
        self.change
            .is_some_and(|change| change > LARGE_MOVEMENT_THRESHOLD)
    }
}

/// Tracks the previous frame so each packet yields a movement figure.
#[derive(Copy, Clone, Debug, Default)]
pub struct OrientationEstimator {
    previous: Option<OrientationFrame>,
}

impl OrientationEstimator {
    pub const fn new() -> Self {
        Self { previous: None }
    }

    /// Frame from the last processed packet.
    pub fn previous(&self) -> Option<&OrientationFrame> {
        self.previous.as_ref()
    }

    /// Forgets the previous frame, e.g. after a FIFO reset.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Decodes `packet` and measures movement against the previous packet.
    pub fn update(&mut self, packet: &FifoPacket) -> OrientationSample {
        let quaternion = Quaternion::from_packet(packet);
        let frame = OrientationFrame::from_quaternion(quaternion);
        let change = self.previous.map(|previous| frame.change_since(&previous));
        self.previous = Some(frame);
        OrientationSample {
            quaternion,
            frame,
            change,
        }
    }
}
