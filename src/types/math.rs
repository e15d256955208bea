//! Geometric value types.
//!
//! LSL vectors and rotations are single-precision. The operator semantics here
//! follow the script language: `vector * vector` is the dot product, `%` is the
//! cross product and `vector * rotation` rotates the vector.

use std::ops::{Add, Mul, Neg, Sub};

/// Three-component single-precision vector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector {
    pub const ZERO: Vector = Vector::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Scalar product.
    pub fn dot(self, rhs: Vector) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Vector product.
    pub fn cross(self, rhs: Vector) -> Vector {
        Vector::new(
            self.y * rhs.z - rhs.y * self.z,
            self.z * rhs.x - rhs.z * self.x,
            self.x * rhs.y - rhs.x * self.y,
        )
    }

    pub fn magnitude(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn scale(self, factor: f32) -> Vector {
        Vector::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vector {
    type Output = Vector;

    fn add(self, rhs: Vector) -> Vector {
        Vector::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector {
    type Output = Vector;

    fn sub(self, rhs: Vector) -> Vector {
        Vector::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vector {
    type Output = Vector;

    fn neg(self) -> Vector {
        Vector::new(-self.x, -self.y, -self.z)
    }
}

/// Rotates the vector by the quaternion.
impl Mul<Quaternion> for Vector {
    type Output = Vector;

    fn mul(self, rot: Quaternion) -> Vector {
        let rw = -rot.x * self.x - rot.y * self.y - rot.z * self.z;
        let rx = rot.s * self.x + rot.y * self.z - rot.z * self.y;
        let ry = rot.s * self.y + rot.z * self.x - rot.x * self.z;
        let rz = rot.s * self.z + rot.x * self.y - rot.y * self.x;

        Vector::new(
            -rw * rot.x + rx * rot.s - ry * rot.z + rz * rot.y,
            -rw * rot.y + ry * rot.s - rz * rot.x + rx * rot.z,
            -rw * rot.z + rz * rot.s - rx * rot.y + ry * rot.x,
        )
    }
}

/// Single-precision rotation. `s` is the scalar part.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub s: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(x: f32, y: f32, z: f32, s: f32) -> Self {
        Self { x, y, z, s }
    }

    pub fn conjugate(self) -> Quaternion {
        Quaternion::new(-self.x, -self.y, -self.z, self.s)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.s.is_finite()
    }
}

impl Add for Quaternion {
    type Output = Quaternion;

    fn add(self, rhs: Quaternion) -> Quaternion {
        Quaternion::new(
            self.x + rhs.x,
            self.y + rhs.y,
            self.z + rhs.z,
            self.s + rhs.s,
        )
    }
}

impl Sub for Quaternion {
    type Output = Quaternion;

    fn sub(self, rhs: Quaternion) -> Quaternion {
        Quaternion::new(
            self.x - rhs.x,
            self.y - rhs.y,
            self.z - rhs.z,
            self.s - rhs.s,
        )
    }
}

impl Neg for Quaternion {
    type Output = Quaternion;

    fn neg(self) -> Quaternion {
        Quaternion::new(-self.x, -self.y, -self.z, -self.s)
    }
}

/// Composes two rotations: `a * b` applies `a` first, then `b`.
impl Mul for Quaternion {
    type Output = Quaternion;

    fn mul(self, b: Quaternion) -> Quaternion {
        let a = self;
        Quaternion::new(
            b.s * a.x + b.x * a.s + b.y * a.z - b.z * a.y,
            b.s * a.y + b.y * a.s + b.z * a.x - b.x * a.z,
            b.s * a.z + b.z * a.s + b.x * a.y - b.y * a.x,
            b.s * a.s - b.x * a.x - b.y * a.y - b.z * a.z,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HALF_SQRT2: f32 = std::f32::consts::FRAC_1_SQRT_2;

    fn assert_vec_close(actual: Vector, expected: Vector) {
        assert!(
            (actual - expected).magnitude() < 1e-5,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn dot_and_cross() {
        let x = Vector::new(1.0, 0.0, 0.0);
        let y = Vector::new(0.0, 1.0, 0.0);
        assert_eq!(x.dot(y), 0.0);
        assert_eq!(x.dot(x), 1.0);
        assert_eq!(x.cross(y), Vector::new(0.0, 0.0, 1.0));
        assert_eq!(y.cross(x), Vector::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn rotate_quarter_turn_about_z() {
        let rot = Quaternion::new(0.0, 0.0, HALF_SQRT2, HALF_SQRT2);
        assert_vec_close(Vector::new(1.0, 0.0, 0.0) * rot, Vector::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn conjugate_undoes_rotation() {
        let rot = Quaternion::new(0.0, 0.0, HALF_SQRT2, HALF_SQRT2);
        let v = Vector::new(1.0, 2.0, 3.0);
        assert_vec_close((v * rot) * rot.conjugate(), v);
    }

    #[test]
    fn identity_is_neutral() {
        let rot = Quaternion::new(0.1, 0.2, 0.3, 0.9);
        assert_eq!(rot * Quaternion::IDENTITY, rot);
        assert_eq!(Quaternion::IDENTITY * rot, rot);
        let v = Vector::new(4.0, -5.0, 6.0);
        assert_eq!(v * Quaternion::IDENTITY, v);
    }

    #[test]
    fn composed_rotation_matches_sequential() {
        let a = Quaternion::new(0.0, 0.0, HALF_SQRT2, HALF_SQRT2);
        let b = Quaternion::new(HALF_SQRT2, 0.0, 0.0, HALF_SQRT2);
        let v = Vector::new(1.0, 0.0, 0.0);
        assert_vec_close(v * (a * b), (v * a) * b);
    }
}
