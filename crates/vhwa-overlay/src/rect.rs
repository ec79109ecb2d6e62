//! Integer rectangles in surface/display space.
//!
//! `right()`/`bottom()` are inclusive (the last covered pixel), so a rect of width `w` starting
//! at `x` ends at `x + w - 1`. Guest `RECTL`s are exclusive and convert through
//! [`Rect::from_rectl`].

use serde::{Deserialize, Serialize};
use vhwa_protocol::vhwa_cmd::RectL;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Rect covering `(x1, y1)..=(x2, y2)`.
    pub const fn from_coords(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self::new(x1, y1, x2 - x1 + 1, y2 - y1 + 1)
    }

    pub const fn from_size(w: i32, h: i32) -> Self {
        Self::new(0, 0, w, h)
    }

    pub const fn from_rectl(r: &RectL) -> Self {
        Self::new(r.left, r.top, r.right - r.left, r.bottom - r.top)
    }

    /// Inverse of [`Rect::from_rectl`].
    pub const fn to_rectl(&self) -> RectL {
        RectL::new(self.x, self.y, self.x + self.w, self.y + self.h)
    }

    pub const fn left(&self) -> i32 {
        self.x
    }

    pub const fn top(&self) -> i32 {
        self.y
    }

    pub const fn right(&self) -> i32 {
        self.x + self.w - 1
    }

    pub const fn bottom(&self) -> i32 {
        self.y + self.h - 1
    }

    pub const fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    /// Overlap of two rects; disjoint or empty inputs give the empty default rect.
    pub fn intersected(&self, other: &Rect) -> Rect {
        if self.is_empty() || other.is_empty() {
            return Rect::default();
        }
        let l = self.left().max(other.left());
        let t = self.top().max(other.top());
        let r = self.right().min(other.right());
        let b = self.bottom().min(other.bottom());
        if l > r || t > b {
            return Rect::default();
        }
        Rect::from_coords(l, t, r, b)
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersected(other).is_empty()
    }

    /// Bounding rect of both; an empty side is ignored.
    pub fn united(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::from_coords(
            self.left().min(other.left()),
            self.top().min(other.top()),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        other.left() >= self.left()
            && other.right() <= self.right()
            && other.top() >= self.top()
            && other.bottom() <= self.bottom()
    }

    pub fn move_top_left(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_are_inclusive() {
        let r = Rect::new(10, 20, 5, 4);
        assert_eq!((r.right(), r.bottom()), (14, 23));
        assert_eq!(Rect::from_coords(10, 20, 14, 23), r);
    }

    #[test]
    fn disjoint_intersection_is_empty_default() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        assert_eq!(a.intersected(&b), Rect::default());
        assert!(!a.intersects(&b));
        assert_eq!(a.intersected(&Rect::new(5, 5, 10, 10)), Rect::new(5, 5, 5, 5));
    }

    #[test]
    fn union_skips_empty_operands() {
        let a = Rect::new(0, 0, 4, 4);
        assert_eq!(a.united(&Rect::default()), a);
        assert_eq!(Rect::default().united(&a), a);
        assert_eq!(a.united(&Rect::new(8, 8, 2, 2)), Rect::new(0, 0, 10, 10));
    }

    #[test]
    fn rectl_conversion_is_exclusive() {
        let rl = RectL::new(0, 0, 640, 480);
        let r = Rect::from_rectl(&rl);
        assert_eq!(r, Rect::new(0, 0, 640, 480));
        assert_eq!(r.to_rectl(), rl);
    }

    #[test]
    fn containment_requires_non_empty_rects() {
        let outer = Rect::new(0, 0, 100, 100);
        assert!(outer.contains_rect(&Rect::new(10, 10, 90, 90)));
        assert!(!outer.contains_rect(&Rect::new(10, 10, 91, 90)));
        assert!(!outer.contains_rect(&Rect::default()));
    }
}
