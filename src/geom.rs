//! Small rectangle geometry shared by `refmaps`, `adjuster` and `editops`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub r0: i32,
    pub c0: i32,
    pub r1: i32,
    pub c1: i32,
}

impl Rect {
    pub fn new(r0: i32, c0: i32, r1: i32, c1: i32) -> Self {
        Rect { r0: r0.min(r1), c0: c0.min(c1), r1: r0.max(r1), c1: c0.max(c1) }
    }

    pub fn single(r: i32, c: i32) -> Self {
        Rect { r0: r, c0: c, r1: r, c1: c }
    }

    pub fn contains(&self, r: i32, c: i32) -> bool {
        r >= self.r0 && r <= self.r1 && c >= self.c0 && c <= self.c1
    }

    pub fn rows(&self) -> i32 {
        self.r1 - self.r0 + 1
    }

    pub fn cols(&self) -> i32 {
        self.c1 - self.c0 + 1
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        self.r0 <= other.r0 && self.c0 <= other.c0 && self.r1 >= other.r1 && self.c1 >= other.c1
    }

    pub fn area(&self) -> i64 {
        self.rows() as i64 * self.cols() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_checks_bounds_inclusive() {
        let r = Rect::new(1, 1, 3, 3);
        assert!(r.contains(1, 1));
        assert!(r.contains(3, 3));
        assert!(!r.contains(4, 1));
    }

    #[test]
    fn innermost_frame_by_area() {
        let outer = Rect::new(0, 0, 10, 10);
        let inner = Rect::new(2, 2, 4, 4);
        assert!(outer.area() > inner.area());
        assert!(outer.contains_rect(&inner));
    }
}
