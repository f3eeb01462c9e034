//! Window positions and their deterministic enumeration.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Output coordinate a filter is computing: `(x, y)` in the output grid, `z` the
/// output depth (which filter is active).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Window {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Window {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Stable per-window salt for seeding flow randomness.
    pub fn salt(&self) -> u64 {
        ((self.x as u64) << 42) ^ ((self.y as u64) << 21) ^ (self.z as u64)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Number of legal positions along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WindowBounds {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl WindowBounds {
    pub const SINGLE: WindowBounds = WindowBounds {
        width: 1,
        height: 1,
        depth: 1,
    };

    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn count(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub fn contains(&self, w: Window) -> bool {
        w.x < self.width && w.y < self.height && w.z < self.depth
    }

    /// Position of `w` in enumeration order.
    pub fn order(&self, w: Window) -> usize {
        (w.x * self.height + w.y) * self.depth + w.z
    }

    pub fn iter(&self) -> WindowIter {
        WindowIter::new(*self)
    }
}

/// Row-major walk over every window: `x` outermost, `z` innermost.
///
/// Two iterators compare equal when they have the same bounds and the same next
/// position, so an exhausted iterator equals any other exhausted one over the same
/// bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowIter {
    bounds: WindowBounds,
    next: Option<Window>,
}

impl WindowIter {
    pub fn new(bounds: WindowBounds) -> Self {
        let next = (bounds.count() > 0).then_some(Window::default());
        Self { bounds, next }
    }

    pub fn bounds(&self) -> WindowBounds {
        self.bounds
    }

    pub fn peek(&self) -> Option<Window> {
        self.next
    }
}

impl Iterator for WindowIter {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let current = self.next?;
        let b = self.bounds;
        let mut w = current;
        w.z += 1;
        if w.z == b.depth {
            w.z = 0;
            w.y += 1;
            if w.y == b.height {
                w.y = 0;
                w.x += 1;
            }
        }
        self.next = (w.x < b.width).then_some(w);
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = match self.next {
            Some(w) => self.bounds.count() - self.bounds.order(w),
            None => 0,
        };
        (left, Some(left))
    }
}

impl ExactSizeIterator for WindowIter {}
