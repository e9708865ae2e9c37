//! Geometry types shared by the config layer and the window backends

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(300, 300)
    }
}

/// Screen-space rectangle, used for window bounds and display extents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(position: Position, dimensions: Dimensions) -> Self {
        Self {
            x: position.x,
            y: position.y,
            width: dimensions.width,
            height: dimensions.height,
        }
    }

    pub fn left(&self) -> i64 {
        self.x as i64
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn top(&self) -> i64 {
        self.y as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// True when at least one pixel is shared (edges are exclusive)
    pub fn intersects(&self, other: &Rect) -> bool {
        self.left() < other.right()
            && other.left() < self.right()
            && self.top() < other.bottom()
            && other.top() < self.bottom()
    }
}

/// A window is on screen when any pixel of its bounds lies on any active display
pub fn is_on_screen(bounds: Rect, displays: &[Rect]) -> bool {
    !bounds.dimensions().is_empty() && displays.iter().any(|display| display.intersects(&bounds))
}
