use crate::rect::Rect;

/// Accumulated region still to be uploaded or repainted; `None` is the clear state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtyRect {
    rect: Option<Rect>,
}

impl DirtyRect {
    pub const fn new() -> Self {
        Self { rect: None }
    }

    pub fn is_clear(&self) -> bool {
        self.rect.is_none()
    }

    /// Grows the region to cover `rect`. Empty input leaves the region untouched.
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        self.rect = Some(match self.rect {
            Some(cur) => cur.united(&rect),
            None => rect,
        });
    }

    pub fn add_dirty(&mut self, other: &DirtyRect) {
        if let Some(rect) = other.rect {
            self.add(rect);
        }
    }

    /// Replaces the region; an empty rect clears it.
    pub fn set(&mut self, rect: Rect) {
        self.rect = (!rect.is_empty()).then_some(rect);
    }

    pub fn clear(&mut self) {
        self.rect = None;
    }

    pub fn rect(&self) -> Option<Rect> {
        self.rect
    }

    /// The region, or the empty rect when clear.
    pub fn to_rect(&self) -> Rect {
        self.rect.unwrap_or_default()
    }

    pub fn intersects(&self, rect: &Rect) -> bool {
        self.rect.is_some_and(|cur| cur.intersects(rect))
    }

    /// True when the whole region lies inside `rect`.
    pub fn is_covered_by(&self, rect: &Rect) -> bool {
        self.rect.is_some_and(|cur| rect.contains_rect(&cur))
    }

    /// Clears the region if `other` already covers it.
    pub fn subtract_covered(&mut self, other: &DirtyRect) {
        if let (Some(cur), Some(cover)) = (self.rect, other.rect) {
            if cover.contains_rect(&cur) {
                self.clear();
            }
        }
    }
}
