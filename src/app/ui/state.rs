use super::super::image_loader::Image;

use stepsam::{Annotation, Mask, Progress};

use core::fmt;

// drags shorter than this, in image pixels, count as a tap
const DRAG_THRESHOLD: f32 = 10.0;

pub struct UiState {
    pub img_label: String,

    pub img: Option<Image>,
    pub mask: Option<Mask>,
    pub texture: Option<egui::TextureHandle>,

    pub point_mode: PointMode,
    pub run_mode: RunMode,

    pub progress: Option<Progress>,
    pub selector: Selector,
    pub pending: Option<Annotation>,

    pub drag_start: Option<egui::Pos2>,
    pub drag_end: Option<egui::Pos2>,
}

#[derive(PartialEq, strum_macros::EnumIter, Copy, Clone)]
pub enum PointMode {
    Foreground,
    Background,
}

#[derive(PartialEq, strum_macros::EnumIter, Copy, Clone)]
pub enum RunMode {
    Incremental,
    Blocking,
}

impl UiState {
    pub fn new() -> Self {
        UiState {
            img_label: "Load image first".to_string(),

            img: None,
            mask: None,
            texture: None,

            point_mode: PointMode::Foreground,
            run_mode: RunMode::Incremental,

            progress: None,
            selector: Selector::new(DRAG_THRESHOLD),
            pending: None,

            drag_start: None,
            drag_end: None,
        }
    }

    pub fn set_image(&mut self, img: Image) {
        self.selector.set_bounds(img.data.width() as f32, img.data.height() as f32);
        self.img_label = img.path.display().to_string();
        self.img = Some(img);
        self.mask = None;
        self.texture = None;
        self.progress = None;
    }

    pub fn set_mask(&mut self, mask: Mask) {
        self.mask = Some(mask);
        self.texture = None;
        self.progress = None;
    }
}

/// Turns pointer gestures in image coordinates into annotations.
pub struct Selector {
    threshold: f32,
    bounds: [f32; 2],
    start: Option<[f32; 2]>,
}

impl Selector {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            bounds: [0.0, 0.0],
            start: None,
        }
    }

    pub fn set_bounds(&mut self, width: f32, height: f32) {
        self.bounds = [width, height];
        self.start = None;
    }

    pub fn press(&mut self, pos: [f32; 2]) {
        self.start = Some(pos);
    }

    /// Ends a gesture: a short one becomes a point, a long one a box.
    /// Gestures touching anything outside the image are dropped.
    pub fn release(&mut self, pos: [f32; 2], inside: bool) -> Option<Annotation> {
        let start = self.start.take().unwrap_or(pos);
        if !self.contains(start) || !self.contains(pos) {
            return None;
        }

        let (dx, dy) = (pos[0] - start[0], pos[1] - start[1]);
        if (dx * dx + dy * dy).sqrt() < self.threshold {
            return Some(Annotation::Point {
                x: pos[0],
                y: pos[1],
                inside,
            });
        }

        Some(Annotation::bounding_box(start, pos))
    }

    fn contains(&self, p: [f32; 2]) -> bool {
        (0.0..self.bounds[0]).contains(&p[0]) && (0.0..self.bounds[1]).contains(&p[1])
    }
}

impl fmt::Display for PointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointMode::Foreground => write!(f, "Foreground"),
            PointMode::Background => write!(f, "Background"),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Incremental => write!(f, "Incremental"),
            RunMode::Blocking => write!(f, "Blocking"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> Selector {
        let mut s = Selector::new(DRAG_THRESHOLD);
        s.set_bounds(100.0, 60.0);
        s
    }

    #[test]
    fn test_tap_is_point() {
        let mut s = selector();
        s.press([50.0, 30.0]);
        assert_eq!(
            s.release([52.0, 31.0], true),
            Some(Annotation::Point {
                x: 52.0,
                y: 31.0,
                inside: true
            })
        );
    }

    #[test]
    fn test_drag_is_box() {
        let mut s = selector();
        s.press([90.0, 50.0]);
        assert_eq!(
            s.release([10.0, 10.0], true),
            Some(Annotation::bounding_box([10.0, 10.0], [90.0, 50.0]))
        );
    }

    #[test]
    fn test_outside_image_is_ignored() {
        let mut s = selector();
        s.press([10.0, 10.0]);
        assert_eq!(s.release([100.0, 10.0], true), None);
        assert_eq!(s.release([-1.0, 5.0], false), None);
    }
}
