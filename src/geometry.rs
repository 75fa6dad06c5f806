//! Output geometry and the aggregate global pixel space.
//!
//! `OutputGeometry` is the arena of known outputs, indexed by slot per the fixed-size-table
//! design note: a hashmap would be fine at this scale, but the source material's arena + linear
//! scan pattern is legitimate for a bound this small and keeps hot-unplug bookkeeping simple to
//! reason about (slots are reused, nothing shifts).

use anyhow::{ensure, Result};

/// Upper bound on simultaneously tracked outputs (and overlays, one per output).
pub const MAX_DRAWABLE_LAYERS: usize = 128;

/// An opaque identity for an output, stable across this process's lifetime for that output.
///
/// Wraps the compositor's `wl_registry` global name, which is what hot-unplug ("global removed")
/// events reference; it is not the same as the `wl_output` protocol object, which is destroyed on
/// unplug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub w: i32,
    pub h: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub origin: Point,
    pub size: Size,
}

impl Rect {
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.origin.x
            && p.x < self.origin.x + self.size.w
            && p.y >= self.origin.y
            && p.y < self.origin.y + self.size.h
    }
}

/// One physical display surface reported by the compositor.
#[derive(Debug, Clone)]
pub struct Output {
    pub id: OutputId,
    pub origin: Point,
    pub size: Size,
    /// Set only once all geometry events (origin, mode/size, and `done`) have been received.
    /// Until then the output is not considered part of the global space.
    pub init_done: bool,
}

impl Output {
    pub fn rect(&self) -> Rect {
        Rect {
            origin: self.origin,
            size: self.size,
        }
    }
}

/// Arena of known outputs, answering "which output contains this pixel" and its inverse.
#[derive(Debug, Default)]
pub struct OutputGeometry {
    slots: Vec<Option<Output>>,
}

impl OutputGeometry {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Allocates a free slot for a newly advertised output. Fails if the arena is full; this is
    /// a capacity the compositor is not expected to exceed in practice.
    pub fn insert(&mut self, id: OutputId) -> Result<()> {
        let output = Output {
            id,
            origin: Point { x: 0, y: 0 },
            size: Size { w: 0, h: 0 },
            init_done: false,
        };

        if let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(output);
            return Ok(());
        }

        ensure!(
            self.slots.len() < MAX_DRAWABLE_LAYERS,
            "too many outputs advertised at once (limit is {MAX_DRAWABLE_LAYERS})"
        );
        self.slots.push(Some(output));
        Ok(())
    }

    pub fn remove(&mut self, id: OutputId) {
        if let Some(slot) = self.slots.iter_mut().find(|s| matches!(s, Some(o) if o.id == id)) {
            *slot = None;
        }
    }

    pub fn get(&self, id: OutputId) -> Option<&Output> {
        self.slots.iter().flatten().find(|o| o.id == id)
    }

    pub fn get_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.slots.iter_mut().flatten().find(|o| o.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.slots.iter().flatten()
    }

    pub fn iter_init_done(&self) -> impl Iterator<Item = &Output> {
        self.iter().filter(|o| o.init_done)
    }

    /// The output whose rectangle contains `p`, if any. Uninitialized outputs (still all-zero
    /// geometry, per the "Transient protocol" row in the error taxonomy) never match.
    pub fn output_at(&self, p: Point) -> Option<&Output> {
        self.iter_init_done().find(|o| o.rect().contains(p))
    }

    /// The first initialized output in arena order, used as the recovery anchor when the cursor
    /// has wandered into a region with no output at all.
    pub fn first_init_done(&self) -> Option<&Output> {
        self.iter_init_done().next()
    }
}

/// Aggregate bounding box of all initialized outputs, with gap-tolerance bookkeeping for the
/// hot-unplug window of an output's lifecycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalSpace {
    pub bounds: Option<Rect>,
    /// True while outputs are mid-unplug/replug and voids are expected and tolerated.
    pub gap_tolerant: bool,
}

impl GlobalSpace {
    /// Recomputes the bounding box from the current output arena.
    ///
    /// `gap_tolerant` should be `true` during a hot-unplug/replug window and `false` at steady
    /// state and at startup, where a persistent gap is fatal.
    pub fn recompute(geometry: &OutputGeometry, gap_tolerant: bool) -> Result<Self> {
        let mut bounds: Option<Rect> = None;
        for o in geometry.iter_init_done() {
            let r = o.rect();
            bounds = Some(match bounds {
                None => r,
                Some(b) => union_rect(b, r),
            });
        }

        let space = GlobalSpace {
            bounds,
            gap_tolerant,
        };

        if !gap_tolerant {
            ensure!(
                space.is_edge_connected(geometry),
                "output layout contains a gap between outputs; gaps are not supported"
            );
        }

        Ok(space)
    }

    pub fn width(&self) -> i32 {
        self.bounds.map(|b| b.size.w).unwrap_or(0)
    }

    pub fn height(&self) -> i32 {
        self.bounds.map(|b| b.size.h).unwrap_or(0)
    }

    /// Verifies that every pixel in the bounding box is covered by some output, i.e. there is no
    /// void. Used to reject a persistent gap at initialization while tolerating a transient one
    /// during hot-unplug.
    fn is_edge_connected(&self, geometry: &OutputGeometry) -> bool {
        let Some(bounds) = self.bounds else {
            return true;
        };

        // Sampling every pixel of a multi-monitor bounding box is wasteful; instead check that
        // every output edge that lies strictly inside the bounding box touches another output,
        // which is exactly the condition a straight glide along any edge depends on.
        for o in geometry.iter_init_done() {
            let r = o.rect();
            if r.origin.x > bounds.origin.x && !touches_left_edge(geometry, r) {
                return false;
            }
            if r.origin.y > bounds.origin.y && !touches_top_edge(geometry, r) {
                return false;
            }
            let right = r.origin.x + r.size.w;
            if right < bounds.origin.x + bounds.size.w && !touches_right_edge(geometry, r, right) {
                return false;
            }
            let bottom = r.origin.y + r.size.h;
            if bottom < bounds.origin.y + bounds.size.h && !touches_bottom_edge(geometry, r, bottom)
            {
                return false;
            }
        }
        true
    }
}

fn union_rect(a: Rect, b: Rect) -> Rect {
    let x0 = a.origin.x.min(b.origin.x);
    let y0 = a.origin.y.min(b.origin.y);
    let x1 = (a.origin.x + a.size.w).max(b.origin.x + b.size.w);
    let y1 = (a.origin.y + a.size.h).max(b.origin.y + b.size.h);
    Rect {
        origin: Point { x: x0, y: y0 },
        size: Size {
            w: x1 - x0,
            h: y1 - y0,
        },
    }
}

fn touches_left_edge(geometry: &OutputGeometry, r: Rect) -> bool {
    geometry.iter_init_done().any(|o| {
        let other = o.rect();
        other.origin.x + other.size.w == r.origin.x && y_ranges_overlap(other, r)
    })
}

fn touches_right_edge(geometry: &OutputGeometry, r: Rect, right: i32) -> bool {
    geometry
        .iter_init_done()
        .any(|o| o.rect().origin.x == right && y_ranges_overlap(o.rect(), r))
}

fn touches_top_edge(geometry: &OutputGeometry, r: Rect) -> bool {
    geometry.iter_init_done().any(|o| {
        let other = o.rect();
        other.origin.y + other.size.h == r.origin.y && x_ranges_overlap(other, r)
    })
}

fn touches_bottom_edge(geometry: &OutputGeometry, r: Rect, bottom: i32) -> bool {
    geometry
        .iter_init_done()
        .any(|o| o.rect().origin.y == bottom && x_ranges_overlap(o.rect(), r))
}

fn y_ranges_overlap(a: Rect, b: Rect) -> bool {
    a.origin.y < b.origin.y + b.size.h && b.origin.y < a.origin.y + a.size.h
}

fn x_ranges_overlap(a: Rect, b: Rect) -> bool {
    a.origin.x < b.origin.x + b.size.w && b.origin.x < a.origin.x + a.size.w
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done_output(id: u32, x: i32, y: i32, w: i32, h: i32) -> Output {
        Output {
            id: OutputId(id),
            origin: Point { x, y },
            size: Size { w, h },
            init_done: true,
        }
    }

    #[test]
    fn output_at_finds_containing_output() {
        let mut geo = OutputGeometry::new();
        geo.insert(OutputId(1)).unwrap();
        *geo.get_mut(OutputId(1)).unwrap() = done_output(1, 0, 0, 800, 600);

        assert!(geo.output_at(Point { x: 400, y: 300 }).is_some());
        assert!(geo.output_at(Point { x: 900, y: 300 }).is_none());
    }

    #[test]
    fn edge_connected_two_outputs_side_by_side() {
        let mut geo = OutputGeometry::new();
        geo.insert(OutputId(1)).unwrap();
        *geo.get_mut(OutputId(1)).unwrap() = done_output(1, 0, 0, 800, 600);
        geo.insert(OutputId(2)).unwrap();
        *geo.get_mut(OutputId(2)).unwrap() = done_output(2, 800, 0, 800, 600);

        let space = GlobalSpace::recompute(&geo, false).unwrap();
        assert_eq!(space.width(), 1600);
        assert_eq!(space.height(), 600);
    }

    #[test]
    fn persistent_gap_is_fatal_at_init() {
        let mut geo = OutputGeometry::new();
        geo.insert(OutputId(1)).unwrap();
        *geo.get_mut(OutputId(1)).unwrap() = done_output(1, 0, 0, 800, 600);
        geo.insert(OutputId(2)).unwrap();
        // A void between y=600 and y=700, per scenario 5 in the spec.
        *geo.get_mut(OutputId(2)).unwrap() = done_output(2, 0, 700, 800, 600);

        assert!(GlobalSpace::recompute(&geo, false).is_err());
    }

    #[test]
    fn gap_is_tolerated_during_hot_unplug() {
        let mut geo = OutputGeometry::new();
        geo.insert(OutputId(1)).unwrap();
        *geo.get_mut(OutputId(1)).unwrap() = done_output(1, 0, 0, 800, 600);
        geo.insert(OutputId(2)).unwrap();
        *geo.get_mut(OutputId(2)).unwrap() = done_output(2, 0, 700, 800, 600);

        let space = GlobalSpace::recompute(&geo, true).unwrap();
        assert_eq!(space.height(), 1300);
    }

    #[test]
    fn uninitialized_output_is_excluded() {
        let mut geo = OutputGeometry::new();
        geo.insert(OutputId(1)).unwrap();
        // geometry not yet finished: origin/size all-zero, init_done false.
        let space = GlobalSpace::recompute(&geo, false).unwrap();
        assert!(space.bounds.is_none());
    }
}
