//! The multi-output virtual-cursor model.
//!
//! `CursorPosition` is the emulated absolute cursor in global-space pixel units. Raw relative and
//! absolute motion never writes to it directly; it always goes through [`walk`], which glides the
//! path along output edges instead of letting it cross a void.

use crate::geometry::{OutputGeometry, Point};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorPosition {
    pub current: Point,
    pub previous: Point,
}

impl CursorPosition {
    pub fn at_origin() -> Self {
        Self {
            current: Point { x: 0, y: 0 },
            previous: Point { x: 0, y: 0 },
        }
    }
}

/// Result of a single walk: the overlays (identified by their output) whose `frame_pending` flag
/// must be set because the cursor left or entered them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchedOutputs {
    pub left: Option<crate::geometry::OutputId>,
    pub entered: Option<crate::geometry::OutputId>,
}

/// Moves the cursor from its current position toward `desired_end`, gliding along output edges
/// rather than crossing a void, and writes the result back into `pos`.
///
/// `desired_end` is the position raw motion would have produced with no output layout at all
/// (i.e. `previous + delta` for relative motion, or the raw absolute coordinate for absolute
/// motion already mapped into global space).
pub fn walk(pos: &mut CursorPosition, desired_end: Point, geometry: &OutputGeometry) -> TouchedOutputs {
    let start_output = geometry.output_at(pos.current).map(|o| o.id);

    // Recovery: the previous position isn't on any output at all (e.g. the output it was on got
    // unplugged from under it). Re-anchor to the first initialized output's origin.
    let Some(anchor) = geometry.first_init_done() else {
        // No outputs at all: nothing sensible to do, leave the position untouched.
        return TouchedOutputs {
            left: None,
            entered: None,
        };
    };

    let mut from = pos.current;
    if geometry.output_at(from).is_none() {
        from = anchor.origin;
    }

    let end = walk_line(from, desired_end, geometry);

    pos.previous = pos.current;
    pos.current = end;

    let end_output = geometry.output_at(end).map(|o| o.id);
    TouchedOutputs {
        left: start_output,
        entered: end_output,
    }
}

/// Bresenham-equivalent stepping from `start` to `end`, stopping (and gliding along the output
/// boundary) whenever the straight path would cross into a void.
fn walk_line(start: Point, end: Point, geometry: &OutputGeometry) -> Point {
    let mut start = start;
    let mut end = end;

    // A void-hugging glide restarts the walk with a constrained endpoint; bound the number of
    // restarts so a pathological layout cannot spin forever (there are at most four edges to
    // bounce off of before giving up and stopping in place).
    for _ in 0..8 {
        match bresenham_walk(start, end, geometry) {
            WalkOutcome::Reached(p) => return p,
            WalkOutcome::Glide { stop_at, constrain } => {
                start = stop_at;
                end = constrain;
            }
        }
    }
    start
}

enum WalkOutcome {
    Reached(Point),
    Glide { stop_at: Point, constrain: Point },
}

fn bresenham_walk(start: Point, end: Point, geometry: &OutputGeometry) -> WalkOutcome {
    let dx = end.x - start.x;
    let dy = end.y - start.y;

    let steps = dx.abs().max(dy.abs());
    if steps == 0 {
        return WalkOutcome::Reached(start);
    }

    let mut prev = start;
    for step in 1..=steps {
        let x = start.x + div_round(dx * step, steps);
        let y = start.y + div_round(dy * step, steps);
        let p = Point { x, y };

        if geometry.output_at(p).is_some() {
            prev = p;
            continue;
        }

        // p is a void. Figure out which axis we just crossed an edge on, preferring the x-axis
        // glide on a diagonal step per the tie-break rule.
        let crossed_x = p.x != prev.x;
        let crossed_y = p.y != prev.y;

        if crossed_x {
            let edge_x = prev.x;
            if geometry.output_at(Point { x: edge_x, y: p.y }).is_some() {
                return WalkOutcome::Glide {
                    stop_at: Point { x: edge_x, y: prev.y },
                    constrain: Point { x: edge_x, y: end.y },
                };
            }
        }
        if crossed_y {
            let edge_y = prev.y;
            if geometry.output_at(Point { x: p.x, y: edge_y }).is_some() {
                return WalkOutcome::Glide {
                    stop_at: Point { x: prev.x, y: edge_y },
                    constrain: Point { x: end.x, y: edge_y },
                };
            }
        }

        // Neither axis-aligned neighbor is valid either: stop where we last were.
        return WalkOutcome::Reached(prev);
    }

    WalkOutcome::Reached(Point { x: end.x, y: end.y })
}

/// Rounds `a / b` to the nearest integer (half away from zero), used to step the Bresenham line.
fn div_round(a: i32, b: i32) -> i32 {
    if b == 0 {
        return 0;
    }
    let (a, b) = (a as i64, b as i64);
    ((2 * a + b.signum() * b) / (2 * b)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{OutputId, Size};

    fn two_outputs_with_void() -> OutputGeometry {
        let mut geo = OutputGeometry::new();
        geo.insert(OutputId(1)).unwrap();
        let a = geo.get_mut(OutputId(1)).unwrap();
        a.origin = Point { x: 0, y: 0 };
        a.size = Size { w: 800, h: 600 };
        a.init_done = true;

        geo.insert(OutputId(2)).unwrap();
        let b = geo.get_mut(OutputId(2)).unwrap();
        b.origin = Point { x: 0, y: 700 };
        b.size = Size { w: 800, h: 600 };
        b.init_done = true;

        geo
    }

    fn two_outputs_side_by_side() -> OutputGeometry {
        let mut geo = OutputGeometry::new();
        geo.insert(OutputId(1)).unwrap();
        let a = geo.get_mut(OutputId(1)).unwrap();
        a.origin = Point { x: 0, y: 0 };
        a.size = Size { w: 800, h: 600 };
        a.init_done = true;

        geo.insert(OutputId(2)).unwrap();
        let b = geo.get_mut(OutputId(2)).unwrap();
        b.origin = Point { x: 800, y: 0 };
        b.size = Size { w: 800, h: 600 };
        b.init_done = true;

        geo
    }

    #[test]
    fn void_avoidance_stops_at_boundary() {
        // Scenario 5: cursor at (400, 500), relative motion of (+0, +500) must stop at
        // (400, 599), never entering the void or teleporting to output B.
        let geo = two_outputs_with_void();
        let mut pos = CursorPosition {
            current: Point { x: 400, y: 500 },
            previous: Point { x: 400, y: 500 },
        };

        walk(&mut pos, Point { x: 400, y: 1000 }, &geo);
        assert_eq!(pos.current, Point { x: 400, y: 599 });
    }

    #[test]
    fn edge_glide_crosses_seam_smoothly() {
        // Scenario 6: from (700, 300), relative motion of (+500, +50) ends at (1200, 350).
        let geo = two_outputs_side_by_side();
        let mut pos = CursorPosition {
            current: Point { x: 700, y: 300 },
            previous: Point { x: 700, y: 300 },
        };

        walk(&mut pos, Point { x: 1200, y: 350 }, &geo);
        assert_eq!(pos.current, Point { x: 1200, y: 350 });
    }

    #[test]
    fn recovery_when_previous_position_has_no_output() {
        let geo = two_outputs_side_by_side();
        let mut pos = CursorPosition {
            current: Point { x: -500, y: -500 },
            previous: Point { x: -500, y: -500 },
        };

        walk(&mut pos, Point { x: 10, y: 10 }, &geo);
        assert!(geo.output_at(pos.current).is_some());
    }

    #[test]
    fn no_outputs_leaves_position_untouched() {
        let geo = OutputGeometry::new();
        let mut pos = CursorPosition {
            current: Point { x: 1, y: 2 },
            previous: Point { x: 1, y: 2 },
        };
        walk(&mut pos, Point { x: 100, y: 100 }, &geo);
        assert_eq!(pos.current, Point { x: 1, y: 2 });
    }
}
