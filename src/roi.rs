//! Region-of-interest geometry.
//!
//! Three shapes are supported: axis-aligned [`Rectangle`]s,
//! circular [`Spot`]s and [`Polygon`]s. Coordinates are in
//! pixel units with `x` along columns and `y` along rows;
//! pixel `(x, y)` is sampled at its integer coordinate.
//!
//! Masks are always the full size of the image. Shapes that
//! do not cover any pixel yield an all-`false` mask together
//! with a [`Coverage`] saying why, rather than an error. An
//! `Err` is reserved for geometry that cannot be evaluated
//! at all (non-finite coordinates).
use std::ops::Range;

use itertools::Itertools;
use ndarray::{s, Array2, ArrayView2};
use serde_derive::*;

use crate::error::{Result, ThermalError};

/// Axis-aligned extent `(x1, y1)..(x2, y2)` with
/// `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Bounds {
    fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// True if no part of the extent overlaps the image
    /// `[0, width) x [0, height)`.
    pub fn is_outside(&self, width: usize, height: usize) -> bool {
        self.x2 < 0. || self.y2 < 0. || self.x1 >= width as f64 || self.y1 >= height as f64
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rectangle {
    pub fn bounds(&self) -> Bounds {
        let (x1, x2) = min_max(self.x, self.x + self.width);
        let (y1, y2) = min_max(self.y, self.y + self.height);
        Bounds { x1, y1, x2, y2 }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        let b = self.bounds();
        b.x1 <= x && x <= b.x2 && b.y1 <= y && y <= b.y2
    }

    // Covers every pixel the rectangle touches: floor of the
    // top-left, ceil of the bottom-right.
    fn pixel_window(&self, width: usize, height: usize) -> Window {
        let b = self.bounds();
        Window::clip(
            b.x1.floor(),
            b.y1.floor(),
            b.x2.ceil(),
            b.y2.ceil(),
            width,
            height,
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Spot {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl Spot {
    pub fn bounds(&self) -> Bounds {
        Bounds {
            x1: self.x - self.radius,
            y1: self.y - self.radius,
            x2: self.x + self.radius,
            y2: self.y + self.radius,
        }
    }

    /// Boundary inclusive.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (dx, dy) = (x - self.x, y - self.y);
        self.radius >= 0. && dx * dx + dy * dy <= self.radius * self.radius
    }

    fn mask_window(&self, window: &Window) -> Array2<bool> {
        Array2::from_shape_fn(window.shape(), |(r, c)| {
            let (x, y) = window.coords(r, c);
            self.contains(x, y)
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Polygon {
    /// Vertices in drawing order. The ring is closed
    /// implicitly.
    pub points: Vec<(f64, f64)>,
}

impl Polygon {
    pub fn is_degenerate(&self) -> bool {
        self.points.len() < 3
    }

    pub fn bounds(&self) -> Bounds {
        let mut pts = self.points.iter();
        let (x0, y0) = match pts.next() {
            Some(&p) => p,
            None => {
                return Bounds {
                    x1: 0.,
                    y1: 0.,
                    x2: 0.,
                    y2: 0.,
                }
            }
        };
        pts.fold(
            Bounds {
                x1: x0,
                y1: y0,
                x2: x0,
                y2: y0,
            },
            |b, &(x, y)| Bounds {
                x1: b.x1.min(x),
                y1: b.y1.min(y),
                x2: b.x2.max(x),
                y2: b.y2.max(y),
            },
        )
    }

    fn edges(&self) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
        self.points.iter().copied().circular_tuple_windows()
    }

    /// Even-odd ray casting with a ray towards `+x`.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        if self.is_degenerate() {
            return false;
        }
        let mut inside = false;
        for ((xi, yi), (xj, yj)) in self.edges() {
            if let Some(x_cross) = edge_crossing(xi, yi, xj, yj, y) {
                if x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    // Same rule as `contains`, evaluated edge by edge over
    // whole rows: every pixel left of an edge's crossing in a
    // row gets toggled.
    fn mask_window(&self, window: &Window) -> Array2<bool> {
        let mut mask = Array2::from_elem(window.shape(), false);
        if self.is_degenerate() {
            return mask;
        }
        let cols = window.x2 - window.x1;
        for ((xi, yi), (xj, yj)) in self.edges() {
            for (r, mut row) in mask.outer_iter_mut().enumerate() {
                let y = (window.y1 + r) as f64;
                let x_cross = match edge_crossing(xi, yi, xj, yj, y) {
                    Some(x_cross) => x_cross,
                    None => continue,
                };
                // columns with x1 + c < x_cross
                let toggled = (x_cross.ceil() - window.x1 as f64).max(0.).min(cols as f64) as usize;
                row.slice_mut(s![..toggled]).mapv_inplace(|v| !v);
            }
        }
        mask
    }
}

/// X coordinate where edge `(xi, yi)-(xj, yj)` crosses the
/// horizontal line at `y`, if its endpoints straddle it.
/// Horizontal edges never cross.
#[inline]
fn edge_crossing(xi: f64, yi: f64, xj: f64, yj: f64, y: f64) -> Option<f64> {
    if yi == yj || (yi > y) == (yj > y) {
        return None;
    }
    Some(xi + (y - yi) * (xj - xi) / (yj - yi))
}

#[inline]
fn min_max(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Integer pixel window `[x1, x2) x [y1, y2)` inside the
/// image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    x1: usize,
    y1: usize,
    x2: usize,
    y2: usize,
}

impl Window {
    fn clip(x1: f64, y1: f64, x2: f64, y2: f64, width: usize, height: usize) -> Self {
        let clamp = |v: f64, hi: usize| v.max(0.).min(hi as f64) as usize;
        Window {
            x1: clamp(x1, width),
            y1: clamp(y1, height),
            x2: clamp(x2, width),
            y2: clamp(y2, height),
        }
    }

    /// Window for shapes sampled at integer coordinates: all
    /// pixels from `floor(x1)` through `floor(x2)`.
    fn sampled(b: &Bounds, width: usize, height: usize) -> Self {
        Self::clip(
            b.x1.floor(),
            b.y1.floor(),
            b.x2.floor() + 1.,
            b.y2.floor() + 1.,
            width,
            height,
        )
    }

    fn is_empty(&self) -> bool {
        self.x1 >= self.x2 || self.y1 >= self.y2
    }

    fn shape(&self) -> (usize, usize) {
        (self.y2 - self.y1, self.x2 - self.x1)
    }

    fn coords(&self, r: usize, c: usize) -> (f64, f64) {
        ((self.x1 + c) as f64, (self.y1 + r) as f64)
    }
}

/// ROI geometry, one case per supported shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Shape {
    Rectangle(Rectangle),
    Spot(Spot),
    Polygon(Polygon),
}

impl Shape {
    pub fn bounds(&self) -> Bounds {
        match self {
            Shape::Rectangle(r) => r.bounds(),
            Shape::Spot(s) => s.bounds(),
            Shape::Polygon(p) => p.bounds(),
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        match self {
            Shape::Rectangle(r) => r.contains(x, y),
            Shape::Spot(s) => s.contains(x, y),
            Shape::Polygon(p) => p.contains(x, y),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Rectangle(_) => "rectangle",
            Shape::Spot(_) => "spot",
            Shape::Polygon(_) => "polygon",
        }
    }

    /// Sizes allowed by the data model: rectangles need
    /// non-negative width and height, spots a positive radius.
    pub fn has_valid_extent(&self) -> bool {
        match self {
            Shape::Rectangle(r) => r.width >= 0. && r.height >= 0.,
            Shape::Spot(s) => s.radius > 0.,
            Shape::Polygon(_) => true,
        }
    }

    fn check_finite(&self) -> std::result::Result<(), String> {
        let finite = match self {
            Shape::Rectangle(r) => [r.x, r.y, r.width, r.height].iter().all(|v| v.is_finite()),
            Shape::Spot(s) => [s.x, s.y, s.radius].iter().all(|v| v.is_finite()),
            Shape::Polygon(p) => p.points.iter().all(|(x, y)| x.is_finite() && y.is_finite()),
        };
        if finite && self.bounds().is_finite() {
            Ok(())
        } else {
            Err(format!("non-finite {} coordinates", self.kind()))
        }
    }

    /// Build the boolean mask of this shape over a
    /// `width x height` image.
    pub fn mask(&self, width: usize, height: usize) -> Result<Mask> {
        self.check_finite()
            .map_err(|reason| ThermalError::MaskConstruction {
                roi: self.kind().into(),
                reason,
            })?;

        let bounds = self.bounds();
        if bounds.is_outside(width, height) {
            return Ok(Mask::empty(width, height, Coverage::OutsideImage));
        }
        if let Shape::Polygon(p) = self {
            if p.is_degenerate() {
                return Ok(Mask::empty(width, height, Coverage::Degenerate));
            }
        }

        let window = match self {
            Shape::Rectangle(r) => r.pixel_window(width, height),
            _ => Window::sampled(&bounds, width, height),
        };
        if window.is_empty() {
            return Ok(Mask::empty(width, height, Coverage::Degenerate));
        }

        let mut grid = Array2::from_elem((height, width), false);
        {
            let mut dst = grid.slice_mut(s![window.y1..window.y2, window.x1..window.x2]);
            match self {
                Shape::Rectangle(_) => dst.fill(true),
                Shape::Spot(spot) => dst.assign(&spot.mask_window(&window)),
                Shape::Polygon(poly) => dst.assign(&poly.mask_window(&window)),
            }
        }
        let mut mask = Mask::from_grid(grid);
        mask.rows = window.y1..window.y2;
        mask.cols = window.x1..window.x2;
        Ok(mask)
    }
}

impl From<Rectangle> for Shape {
    fn from(r: Rectangle) -> Self {
        Shape::Rectangle(r)
    }
}

impl From<Spot> for Shape {
    fn from(s: Spot) -> Self {
        Shape::Spot(s)
    }
}

impl From<Polygon> for Shape {
    fn from(p: Polygon) -> Self {
        Shape::Polygon(p)
    }
}

/// Why a mask has (or lacks) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Covered,
    /// Zero area after clipping, or too few vertices.
    Degenerate,
    /// Bounding box entirely outside the image.
    OutsideImage,
}

/// Boolean grid with the shape of the image. Every `true`
/// pixel lies inside the block `rows x cols`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    grid: Array2<bool>,
    pixel_count: usize,
    coverage: Coverage,
    rows: Range<usize>,
    cols: Range<usize>,
}

impl Mask {
    fn empty(width: usize, height: usize, coverage: Coverage) -> Self {
        Mask {
            grid: Array2::from_elem((height, width), false),
            pixel_count: 0,
            coverage,
            rows: 0..0,
            cols: 0..0,
        }
    }

    /// Wrap a `(row, col)` indexed grid.
    pub fn from_grid(grid: Array2<bool>) -> Self {
        let pixel_count = grid.iter().filter(|&&v| v).count();
        let coverage = if pixel_count > 0 {
            Coverage::Covered
        } else {
            Coverage::Degenerate
        };
        let (ht, wid) = grid.dim();
        Mask {
            grid,
            pixel_count,
            coverage,
            rows: 0..ht,
            cols: 0..wid,
        }
    }

    /// Row and column ranges of the sub-block holding the
    /// shape.
    pub fn block(&self) -> (Range<usize>, Range<usize>) {
        (self.rows.clone(), self.cols.clone())
    }

    pub fn view(&self) -> ArrayView2<bool> {
        self.grid.view()
    }

    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    pub fn coverage(&self) -> Coverage {
        self.coverage
    }

    pub fn is_empty(&self) -> bool {
        self.pixel_count == 0
    }
}

/// Partial geometry edit. Only the fields that apply to the
/// edited shape are used.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GeometryUpdate {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub radius: Option<f64>,
    pub points: Option<Vec<(f64, f64)>>,
}

impl GeometryUpdate {
    /// Apply to `shape`; returns whether any applicable
    /// field was present.
    pub fn apply(&self, shape: &mut Shape) -> bool {
        fn set(slot: &mut f64, val: Option<f64>) -> bool {
            val.map(|v| *slot = v).is_some()
        }
        match shape {
            Shape::Rectangle(r) => {
                let mut changed = set(&mut r.x, self.x);
                changed |= set(&mut r.y, self.y);
                changed |= set(&mut r.width, self.width);
                changed |= set(&mut r.height, self.height);
                changed
            }
            Shape::Spot(s) => {
                let mut changed = set(&mut s.x, self.x);
                changed |= set(&mut s.y, self.y);
                changed |= set(&mut s.radius, self.radius);
                changed
            }
            Shape::Polygon(p) => match &self.points {
                Some(points) => {
                    p.points = points.clone();
                    true
                }
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use itertools::iproduct;

    fn square(lo: f64, hi: f64) -> Polygon {
        Polygon {
            points: vec![(lo, lo), (hi, lo), (hi, hi), (lo, hi)],
        }
    }

    #[test]
    fn rectangle_clips_to_image() -> Result<()> {
        let rect = Shape::from(Rectangle {
            x: -5.,
            y: -5.,
            width: 10.,
            height: 10.,
        });
        let mask = rect.mask(20, 20)?;
        assert_eq!(mask.pixel_count(), 25);
        assert_eq!(mask.coverage(), Coverage::Covered);
        assert!(mask.view()[(4, 4)]);
        assert!(!mask.view()[(5, 4)]);
        Ok(())
    }

    #[test]
    fn rectangle_containment_is_inclusive() {
        let rect = Rectangle {
            x: 1.,
            y: 2.,
            width: 3.,
            height: 4.,
        };
        assert!(rect.contains(1., 2.));
        assert!(rect.contains(4., 6.));
        assert!(!rect.contains(4.01, 6.));
    }

    #[test]
    fn spot_boundary_is_inclusive() {
        let spot = Spot {
            x: 10.,
            y: 10.,
            radius: 5.,
        };
        assert!(spot.contains(15., 10.));
        assert!(!spot.contains(15.01, 10.));
    }

    #[test]
    fn spot_mask_matches_containment() -> Result<()> {
        let spot = Shape::from(Spot {
            x: 10.,
            y: 10.,
            radius: 5.,
        });
        let mask = spot.mask(30, 30)?;
        for (y, x) in iproduct!(0..30, 0..30) {
            assert_eq!(mask.view()[(y, x)], spot.contains(x as f64, y as f64));
        }
        // 81 lattice points lie within a radius-5 circle
        assert_eq!(mask.pixel_count(), 81);
        assert!(mask.view()[(10, 15)]);
        Ok(())
    }

    #[test]
    fn polygon_ray_casting() {
        let tri = Polygon {
            points: vec![(0., 0.), (10., 0.), (0., 10.)],
        };
        assert!(tri.contains(2., 2.));
        assert!(!tri.contains(8., 8.));
        assert!(!tri.contains(-1., 5.));
    }

    #[test]
    fn horizontal_edges_never_cross() {
        let sq = square(0., 10.);
        // On the line of the bottom edge, left of the square:
        // only the two vertical edges may toggle.
        assert!(!sq.contains(-5., 0.));
        assert!(edge_crossing(0., 0., 10., 0., 0.).is_none());
        assert!(edge_crossing(0., 10., 10., 10., 10.).is_none());
    }

    #[test]
    fn polygon_mask_matches_containment() -> Result<()> {
        let poly = Shape::from(Polygon {
            points: vec![(2.5, 1.), (17.2, 4.5), (11., 9.), (18., 16.3), (3., 14.), (7.5, 8.)],
        });
        let mask = poly.mask(20, 18)?;
        let mut count = 0;
        for (y, x) in iproduct!(0..18, 0..20) {
            let inside = poly.contains(x as f64, y as f64);
            assert_eq!(mask.view()[(y, x)], inside, "pixel ({}, {})", x, y);
            count += inside as usize;
        }
        assert_eq!(mask.pixel_count(), count);
        assert!(count > 0);
        Ok(())
    }

    #[test]
    fn too_few_vertices_is_empty() -> Result<()> {
        let line = Polygon {
            points: vec![(0., 0.), (5., 5.)],
        };
        assert!(!line.contains(2., 2.));
        let mask = Shape::from(line).mask(10, 10)?;
        assert!(mask.is_empty());
        assert_eq!(mask.coverage(), Coverage::Degenerate);
        Ok(())
    }

    #[test]
    fn outside_and_degenerate_are_distinguished() -> Result<()> {
        let outside = Shape::from(Rectangle {
            x: 30.,
            y: 2.,
            width: 5.,
            height: 5.,
        });
        let flat = Shape::from(Rectangle {
            x: 3.,
            y: 2.,
            width: 0.,
            height: 5.,
        });
        assert_eq!(outside.mask(20, 20)?.coverage(), Coverage::OutsideImage);
        let flat = flat.mask(20, 20)?;
        assert_eq!(flat.coverage(), Coverage::Degenerate);
        assert_eq!(flat.pixel_count(), 0);
        assert_eq!(flat.view().dim(), (20, 20));
        Ok(())
    }

    #[test]
    fn non_finite_geometry_fails() {
        let spot = Shape::from(Spot {
            x: f64::NAN,
            y: 1.,
            radius: 2.,
        });
        assert!(matches!(
            spot.mask(10, 10),
            Err(ThermalError::MaskConstruction { .. })
        ));
    }

    #[test]
    fn geometry_update_applies_relevant_fields() {
        let mut spot = Shape::from(Spot {
            x: 1.,
            y: 1.,
            radius: 2.,
        });
        let only_width = GeometryUpdate {
            width: Some(4.),
            ..Default::default()
        };
        assert!(!only_width.apply(&mut spot));
        let moved = GeometryUpdate {
            x: Some(3.),
            radius: Some(5.),
            ..Default::default()
        };
        assert!(moved.apply(&mut spot));
        assert_eq!(
            spot,
            Shape::Spot(Spot {
                x: 3.,
                y: 1.,
                radius: 5.
            })
        );
    }

    #[test]
    fn mask_block_bounds_the_shape() -> Result<()> {
        let spot = Shape::from(Spot {
            x: 2.,
            y: 10.,
            radius: 3.,
        });
        let mask = spot.mask(20, 15)?;
        let (rows, cols) = mask.block();
        assert_eq!((rows.clone(), cols.clone()), (7..14, 0..6));
        let inside = mask.view().slice_move(s![rows, cols]);
        assert_eq!(inside.iter().filter(|&&v| v).count(), mask.pixel_count());

        let outside = Shape::from(Rectangle {
            x: 40.,
            y: 0.,
            width: 2.,
            height: 2.,
        });
        let (rows, cols) = outside.mask(20, 15)?.block();
        assert!(rows.is_empty() && cols.is_empty());
        Ok(())
    }

    #[test]
    fn extents_must_be_non_negative() {
        let spot = |radius| Shape::from(Spot { x: 0., y: 0., radius });
        assert!(spot(0.5).has_valid_extent());
        assert!(!spot(0.).has_valid_extent());
        assert!(!spot(-4.).has_valid_extent());
        assert!(!spot(f64::NAN).has_valid_extent());

        let rect = |width, height| {
            Shape::from(Rectangle {
                x: 0.,
                y: 0.,
                width,
                height,
            })
        };
        assert!(rect(0., 5.).has_valid_extent());
        assert!(!rect(-1., 5.).has_valid_extent());
        assert!(!rect(3., -0.5).has_valid_extent());
    }
}
