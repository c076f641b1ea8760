//! Perspective mapping into the bird's-eye plane and lane guide rendering.

use image::{Rgb, RgbImage};

use crate::{
    annotation::{draw_dashed_line, draw_thick_line},
    error::AnalyticsError,
    geometry::{Homography, Point, compute_transform},
};

pub const BIRDVIEW_WIDTH: u32 = 500;
pub const BIRDVIEW_HEIGHT: u32 = 800;

const LANE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LANE_THICKNESS: u32 = 2;
const DASH_LENGTH: i32 = 20;
const GAP_LENGTH: i32 = 10;
/// One divider per pixel column is the most the canvas can show.
pub const MAX_LANES: u32 = BIRDVIEW_WIDTH;

/// Fixed source-to-top-down mapping for one session.
#[derive(Clone, Debug)]
pub struct GeometricMapper {
    transform: Homography,
    dst_quad: [Point; 4],
    num_lanes: u32,
}

impl GeometricMapper {
    /// `src_quad` and `dst_quad` are ordered top-left, top-right,
    /// bottom-left, bottom-right.
    pub fn new(src_quad: &[Point], dst_quad: &[Point], num_lanes: u32) -> Result<Self, AnalyticsError> {
        if !(1..=MAX_LANES).contains(&num_lanes) {
            return Err(AnalyticsError::InvalidGeometry(format!(
                "lane count must be between 1 and {MAX_LANES}, got {num_lanes}"
            )));
        }
        let transform = compute_transform(src_quad, dst_quad)?;
        let dst_quad = [dst_quad[0], dst_quad[1], dst_quad[2], dst_quad[3]];
        Ok(Self {
            transform,
            dst_quad,
            num_lanes,
        })
    }

    pub fn project(&self, point: Point) -> Option<Point> {
        self.transform.project(point)
    }

    /// Black canvas with the lane guides already drawn.
    pub fn blank_canvas(&self) -> RgbImage {
        let mut canvas = RgbImage::new(BIRDVIEW_WIDTH, BIRDVIEW_HEIGHT);
        render_lanes(&mut canvas, &self.dst_quad, self.num_lanes);
        canvas
    }
}

/// Draw the two road edges of `dst_quad` solid and `num_lanes - 1` dashed
/// dividers evenly spaced between them.
pub fn render_lanes(canvas: &mut RgbImage, dst_quad: &[Point; 4], num_lanes: u32) {
    let [top_left, top_right, bottom_left, bottom_right] = *dst_quad;
    draw_thick_line(canvas, top_left, bottom_left, LANE_THICKNESS, LANE_COLOR);
    draw_thick_line(canvas, top_right, bottom_right, LANE_THICKNESS, LANE_COLOR);

    if num_lanes < 2 {
        return;
    }
    let (tl, tr) = (top_left.to_pixel(), top_right.to_pixel());
    let (bl, br) = (bottom_left.to_pixel(), bottom_right.to_pixel());
    let lanes = i64::from(num_lanes);
    let divider_x = |left: i32, right: i32, i: i64| {
        let x = i64::from(left) + (i64::from(right) - i64::from(left)) * i / lanes;
        x as i32
    };
    for i in 1..lanes {
        draw_dashed_line(
            canvas,
            (divider_x(tl.0, tr.0, i), tl.1),
            (divider_x(bl.0, br.0, i), bl.1),
            LANE_THICKNESS,
            DASH_LENGTH,
            GAP_LENGTH,
            LANE_COLOR,
        );
    }
}
