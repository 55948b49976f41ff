#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct RectF32 {
    // top left corner
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl RectF32 {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> RectF32 {
        RectF32 { x, y, w, h }
    }

    pub fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> RectF32 {
        RectF32 {
            x: left,
            y: top,
            w: right - left,
            h: bottom - top,
        }
    }

    pub fn from_center(xc: f32, yc: f32, w: f32, h: f32) -> RectF32 {
        RectF32 {
            x: xc - w / 2.,
            y: yc - h / 2.,
            w,
            h,
        }
    }

    pub fn left(&self) -> f32 {
        self.x
    }
    pub fn right(&self) -> f32 {
        self.x + self.w
    }
    pub fn top(&self) -> f32 {
        self.y
    }
    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn scale(&mut self, scale_x: f32, scale_y: f32) -> RectF32 {
        self.x *= scale_x;
        self.y *= scale_y;
        self.w *= scale_x;
        self.h *= scale_y;

        *self
    }

    /// Intersection over union, in percent.
    pub fn overlap_pct(&self, other: &RectF32) -> f32 {
        let x_min = self.left().max(other.left());
        let x_max = self.right().min(other.right());
        let y_min = self.top().max(other.top());
        let y_max = self.bottom().min(other.bottom());

        let overlap_area = if x_min < x_max && y_min < y_max {
            (x_max - x_min) * (y_max - y_min)
        } else {
            0.
        };

        let area_delta = self.area() + other.area() - overlap_area;

        if area_delta > 0. {
            overlap_area / area_delta * 100.
        } else {
            0.
        }
    }
}

impl From<RectF32> for imageproc::rect::Rect {
    fn from(r: RectF32) -> imageproc::rect::Rect {
        imageproc::rect::Rect::at(r.x.round() as i32, r.y.round() as i32)
            .of_size(r.w.round().max(1.) as u32, r.h.round().max(1.) as u32)
    }
}
