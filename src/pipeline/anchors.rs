use crate::shapes::PointF32;

// SSD anchor layout of the short range BlazeFace model. Layers sharing a
// stride are merged, and every anchor has a fixed 1x1 size, so only the
// centers matter.
const STRIDES: [u32; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: u32 = 2;

pub const NUM_ANCHORS: usize = 896;

/// Anchor centers in model input pixels.
pub fn gen_anchors(input_width: u32, input_height: u32) -> Vec<PointF32> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    let mut layer = 0;
    while layer < STRIDES.len() {
        let stride = STRIDES[layer];
        let mut per_cell = 0;
        while layer < STRIDES.len() && STRIDES[layer] == stride {
            per_cell += ANCHORS_PER_LAYER;
            layer += 1;
        }

        let grid_w = input_width.div_ceil(stride);
        let grid_h = input_height.div_ceil(stride);
        for y in 0..grid_h {
            for x in 0..grid_w {
                let center = PointF32::new(
                    (x as f32 + 0.5) / grid_w as f32 * input_width as f32,
                    (y as f32 + 0.5) / grid_h as f32 * input_height as f32,
                );
                for _ in 0..per_cell {
                    anchors.push(center);
                }
            }
        }
    }

    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_layout() {
        let anchors = gen_anchors(128, 128);
        assert_eq!(anchors.len(), NUM_ANCHORS);

        // 16x16 grid, two per cell
        assert_eq!(anchors[0], PointF32::new(4., 4.));
        assert_eq!(anchors[1], PointF32::new(4., 4.));
        assert_eq!(anchors[2], PointF32::new(12., 4.));
        assert_eq!(anchors[511], PointF32::new(124., 124.));

        // 8x8 grid, six per cell
        assert_eq!(anchors[512], PointF32::new(8., 8.));
        assert_eq!(anchors[517], PointF32::new(8., 8.));
        assert_eq!(anchors[518], PointF32::new(24., 8.));
        assert_eq!(anchors[895], PointF32::new(120., 120.));
    }
}
