use tracing::trace;

use crate::face::RawFace;
use crate::shapes::RectF32;

const MIN_OVERLAP_PCT: f32 = 30.;

/// Carries face ids across consecutive frames by box overlap.
#[derive(Debug, Default)]
pub struct FaceTracker {
    previous: Vec<(i32, RectF32)>,
    next_id: i32,
}

impl FaceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, faces: &mut [RawFace]) {
        let mut unmatched = std::mem::take(&mut self.previous);
        let mut current = Vec::with_capacity(faces.len());

        for face in faces.iter_mut() {
            let id = match face.tracking_id {
                Some(id) => {
                    unmatched.retain(|(prev, _)| *prev != id);
                    id
                }
                None => {
                    let best = unmatched
                        .iter()
                        .enumerate()
                        .map(|(i, (_, r))| (i, r.overlap_pct(&face.bounding_box)))
                        .filter(|(_, pct)| *pct > MIN_OVERLAP_PCT)
                        .max_by(|a, b| a.1.total_cmp(&b.1));

                    match best {
                        Some((i, _)) => unmatched.swap_remove(i).0,
                        None => {
                            let id = self.next_id;
                            self.next_id = self.next_id.wrapping_add(1);
                            trace!("New face id {id}");
                            id
                        }
                    }
                }
            };

            face.tracking_id = Some(id);
            current.push((id, face.bounding_box));
        }

        self.previous = current;
    }

    pub fn reset(&mut self) {
        self.previous.clear();
        self.next_id = 0;
    }
}
