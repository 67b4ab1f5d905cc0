// Object tracking: the model seam used by the detection step
//
// `ObjectTracker` takes `&mut self`, and the only instance lives inside the
// detection worker, so the model is never invoked concurrently.

use crate::pipeline::detection::ObjectDetector;
use crate::pipeline::types::TrackedObject;
use anyhow::{Context, Result};
use opencv::core::Mat;

/// Detects objects in a frame and assigns each one a persistent track id.
pub trait ObjectTracker {
    fn track(&mut self, image: &Mat, min_confidence: f32) -> Result<Vec<TrackedObject>>;
}

/// A raw detection in pixel coordinates, before track assignment.
#[derive(Debug, Clone)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub label: String,
}

impl Detection {
    fn iou(&self, other: &Detection) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let area_a = (self.x2 - self.x1) * (self.y2 - self.y1);
        let area_b = (other.x2 - other.x1) * (other.y2 - other.y1);
        let union = area_a + area_b - intersection;

        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

struct Track {
    id: u64,
    last: Detection,
    missed: u32,
}

/// Greedy IoU association keeping track ids stable across frames.
///
/// Ids start at 1 and are never reused, even after a track is retired.
pub struct IouTracker {
    tracks: Vec<Track>,
    next_id: u64,
    iou_threshold: f32,
    max_missed: u32,
}

impl IouTracker {
    pub fn new(iou_threshold: f32, max_missed: u32) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            iou_threshold,
            max_missed,
        }
    }

    /// Matches this frame's detections against live tracks and returns them
    /// in detection order with their track ids.
    pub fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackedObject> {
        let mut candidates = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                if track.last.label != det.label {
                    continue;
                }
                let iou = track.last.iou(det);
                if iou >= self.iou_threshold {
                    candidates.push((iou, ti, di));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_matched = vec![false; self.tracks.len()];
        let mut assigned: Vec<Option<usize>> = vec![None; detections.len()];
        for (_, ti, di) in candidates {
            if track_matched[ti] || assigned[di].is_some() {
                continue;
            }
            track_matched[ti] = true;
            assigned[di] = Some(ti);
        }

        for (track, matched) in self.tracks.iter_mut().zip(&track_matched) {
            if !matched {
                track.missed += 1;
            }
        }

        let mut objects = Vec::with_capacity(detections.len());
        for (det, slot) in detections.into_iter().zip(assigned) {
            let id = match slot {
                Some(ti) => {
                    let track = &mut self.tracks[ti];
                    track.missed = 0;
                    track.last = det.clone();
                    track.id
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(Track {
                        id,
                        last: det.clone(),
                        missed: 0,
                    });
                    id
                }
            };
            objects.push(TrackedObject {
                x1: det.x1.round() as i32,
                y1: det.y1.round() as i32,
                x2: det.x2.round() as i32,
                y2: det.y2.round() as i32,
                label: det.label,
                track_id: id,
                confidence: det.confidence,
            });
        }

        let max_missed = self.max_missed;
        self.tracks.retain(|t| t.missed <= max_missed);

        objects
    }

    #[cfg(test)]
    fn live_tracks(&self) -> usize {
        self.tracks.len()
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(0.3, 30)
    }
}

/// RT-DETR detections fed through an [`IouTracker`].
pub struct RtDetrTracker {
    detector: ObjectDetector,
    tracks: IouTracker,
}

impl RtDetrTracker {
    pub fn new(model_path: &str, class_names: &[String]) -> Result<Self> {
        let detector = ObjectDetector::new(model_path, class_names)
            .with_context(|| format!("Failed to load model from '{}'", model_path))?;
        tracing::info!("Loaded RT-DETR model from {}", model_path);
        Ok(Self {
            detector,
            tracks: IouTracker::default(),
        })
    }
}

impl ObjectTracker for RtDetrTracker {
    fn track(&mut self, image: &Mat, min_confidence: f32) -> Result<Vec<TrackedObject>> {
        let detections = self
            .detector
            .detect(image)?
            .into_iter()
            .filter(|d| d.confidence().unwrap_or(0.0) >= min_confidence)
            .filter_map(|d| {
                let label = d.name()?.to_string();
                Some(Detection {
                    x1: d.xmin(),
                    y1: d.ymin(),
                    x2: d.xmin() + d.width(),
                    y2: d.ymin() + d.height(),
                    confidence: d.confidence().unwrap_or(0.0),
                    label,
                })
            })
            .collect();

        Ok(self.tracks.update(detections))
    }
}
