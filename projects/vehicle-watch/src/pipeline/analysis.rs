use crate::pipeline::error::PipelineError;
use crate::pipeline::overlay::{decode_frame, draw_overlays, encode_jpeg};
use crate::pipeline::tracker::ObjectTracker;
use crate::pipeline::types::{DetectionResult, FramePayload, TrackedObject};

/// Class-name substrings whose presence raises the flag, matched
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct FlaggedClasses {
    terms: Vec<String>,
}

impl FlaggedClasses {
    /// Blank terms are dropped; they would match every label.
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { terms }
    }

    pub fn matches(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.terms.iter().any(|t| label.contains(t.as_str()))
    }

    pub fn any_present(&self, objects: &[TrackedObject]) -> bool {
        objects.iter().any(|o| self.matches(&o.label))
    }

    /// Name shown in the flag overlay.
    pub fn display_name(&self) -> &str {
        self.terms.first().map(String::as_str).unwrap_or("flagged")
    }
}

/// Turns one encoded frame into a [`DetectionResult`].
pub struct DetectionStep<T> {
    tracker: T,
    flagged: FlaggedClasses,
    min_confidence: f32,
}

impl<T: ObjectTracker> DetectionStep<T> {
    pub fn new(tracker: T, flagged: FlaggedClasses, min_confidence: f32) -> Self {
        Self {
            tracker,
            flagged,
            min_confidence,
        }
    }

    /// Decode, track, annotate and re-encode. Any failure is final for this
    /// frame; the payload is consumed either way.
    pub fn run(&mut self, payload: FramePayload) -> Result<DetectionResult, PipelineError> {
        let mut image = decode_frame(payload.as_bytes())?;
        drop(payload);

        let objects = self
            .tracker
            .track(&image, self.min_confidence)
            .map_err(|e| PipelineError::Inference(format!("{:#}", e)))?;

        let flagged_present = self.flagged.any_present(&objects);

        draw_overlays(
            &mut image,
            &objects,
            self.flagged.display_name(),
            flagged_present,
        )
        .map_err(|e| PipelineError::Encode(e.to_string()))?;
        let jpeg = encode_jpeg(&image)?;

        Ok(DetectionResult {
            object_count: objects.len(),
            flagged_present,
            annotated_frame: hex::encode(jpeg),
        })
    }
}
