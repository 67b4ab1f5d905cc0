use crate::pipeline::error::PipelineError;
use crate::pipeline::types::TrackedObject;
use opencv::core::{Mat, Point, Rect, Scalar, Vector};
use opencv::imgcodecs;
use opencv::imgproc::{put_text, rectangle, FONT_HERSHEY_SIMPLEX, LINE_8};
use opencv::prelude::*;

const BOX_COLOR: (f64, f64, f64) = (255.0, 0.0, 255.0); // Magenta
const COUNT_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0); // Green
const FLAG_COLOR: (f64, f64, f64) = (0.0, 255.0, 255.0); // Yellow

fn bgr(color: (f64, f64, f64)) -> Scalar {
    Scalar::new(color.0, color.1, color.2, 0.0)
}

/// Decodes an encoded frame into a BGR Mat.
pub fn decode_frame(data: &[u8]) -> Result<Mat, PipelineError> {
    let buf = Vector::<u8>::from_slice(data);
    let image = imgcodecs::imdecode(&buf, imgcodecs::IMREAD_COLOR)
        .map_err(|e| PipelineError::Decode(e.to_string()))?;
    if image.empty() {
        return Err(PipelineError::Decode("could not decode image".to_string()));
    }
    Ok(image)
}

/// Draws one box and `ID:<track> <Label>` per object, then the count and
/// flag status in the top-left corner.
pub fn draw_overlays(
    image: &mut Mat,
    objects: &[TrackedObject],
    flag_name: &str,
    flagged_present: bool,
) -> opencv::Result<()> {
    for obj in objects {
        let rect = Rect::new(obj.x1, obj.y1, obj.x2 - obj.x1, obj.y2 - obj.y1);
        rectangle(image, rect, bgr(BOX_COLOR), 2, LINE_8, 0)?;

        let label = format!("ID:{} {}", obj.track_id, capitalize(&obj.label));
        put_text(
            image,
            &label,
            Point::new(obj.x1, obj.y1 - 10),
            FONT_HERSHEY_SIMPLEX,
            0.9,
            bgr(BOX_COLOR),
            2,
            LINE_8,
            false,
        )?;
    }

    put_text(
        image,
        &format!("Count: {}", objects.len()),
        Point::new(10, 30),
        FONT_HERSHEY_SIMPLEX,
        0.9,
        bgr(COUNT_COLOR),
        2,
        LINE_8,
        false,
    )?;

    put_text(
        image,
        &flag_text(flag_name, flagged_present),
        Point::new(10, 60),
        FONT_HERSHEY_SIMPLEX,
        0.7,
        bgr(FLAG_COLOR),
        2,
        LINE_8,
        false,
    )?;

    Ok(())
}

/// Flag status line, e.g. `Ambulance: True`.
fn flag_text(flag_name: &str, flagged_present: bool) -> String {
    let state = if flagged_present { "True" } else { "False" };
    format!("{}: {}", capitalize(flag_name), state)
}

/// Re-encodes an annotated frame as JPEG.
pub fn encode_jpeg(image: &Mat) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Vector::<u8>::new();
    let ok = imgcodecs::imencode(".jpg", image, &mut buf, &Vector::new())
        .map_err(|e| PipelineError::Encode(e.to_string()))?;
    if !ok {
        return Err(PipelineError::Encode("JPEG encoder rejected frame".to_string()));
    }
    Ok(buf.to_vec())
}

/// First character upper-cased, the rest lower-cased.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
