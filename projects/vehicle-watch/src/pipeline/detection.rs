use anyhow::{anyhow, Result};
use image::{DynamicImage, ImageBuffer, Rgb};
use opencv::core::Mat;
use opencv::prelude::*;
use usls::models::RTDETR;
use usls::{Config, Image};

/// A wrapper around the USLS RT-DETR model that handles BGR-to-RGB conversion
/// and corrects for aspect-ratio padding bugs in the underlying model library.
pub struct ObjectDetector {
    model: RTDETR,
}

impl ObjectDetector {
    /// Create a new detector with the given model path.
    ///
    /// `class_names` must follow the model's class-id order; COCO-80 names are
    /// used when it is empty.
    pub fn new(model_path: &str, class_names: &[String]) -> Result<Self> {
        let config = Config::default().with_model_file(model_path);
        let config = if class_names.is_empty() {
            config.with_class_names(&usls::NAMES_COCO_80)
        } else {
            let names: Vec<&str> = class_names.iter().map(String::as_str).collect();
            config.with_class_names(&names)
        };

        #[cfg(target_os = "macos")]
        let config = config.with_model_device(usls::Device::CoreMl);

        let config = config.commit()?;
        let model = RTDETR::new(config)?;
        Ok(Self { model })
    }

    /// Run detection on an OpenCV Mat (BGR).
    pub fn detect(&mut self, image: &Mat) -> Result<Vec<usls::Hbb>> {
        let dynamic_image = mat_to_dynamic_image(image)?;

        // Correction calculations (USLS RT-DETR bug workaround)
        let size = image.size()?;
        let (x_correction, y_correction) = aspect_correction(size.width as f32, size.height as f32);

        let results = self.model.forward(&[Image::from(dynamic_image)])?;
        let Some(y) = results.into_iter().next() else {
            return Ok(Vec::new());
        };

        let corrected = y
            .hbbs
            .into_iter()
            .map(|hbb| {
                let x = hbb.xmin() * x_correction;
                let w = hbb.width() * x_correction;
                let y_coord = hbb.ymin() * y_correction;
                let h = hbb.height() * y_correction;

                let mut new_hbb = usls::Hbb::default().with_xyxy(x, y_coord, x + w, y_coord + h);

                if let Some(conf) = hbb.confidence() {
                    new_hbb = new_hbb.with_confidence(conf);
                }
                if let Some(id) = hbb.id() {
                    new_hbb = new_hbb.with_id(id);
                }
                if let Some(name) = hbb.name() {
                    new_hbb = new_hbb.with_name(name);
                }

                new_hbb
            })
            .collect();

        Ok(corrected)
    }
}

/// Scale factors undoing the letterbox squash on the longer image side.
fn aspect_correction(img_w: f32, img_h: f32) -> (f32, f32) {
    if img_w > img_h {
        (img_w / img_h, 1.0)
    } else if img_h > img_w {
        (1.0, img_h / img_w)
    } else {
        (1.0, 1.0)
    }
}

/// Convert an OpenCV Mat (BGR) to an image::DynamicImage (RGB)
fn mat_to_dynamic_image(mat: &Mat) -> Result<DynamicImage> {
    let mut rgb_mat = Mat::default();
    opencv::imgproc::cvt_color_def(mat, &mut rgb_mat, opencv::imgproc::COLOR_BGR2RGB)?;

    let size = rgb_mat.size()?;
    let width = size.width as u32;
    let height = size.height as u32;

    if !rgb_mat.is_continuous() {
        return Err(anyhow!("Mat is not continuous"));
    }

    let buffer = rgb_mat.data_bytes()?.to_vec();

    let img_buffer = ImageBuffer::<Rgb<u8>, _>::from_vec(width, height, buffer)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from Mat data"))?;

    Ok(DynamicImage::ImageRgb8(img_buffer))
}
