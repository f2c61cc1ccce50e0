//! Drawing detections onto frames.
//!
use std::path::{Path, PathBuf};

use common::Frame;
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::model::Detection;

/// Fonts tried when no font is configured.
const FONT_SEARCH_PATHS: [&str; 3] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
];

const LINE_WIDTH: u32 = 2;
const LABEL_SCALE: f32 = 16.0;
const LABEL_HEIGHT: u32 = 18;

/// Box colors, picked by class id.
const PALETTE: [[u8; 3]; 10] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x00, 0xC2, 0xFF],
    [0x84, 0x38, 0xFF],
];

fn class_color(class_id: usize) -> [u8; 3] {
    PALETTE[class_id % PALETTE.len()]
}

/// Burns bounding boxes with labels and confidence scores into frames.
///
/// Without a font only the boxes are drawn.
pub struct Annotator {
    font: Option<Font<'static>>,
}

impl Annotator {
    pub fn new(font: Option<Font<'static>>) -> Self {
        Self { font }
    }

    /// Load the label font from `font_path`, or from a common system location if unset.
    pub fn load(font_path: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = match font_path {
            Some(path) => vec![path.to_path_buf()],
            None => FONT_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
        };

        for path in candidates {
            match std::fs::read(&path).map(Font::try_from_vec) {
                Ok(Some(font)) => {
                    log::info!("Using font {} for labels", path.display());
                    return Self::new(Some(font));
                }
                Ok(None) => log::warn!("{} is not a usable font", path.display()),
                Err(e) => log::debug!("Font {} not available: {e}", path.display()),
            }
        }

        log::warn!("No font found, drawing boxes without labels");
        Self::new(None)
    }

    pub fn draw(&self, frame: &mut Frame, detections: &[Detection]) {
        let (width, height) = frame.dimensions();
        let (width_f, height_f) = (width as f32, height as f32);
        let order = frame.order();
        let canvas = frame.buffer_mut();

        for detection in detections {
            let color = order.pixel(class_color(detection.class_id));

            // Coordinates of top-left and bottom-right points
            // Coordinate frame basis is on the top left corner
            let [x1, y1, x2, y2] = detection.bbox;
            let (x_tl, y_tl) = ((x1 * width_f) as i32, (y1 * height_f) as i32);
            let (x_br, y_br) = ((x2 * width_f) as i32, (y2 * height_f) as i32);
            let rect_width = (x_br - x_tl).max(1) as u32;
            let rect_height = (y_br - y_tl).max(1) as u32;

            for inset in 0..LINE_WIDTH {
                let (w, h) = (
                    rect_width.saturating_sub(2 * inset),
                    rect_height.saturating_sub(2 * inset),
                );
                if w == 0 || h == 0 {
                    break;
                }
                let rect = Rect::at(x_tl + inset as i32, y_tl + inset as i32).of_size(w, h);
                draw_hollow_rect_mut(canvas, rect, color);
            }

            if let Some(font) = &self.font {
                let text = format!("{} {:.2}", detection.label(), detection.confidence);
                // Place the label above the box, or inside when the box touches the top edge
                let label_y = match y_tl >= LABEL_HEIGHT as i32 {
                    true => y_tl - LABEL_HEIGHT as i32,
                    false => y_tl,
                };
                let label_width = (text.chars().count() as f32 * LABEL_SCALE * 0.6) as u32 + 4;

                draw_filled_rect_mut(
                    canvas,
                    Rect::at(x_tl, label_y).of_size(label_width, LABEL_HEIGHT),
                    color,
                );
                draw_text_mut(
                    canvas,
                    order.pixel([255, 255, 255]),
                    x_tl + 2,
                    label_y + 1,
                    Scale::uniform(LABEL_SCALE),
                    font,
                    &text,
                );
            }
        }
    }
}

#[cfg(test)]
mod test {

    use common::ChannelOrder;
    use image::Rgb;

    use super::*;

    fn person(bbox: [f32; 4]) -> Detection {
        Detection {
            bbox,
            confidence: 0.87,
            class_id: 0,
        }
    }

    #[test]
    fn draws_box_outline_only() {
        let mut frame = Frame::from_raw(20, 20, ChannelOrder::Rgb, vec![0; 20 * 20 * 3]).unwrap();
        Annotator::new(None).draw(&mut frame, &[person([0.25, 0.25, 0.75, 0.75])]);

        let image = frame.into_rgb();
        assert_eq!(image.get_pixel(5, 5), &Rgb([0xFF, 0x38, 0x38]));
        assert_eq!(image.get_pixel(6, 6), &Rgb([0xFF, 0x38, 0x38]));
        assert_eq!(image.get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn colors_follow_channel_order() {
        let mut frame = Frame::from_raw(20, 20, ChannelOrder::Bgr, vec![0; 20 * 20 * 3]).unwrap();
        Annotator::new(None).draw(&mut frame, &[person([0.25, 0.25, 0.75, 0.75])]);

        assert_eq!(frame.buffer().get_pixel(5, 5), &Rgb([0x38, 0x38, 0xFF]));
        assert_eq!(frame.into_rgb().get_pixel(5, 5), &Rgb([0xFF, 0x38, 0x38]));
    }

    #[test]
    fn degenerate_boxes_do_not_panic() {
        let mut frame = Frame::from_raw(8, 8, ChannelOrder::Rgb, vec![0; 8 * 8 * 3]).unwrap();
        Annotator::new(None).draw(
            &mut frame,
            &[person([0.5, 0.5, 0.5, 0.5]), person([0.9, 0.9, 1.0, 1.0])],
        );
    }

    #[test]
    fn missing_font_falls_back_to_boxes() {
        let annotator = Annotator::load(Some(Path::new("/no/such/font.ttf")));
        assert!(annotator.font.is_none());
    }
}
