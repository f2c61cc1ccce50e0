//! Decoded video frames.
//!
use image::{Rgb, RgbImage};

/// Order of the three color channels in a frame buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

impl ChannelOrder {
    /// Index in the pixel buffer holding the given RGB channel (0 = red, 1 = green, 2 = blue).
    pub fn index_of(&self, rgb_channel: usize) -> usize {
        match self {
            ChannelOrder::Rgb => rgb_channel,
            ChannelOrder::Bgr => 2 - rgb_channel,
        }
    }

    /// Express an RGB color as a pixel of this channel order.
    pub fn pixel(&self, [r, g, b]: [u8; 3]) -> Rgb<u8> {
        match self {
            ChannelOrder::Rgb => Rgb([r, g, b]),
            ChannelOrder::Bgr => Rgb([b, g, r]),
        }
    }
}

/// One decoded image sampled from a video source.
///
/// The pixel data is kept in the channel order the source delivered it in. The buffer is an
/// `RgbImage` for convenience only, its channels are interpreted according to `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    image: RgbImage,
    order: ChannelOrder,
}

impl Frame {
    /// Wrap a raw `width x height x 3` buffer. Returns `None` if the buffer length does not match.
    pub fn from_raw(width: u32, height: u32, order: ChannelOrder, data: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(|image| Self { image, order })
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        Self {
            image,
            order: ChannelOrder::Rgb,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    /// Pixel buffer in `order()` channel order.
    pub fn buffer(&self) -> &RgbImage {
        &self.image
    }

    pub fn buffer_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Convert into an image with RGB channel order, as expected by the display.
    pub fn into_rgb(self) -> RgbImage {
        let mut image = self.image;
        if self.order == ChannelOrder::Bgr {
            for pixel in image.pixels_mut() {
                pixel.0.swap(0, 2);
            }
        }
        image
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::from_raw(2, 2, ChannelOrder::Rgb, vec![0; 11]).is_none());
        assert!(Frame::from_raw(2, 2, ChannelOrder::Rgb, vec![0; 12]).is_some());
    }

    #[test]
    fn bgr_frames_are_swapped_for_display() {
        let frame = Frame::from_raw(1, 2, ChannelOrder::Bgr, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let rgb = frame.into_rgb();

        assert_eq!(rgb.get_pixel(0, 0), &Rgb([3, 2, 1]));
        assert_eq!(rgb.get_pixel(0, 1), &Rgb([6, 5, 4]));
    }

    #[test]
    fn rgb_frames_are_untouched() {
        let frame = Frame::from_raw(1, 1, ChannelOrder::Rgb, vec![1, 2, 3]).unwrap();
        assert_eq!(frame.into_rgb().get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[test]
    fn channel_lookup_follows_order() {
        assert_eq!(ChannelOrder::Bgr.index_of(0), 2);
        assert_eq!(ChannelOrder::Bgr.index_of(1), 1);
        assert_eq!(ChannelOrder::Rgb.index_of(0), 0);
        assert_eq!(ChannelOrder::Bgr.pixel([255, 0, 10]), Rgb([10, 0, 255]));
    }
}
