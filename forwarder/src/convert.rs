use image::DynamicImage;
use mjpeg_relay_common::frame::{FrameError, PixelEncoding, VideoFrame};

use crate::capture::RawFrame;

/// Convert any decoded image to tightly packed BGR8.
///
/// Whatever the source colour type (grey, alpha, 16-bit, float), the output
/// is always `width * height * 3` bytes.
pub fn to_bgr8(image: DynamicImage) -> (u32, u32, Vec<u8>) {
    let mut rgb = match image {
        DynamicImage::ImageRgb8(buf) => buf,
        other => other.to_rgb8(),
    };
    for pixel in rgb.pixels_mut() {
        pixel.0.swap(0, 2);
    }
    let (width, height) = rgb.dimensions();
    (width, height, rgb.into_raw())
}

/// Turn a captured frame into the message published downstream.
pub fn to_video_frame(
    raw: RawFrame,
    seq: u64,
    frame_id: &str,
) -> Result<VideoFrame, FrameError> {
    let (width, height, data) = to_bgr8(raw.image);
    VideoFrame::new(
        width,
        height,
        PixelEncoding::CANONICAL,
        data,
        raw.captured_at_ms,
        seq,
        frame_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    #[test]
    fn rgb_channels_are_swapped() {
        let img = RgbImage::from_pixel(2, 1, Rgb([1, 2, 3]));
        let (w, h, data) = to_bgr8(DynamicImage::ImageRgb8(img));
        assert_eq!((w, h), (2, 1));
        assert_eq!(data, vec![3, 2, 1, 3, 2, 1]);
    }

    #[test]
    fn grayscale_expands_to_three_channels() {
        let img = GrayImage::from_pixel(3, 2, Luma([77]));
        let (w, h, data) = to_bgr8(DynamicImage::ImageLuma8(img));
        assert_eq!(data.len(), (w * h * 3) as usize);
        assert!(data.iter().all(|&b| b == 77));
    }

    #[test]
    fn alpha_is_dropped() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 128]));
        let (_, _, data) = to_bgr8(DynamicImage::ImageRgba8(img));
        assert_eq!(data, vec![30, 20, 10]);
    }

    #[test]
    fn video_frame_carries_metadata() {
        let raw = RawFrame {
            image: DynamicImage::ImageRgb8(RgbImage::new(4, 3)),
            captured_at_ms: 1708300000000,
        };
        let frame = to_video_frame(raw, 7, "front_camera").unwrap();
        assert_eq!(frame.encoding, PixelEncoding::Bgr8);
        assert_eq!(frame.step, 12);
        assert_eq!(frame.data.len(), 36);
        assert_eq!(frame.seq, 7);
        assert_eq!(frame.frame_id, "front_camera");
        assert_eq!(frame.captured_at_ms, 1708300000000);
    }

    #[test]
    fn empty_image_yields_empty_frame() {
        let raw = RawFrame {
            image: DynamicImage::ImageLuma8(GrayImage::new(0, 0)),
            captured_at_ms: 0,
        };
        let frame = to_video_frame(raw, 0, "camera").unwrap();
        assert_eq!((frame.width, frame.height, frame.step), (0, 0, 0));
        assert!(frame.data.is_empty());
    }
}
