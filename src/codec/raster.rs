//! Raster codecs backed by the `image` crate.

use super::{Codec, CodecError, CodecHandler, CodecOptions};
use image::codecs::avif::AvifEncoder;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat};
use std::io::Cursor;

/// AVIF encoder speed (1 slowest .. 10 fastest).
const AVIF_SPEED: u8 = 8;

/// GIF palette quantization speed (1 best .. 30 fastest).
const GIF_SPEED: i32 = 10;

/// Decode-and-re-encode handler for one raster format.
pub(crate) struct RasterHandler {
    codec: Codec,
    format: ImageFormat,
}

impl RasterHandler {
    pub(crate) fn new(codec: Codec) -> Option<Self> {
        let format = match codec {
            Codec::Png => ImageFormat::Png,
            Codec::Jpeg => ImageFormat::Jpeg,
            Codec::Webp => ImageFormat::WebP,
            Codec::Gif => ImageFormat::Gif,
            Codec::Tiff => ImageFormat::Tiff,
            Codec::Avif => ImageFormat::Avif,
            Codec::Svg | Codec::Tinify => return None,
        };
        Some(Self { codec, format })
    }
}

impl CodecHandler for RasterHandler {
    fn codec(&self) -> Codec {
        self.codec
    }

    fn encode(&self, input: &[u8], options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        match self.codec {
            Codec::Gif => encode_gif(input),
            Codec::Svg | Codec::Tinify => Err(CodecError::Unsupported(self.codec.to_string())),
            _ => self.encode_still(input, options),
        }
    }
}

impl RasterHandler {
    fn encode_still(&self, input: &[u8], options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
        // Only the first frame would survive a re-encode
        if self.codec == Codec::Webp && WebPDecoder::new(Cursor::new(input))?.has_animation() {
            return Err(CodecError::Animated(self.codec));
        }

        let img = image::load_from_memory_with_format(input, self.format)?;
        let quality = options.quality.clamp(1, 100);
        let mut buf = Vec::with_capacity(input.len());

        match self.codec {
            Codec::Png => {
                let encoder =
                    PngEncoder::new_with_quality(&mut buf, CompressionType::Best, FilterType::Adaptive);
                img.write_with_encoder(encoder)?;
            }
            Codec::Jpeg => {
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
                rgb.write_with_encoder(encoder)?;
            }
            Codec::Avif => {
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                let encoder = AvifEncoder::new_with_speed_quality(&mut buf, AVIF_SPEED, quality);
                rgba.write_with_encoder(encoder)?;
            }
            Codec::Webp => {
                // The encoder only takes 8-bit RGB(A)
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                rgba.write_to(&mut Cursor::new(&mut buf), self.format)?;
            }
            _ => {
                img.write_to(&mut Cursor::new(&mut buf), self.format)?;
            }
        }

        Ok(buf)
    }
}

/// Re-encode every frame of a GIF, keeping frame delays.
fn encode_gif(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let frames = GifDecoder::new(Cursor::new(input))?
        .into_frames()
        .collect_frames()?;
    let animated = frames.len() > 1;

    let mut buf = Vec::with_capacity(input.len());
    {
        let mut encoder = GifEncoder::new_with_speed(&mut buf, GIF_SPEED);
        if animated {
            encoder.set_repeat(Repeat::Infinite)?;
        }
        encoder.encode_frames(frames)?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Delay, Frame, Rgba, RgbaImage};

    fn sample_png() -> Vec<u8> {
        let img = RgbaImage::from_fn(32, 32, |x, y| {
            Rgba([(x * 8) as u8, (y * 8) as u8, 128, 255])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_no_raster_handler_for_svg_or_tinify() {
        assert!(RasterHandler::new(Codec::Svg).is_none());
        assert!(RasterHandler::new(Codec::Tinify).is_none());
        assert!(RasterHandler::new(Codec::Png).is_some());
    }

    #[test]
    fn test_png_reencode_decodes_back() {
        let handler = RasterHandler::new(Codec::Png).unwrap();
        let encoded = handler
            .encode(&sample_png(), &CodecOptions::default())
            .unwrap();
        let decoded = image::load_from_memory_with_format(&encoded, ImageFormat::Png).unwrap();
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 32);
    }

    #[test]
    fn test_jpeg_handler_rejects_png_bytes() {
        let handler = RasterHandler::new(Codec::Jpeg).unwrap();
        let err = handler
            .encode(&sample_png(), &CodecOptions::default())
            .unwrap_err();
        assert!(matches!(err, CodecError::Image(_)));
    }

    #[test]
    fn test_garbage_input_is_an_image_error() {
        let handler = RasterHandler::new(Codec::Png).unwrap();
        let err = handler
            .encode(b"definitely not a png", &CodecOptions::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("Image processing error"));
    }

    fn three_frame_gif() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder.set_repeat(Repeat::Infinite).unwrap();
            for shade in [0u8, 120, 240] {
                let img = RgbaImage::from_pixel(16, 16, Rgba([shade, 64, 255 - shade, 255]));
                let frame = Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(100, 1));
                encoder.encode_frame(frame).unwrap();
            }
        }
        buf
    }

    fn gif_frame_count(bytes: &[u8]) -> usize {
        GifDecoder::new(Cursor::new(bytes))
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap()
            .len()
    }

    #[test]
    fn test_gif_keeps_every_animation_frame() {
        let input = three_frame_gif();
        assert_eq!(gif_frame_count(&input), 3);

        let handler = RasterHandler::new(Codec::Gif).unwrap();
        let encoded = handler.encode(&input, &CodecOptions::default()).unwrap();
        assert_eq!(gif_frame_count(&encoded), 3);

        let frames = GifDecoder::new(Cursor::new(encoded.as_slice()))
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap();
        assert_eq!(frames[2].delay().numer_denom_ms(), (100, 1));
        let red = frames[2].buffer().get_pixel(0, 0)[0];
        assert!(red.abs_diff(240) <= 8, "last frame red channel {}", red);
    }

    #[test]
    fn test_still_gif_stays_a_single_frame() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
        let mut input = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut input), ImageFormat::Gif)
            .unwrap();

        let handler = RasterHandler::new(Codec::Gif).unwrap();
        let encoded = handler.encode(&input, &CodecOptions::default()).unwrap();
        assert_eq!(gif_frame_count(&encoded), 1);
    }

    #[test]
    fn test_still_webp_is_reencoded() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([200, 100, 50, 255]));
        let mut input = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut input), ImageFormat::WebP)
            .unwrap();

        let handler = RasterHandler::new(Codec::Webp).unwrap();
        let encoded = handler.encode(&input, &CodecOptions::default()).unwrap();
        let decoded = image::load_from_memory_with_format(&encoded, ImageFormat::WebP).unwrap();
        assert_eq!(decoded.width(), 8);
    }

    #[cfg(feature = "avif-decode")]
    #[test]
    fn test_avif_input_decodes_and_reencodes() {
        let img = RgbaImage::from_fn(16, 16, |x, y| Rgba([(x * 16) as u8, (y * 16) as u8, 80, 255]));
        let mut input = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_with_encoder(AvifEncoder::new_with_speed_quality(&mut input, 10, 90))
            .unwrap();

        let handler = RasterHandler::new(Codec::Avif).unwrap();
        let encoded = handler
            .encode(&input, &CodecOptions::default())
            .unwrap();
        let decoded = image::load_from_memory_with_format(&encoded, ImageFormat::Avif).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }
}
