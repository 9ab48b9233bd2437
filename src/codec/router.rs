//! Static codec dispatch.

use super::output::{
    backup_original, check_input, compress_rate, disk_size, file_sha256, resolve_output_path,
    write_atomic,
};
use super::raster::RasterHandler;
use super::svg::SvgHandler;
use super::tinify::TinifyHandler;
use super::{Codec, CodecError, CodecHandler, CodecOutput, CodecPayload, Stage};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

/// Maps each [`Codec`] tag to its handler.
pub struct CodecRouter {
    handlers: HashMap<Codec, Box<dyn CodecHandler>>,
}

impl CodecRouter {
    /// A router with no handlers. Mostly useful for tests.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// A router with the built-in handler for every codec.
    pub fn builtin() -> Self {
        let mut router = Self::empty();
        for codec in Codec::ALL {
            if let Some(raster) = RasterHandler::new(codec) {
                router.register(raster);
            }
        }
        router.register(SvgHandler::new());
        router.register(TinifyHandler::new());
        router
    }

    /// Register (or replace) the handler for its codec.
    pub fn register(&mut self, handler: impl CodecHandler + 'static) -> &mut Self {
        self.handlers.insert(handler.codec(), Box::new(handler));
        self
    }

    /// Check that every codec tag has a handler.
    pub fn validate(&self) -> Result<(), CodecError> {
        match Codec::ALL.iter().find(|c| !self.handlers.contains_key(*c)) {
            Some(missing) => Err(CodecError::MissingHandler(*missing)),
            None => Ok(()),
        }
    }

    /// Run one job: route by codec tag, encode, and write the output.
    ///
    /// `on_progress` is called at each [`Stage`]. An unknown tag fails with
    /// [`CodecError::Unsupported`] before the input is touched.
    pub fn route(
        &self,
        payload: &CodecPayload,
        on_progress: &mut dyn FnMut(Stage),
    ) -> Result<CodecOutput, CodecError> {
        let codec: Codec = payload.codec.parse()?;
        let handler = self
            .handlers
            .get(&codec)
            .ok_or(CodecError::MissingHandler(codec))?;

        let started = Instant::now();
        let options = payload.options.clone().unwrap_or_default();
        let input = Path::new(&payload.input_path);

        on_progress(Stage::Starting);
        let input_size = check_input(input)?;

        on_progress(Stage::Reading);
        let original = fs::read(input)?;

        on_progress(Stage::Processing);
        let encoded = handler.encode(&original, &options)?;

        on_progress(Stage::Writing);
        let output_path = resolve_output_path(input, payload.output_path.as_deref(), &options.save)?;

        let original_temp_path = match options.temp_dir.as_deref() {
            Some(dir) if !dir.is_empty() => backup_original(input, Path::new(dir))?
                .to_string_lossy()
                .to_string(),
            _ => String::new(),
        };

        let rate = compress_rate(input_size, encoded.len() as u64);
        let available = rate >= options.limit_compress_rate;
        if available {
            write_atomic(&output_path, &encoded)?;
        } else if output_path != input {
            write_atomic(&output_path, &original)?;
        }

        let output_size = if available {
            encoded.len() as u64
        } else {
            input_size
        };
        let hash = file_sha256(&output_path)?;
        let output_disk_size = disk_size(&output_path)?;

        tracing::debug!(
            codec = %codec,
            input = %payload.input_path,
            input_size,
            output_size,
            rate,
            kept_encoded = available,
            "Codec finished"
        );

        on_progress(Stage::Completed);

        Ok(CodecOutput {
            input_path: payload.input_path.clone(),
            input_size,
            output_path: output_path.to_string_lossy().to_string(),
            output_size,
            output_disk_size,
            compress_rate: if available { rate } else { 0.0 },
            available_compress_rate: available,
            original_temp_path,
            hash,
            cost_time: started.elapsed().as_millis() as u64,
        })
    }
}

impl Default for CodecRouter {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecOptions, SaveMode, SaveOptions};
    use tempfile::tempdir;

    /// Halves the input, so every job "compresses" by 50%.
    struct HalvingHandler(Codec);

    impl CodecHandler for HalvingHandler {
        fn codec(&self) -> Codec {
            self.0
        }

        fn encode(&self, input: &[u8], _options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
            Ok(input[..input.len() / 2].to_vec())
        }
    }

    /// Makes the output bigger than the input.
    struct GrowingHandler;

    impl CodecHandler for GrowingHandler {
        fn codec(&self) -> Codec {
            Codec::Png
        }

        fn encode(&self, input: &[u8], _options: &CodecOptions) -> Result<Vec<u8>, CodecError> {
            let mut out = input.to_vec();
            out.extend_from_slice(input);
            Ok(out)
        }
    }

    #[test]
    fn test_builtin_router_is_complete() {
        assert!(CodecRouter::builtin().validate().is_ok());
    }

    #[test]
    fn test_validate_reports_missing_handler() {
        let mut router = CodecRouter::empty();
        router.register(SvgHandler::new());
        let err = router.validate().unwrap_err();
        assert!(matches!(err, CodecError::MissingHandler(Codec::Avif)));
    }

    #[test]
    fn test_unsupported_codec_message() {
        let router = CodecRouter::builtin();
        let payload = CodecPayload::new("bogus", "/does/not/matter.png");
        let mut stages = Vec::new();
        let err = router.route(&payload, &mut |s| stages.push(s)).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported codec: bogus");
        assert!(stages.is_empty());
    }

    #[test]
    fn test_missing_input_fails_after_starting() {
        let router = CodecRouter::builtin();
        let payload = CodecPayload::new("png", "/definitely/missing.png");
        let mut stages = Vec::new();
        let err = router.route(&payload, &mut |s| stages.push(s)).unwrap_err();
        assert!(matches!(err, CodecError::InputNotFound(_)));
        assert_eq!(stages, vec![Stage::Starting]);
    }

    #[test]
    fn test_route_writes_output_and_reports_all_stages() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.png");
        fs::write(&input, vec![7u8; 1000]).unwrap();

        let mut router = CodecRouter::empty();
        router.register(HalvingHandler(Codec::Png));

        let options = CodecOptions {
            save: SaveOptions {
                mode: SaveMode::SaveAsNewFile,
                ..Default::default()
            },
            temp_dir: Some(dir.path().join("tmp").to_string_lossy().to_string()),
            ..Default::default()
        };
        let payload = CodecPayload::new("png", input.to_string_lossy()).with_options(options);

        let mut stages = Vec::new();
        let out = router.route(&payload, &mut |s| stages.push(s)).unwrap();

        assert_eq!(
            stages,
            vec![
                Stage::Starting,
                Stage::Reading,
                Stage::Processing,
                Stage::Writing,
                Stage::Completed
            ]
        );
        assert_eq!(out.input_size, 1000);
        assert_eq!(out.output_size, 500);
        assert_eq!(out.compress_rate, 50.0);
        assert!(out.available_compress_rate);
        assert!(out.output_path.ends_with("a_compressed.png"));
        assert_eq!(fs::read(&out.output_path).unwrap().len(), 500);
        assert_eq!(fs::read(&input).unwrap().len(), 1000);
        assert!(Path::new(&out.original_temp_path).exists());
        assert_eq!(out.hash.len(), 64);
    }

    #[test]
    fn test_rate_below_threshold_keeps_original() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("b.png");
        fs::write(&input, vec![1u8; 100]).unwrap();

        let mut router = CodecRouter::empty();
        router.register(GrowingHandler);

        let payload = CodecPayload::new("png", input.to_string_lossy())
            .with_output_path(dir.path().join("out.png").to_string_lossy());
        let out = router.route(&payload, &mut |_| {}).unwrap();

        assert!(!out.available_compress_rate);
        assert_eq!(out.compress_rate, 0.0);
        assert_eq!(out.output_size, 100);
        assert_eq!(fs::read(&out.output_path).unwrap(), vec![1u8; 100]);
        assert!(out.original_temp_path.is_empty());
    }

    #[test]
    fn test_overwrite_mode_replaces_input() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("c.png");
        fs::write(&input, vec![9u8; 64]).unwrap();

        let mut router = CodecRouter::empty();
        router.register(HalvingHandler(Codec::Png));

        let payload = CodecPayload::new("png", input.to_string_lossy());
        let out = router.route(&payload, &mut |_| {}).unwrap();
        assert_eq!(out.output_path, input.to_string_lossy());
        assert_eq!(fs::read(&input).unwrap().len(), 32);
    }

    #[test]
    fn test_jpg_alias_routes_to_jpeg_handler() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("d.jpg");
        fs::write(&input, vec![3u8; 10]).unwrap();

        let mut router = CodecRouter::empty();
        router.register(HalvingHandler(Codec::Jpeg));

        let payload = CodecPayload::new("jpg", input.to_string_lossy());
        assert!(router.route(&payload, &mut |_| {}).is_ok());
    }
}
