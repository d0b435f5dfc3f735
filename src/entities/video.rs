//! Video source loading.
//!
//! Two inputs are understood:
//! - a directory of numbered stills (`00.png`, `01.png`, ...) played in numeric order
//! - a container file decoded with FFmpeg (`video` feature)
//!
//! Every frame is decoded up front and resized to the target size so that a
//! tick only clones an `Arc`.

use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use super::frame::{Frame, FrameError};
use super::transform;
use crate::core::player::VideoSource;

/// Upper bound on decoded frames held in memory per source
pub const MAX_FRAMES: usize = 3000;

const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif"];
const VIDEO_EXTS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];

pub fn is_image_file(path: &Path) -> bool {
    has_ext(path, IMAGE_EXTS)
}

pub fn is_video_file(path: &Path) -> bool {
    has_ext(path, VIDEO_EXTS)
}

fn has_ext(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Image files in `dir` whose stem is a plain number, sorted by that number
pub fn numbered_images(dir: &Path) -> Vec<(u32, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<(u32, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_image_file(p))
        .filter_map(|p| {
            let n = p.file_stem()?.to_str()?.parse::<u32>().ok()?;
            Some((n, p))
        })
        .collect();
    found.sort_by_key(|(n, _)| *n);
    found
}

/// First video container in `dir`, by file name
pub fn find_video(dir: &Path) -> Option<PathBuf> {
    let mut videos: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_video_file(p))
        .collect();
    videos.sort();
    videos.into_iter().next()
}

/// Dispatch on path kind: directory -> numbered stills, otherwise a container file
pub fn load_source(path: &Path, target: (u32, u32), fps: f32) -> Result<VideoSource, FrameError> {
    if path.is_dir() {
        return load_sequence(path, target, fps);
    }
    if !path.exists() {
        return Err(FrameError::Io(format!("Not found: {}", path.display())));
    }
    if is_image_file(path) {
        let frame = transform::resize(&Frame::open(path)?, target.0, target.1);
        return Ok(VideoSource::from_frames(vec![frame], fps));
    }
    load_video(path, target)
}

/// Numbered stills from `dir`, resized to `target`
pub fn load_sequence(dir: &Path, target: (u32, u32), fps: f32) -> Result<VideoSource, FrameError> {
    let files = numbered_images(dir);
    if files.is_empty() {
        return Err(FrameError::LoadError(format!(
            "No numbered frames in {}",
            dir.display()
        )));
    }
    if files.len() > MAX_FRAMES {
        warn!(
            "{} has {} frames, keeping the first {}",
            dir.display(),
            files.len(),
            MAX_FRAMES
        );
    }

    let mut frames = Vec::with_capacity(files.len().min(MAX_FRAMES));
    for (_, path) in files.iter().take(MAX_FRAMES) {
        let frame = Frame::open(path)?;
        frames.push(transform::resize(&frame, target.0, target.1));
    }
    info!(
        "Loaded {} frames from {} at {}x{}",
        frames.len(),
        dir.display(),
        target.0,
        target.1
    );
    Ok(VideoSource::from_frames(frames, fps))
}

#[cfg(not(feature = "video"))]
pub fn load_video(path: &Path, _target: (u32, u32)) -> Result<VideoSource, FrameError> {
    debug!("Video decoding disabled, refusing {}", path.display());
    Err(FrameError::LoadError(format!(
        "Video decoding not available (built without `video` feature): {}",
        path.display()
    )))
}

/// Decode every frame of `path`, scaled to `target`. Source fps is kept.
#[cfg(feature = "video")]
pub fn load_video(path: &Path, target: (u32, u32)) -> Result<VideoSource, FrameError> {
    use playa_ffmpeg as ffmpeg;

    init_ffmpeg();

    let mut ictx = ffmpeg::format::input(path)
        .map_err(|e| FrameError::LoadError(format!("Failed to open video: {}", e)))?;

    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| FrameError::LoadError("No video stream found".to_string()))?;
    let stream_idx = stream.index();

    let rate = stream.avg_frame_rate();
    let fps = if rate.numerator() > 0 && rate.denominator() > 0 {
        rate.numerator() as f32 / rate.denominator() as f32
    } else {
        crate::core::player::DEFAULT_FPS
    };

    let decoder_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| FrameError::LoadError(format!("Failed to create decoder context: {}", e)))?;
    let mut decoder = decoder_ctx
        .decoder()
        .video()
        .map_err(|e| FrameError::LoadError(format!("Failed to create video decoder: {}", e)))?;

    let (tw, th) = (target.0.max(1), target.1.max(1));
    let mut scaler = ffmpeg::software::scaling::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::format::Pixel::RGBA,
        tw,
        th,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| FrameError::LoadError(format!("Failed to create scaler: {}", e)))?;

    let mut frames = Vec::new();
    let mut drain = |decoder: &mut ffmpeg::decoder::Video,
                     frames: &mut Vec<Frame>|
     -> Result<(), FrameError> {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        while frames.len() < MAX_FRAMES && decoder.receive_frame(&mut decoded).is_ok() {
            let mut rgba = ffmpeg::util::frame::video::Video::empty();
            scaler
                .run(&decoded, &mut rgba)
                .map_err(|e| FrameError::LoadError(format!("Failed to scale frame: {}", e)))?;
            frames.push(frame_from_rgba(&rgba, tw, th)?);
        }
        Ok(())
    };

    for (stream, packet) in ictx.packets() {
        if stream.index() != stream_idx {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(|e| FrameError::LoadError(format!("Failed to send packet: {}", e)))?;
        drain(&mut decoder, &mut frames)?;
        if frames.len() >= MAX_FRAMES {
            warn!("{} truncated at {} frames", path.display(), MAX_FRAMES);
            break;
        }
    }
    if decoder.send_eof().is_ok() {
        drain(&mut decoder, &mut frames)?;
    }

    if frames.is_empty() {
        return Err(FrameError::LoadError(format!(
            "No frames decoded from {}",
            path.display()
        )));
    }
    info!(
        "Decoded {} frames from {} ({:.2} fps) at {}x{}",
        frames.len(),
        path.display(),
        fps,
        tw,
        th
    );
    Ok(VideoSource::from_frames(frames, fps))
}

#[cfg(feature = "video")]
fn init_ffmpeg() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if let Err(e) = playa_ffmpeg::init() {
            warn!("FFmpeg init failed: {}", e);
        }
        unsafe {
            playa_ffmpeg::ffi::av_log_set_level(playa_ffmpeg::ffi::AV_LOG_QUIET);
        }
    });
}

/// Copy a strided RGBA plane into a tightly packed frame
#[cfg(feature = "video")]
fn frame_from_rgba(
    rgba: &playa_ffmpeg::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Result<Frame, FrameError> {
    let data = rgba.data(0);
    let stride = rgba.stride(0);
    let row_bytes = width as usize * 4;
    let mut out = vec![0u8; row_bytes * height as usize];
    for y in 0..height as usize {
        let src = y * stride;
        out[y * row_bytes..(y + 1) * row_bytes].copy_from_slice(&data[src..src + row_bytes]);
    }
    Frame::from_rgba(width, height, out)
}
