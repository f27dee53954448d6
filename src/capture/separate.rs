//! Channel separation - interleaved color frames into per-component planes

use bytes::Bytes;
use thiserror::Error;

use crate::stream::frame::{ChannelId, Frame, PixelFormat};

/// Which component a plane carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneLabel {
    R,
    G,
    B,
    Nir,
}

impl PlaneLabel {
    pub fn file_stem(self) -> &'static str {
        match self {
            PlaneLabel::R => "r",
            PlaneLabel::G => "g",
            PlaneLabel::B => "b",
            PlaneLabel::Nir => "nir",
        }
    }
}

/// One extracted single-component plane, 8 bits per pixel, same
/// dimensions as its source frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub label: PlaneLabel,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

#[derive(Debug, Error)]
pub enum SeparateError {
    /// Guessing a pixel layout would corrupt every derived plane, so an
    /// unrecognized format refuses instead of approximating.
    #[error("unsupported pixel format {format:?} on {channel} channel")]
    UnsupportedPixelFormat {
        channel: ChannelId,
        format: PixelFormat,
    },
    #[error("{channel} frame is {actual} bytes, geometry says {expected}")]
    Truncated {
        channel: ChannelId,
        expected: usize,
        actual: usize,
    },
}

/// Split an interleaved color frame into R, G and B planes.
///
/// Pure: the same input produces bit-identical planes, and the source
/// frame is only read. Component `k` of an n-byte pixel is every n-th
/// byte offset by the format's component position.
pub fn split_rgb(frame: &Frame) -> Result<[Plane; 3], SeparateError> {
    let [r_off, g_off, b_off] =
        frame
            .format
            .rgb_offsets()
            .ok_or(SeparateError::UnsupportedPixelFormat {
                channel: frame.channel,
                format: frame.format,
            })?;
    check_len(frame)?;

    let step = frame.format.bytes_per_pixel();
    let pixels = frame.width as usize * frame.height as usize;
    let mut r = Vec::with_capacity(pixels);
    let mut g = Vec::with_capacity(pixels);
    let mut b = Vec::with_capacity(pixels);
    for pixel in frame.data.chunks_exact(step) {
        r.push(pixel[r_off]);
        g.push(pixel[g_off]);
        b.push(pixel[b_off]);
    }

    Ok([
        plane(PlaneLabel::R, frame, r),
        plane(PlaneLabel::G, frame, g),
        plane(PlaneLabel::B, frame, b),
    ])
}

/// NIR passes through as a single plane; the stream is monochrome
/// already and its bytes are shared, not copied.
pub fn nir_plane(frame: &Frame) -> Result<Plane, SeparateError> {
    if !frame.format.is_mono() {
        return Err(SeparateError::UnsupportedPixelFormat {
            channel: frame.channel,
            format: frame.format,
        });
    }
    check_len(frame)?;
    Ok(Plane {
        label: PlaneLabel::Nir,
        width: frame.width,
        height: frame.height,
        data: frame.data.clone(),
    })
}

/// Reinterleave R, G and B planes into packed RGB bytes; the inverse of
/// [`split_rgb`] for the `Rgb8` layout. Callers pass planes cut from one
/// frame, so the three lengths agree.
pub fn interleave_rgb(r: &Plane, g: &Plane, b: &Plane) -> Vec<u8> {
    let mut out = Vec::with_capacity(r.data.len() * 3);
    for ((rv, gv), bv) in r.data.iter().zip(g.data.iter()).zip(b.data.iter()) {
        out.push(*rv);
        out.push(*gv);
        out.push(*bv);
    }
    out
}

fn check_len(frame: &Frame) -> Result<(), SeparateError> {
    let expected = frame.expected_len();
    if frame.data.len() != expected {
        return Err(SeparateError::Truncated {
            channel: frame.channel,
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(())
}

fn plane(label: PlaneLabel, frame: &Frame, data: Vec<u8>) -> Plane {
    Plane {
        label,
        width: frame.width,
        height: frame.height,
        data: Bytes::from(data),
    }
}
