//! 测试图案后端的像素格式转换
//!
//! 只覆盖虚拟解码器会输出的格式，YCbCr 一律按 BT.601 有限范围解释。

use crate::backend::FrameConverter;
use crate::core::{DecoderError, PixelFormat, Plane, RawVideoFrame, Result, VideoFrame};

/// 虚拟解码器配套的转换器（无状态）
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticFrameConverter;

impl FrameConverter for SyntheticFrameConverter {
    fn convert(&mut self, raw: &RawVideoFrame, target: PixelFormat) -> Result<VideoFrame> {
        if raw.planes.len() < raw.format.plane_count() {
            return Err(DecoderError::DecodeError(format!(
                "{} 帧缺少平面: {}/{}",
                raw.format,
                raw.planes.len(),
                raw.format.plane_count()
            )));
        }

        let planes = match (raw.format, target) {
            (src, dst) if src == dst => raw.planes.clone(),
            (PixelFormat::Nv12, PixelFormat::Yuv420p) => nv12_to_yuv420p(raw),
            (PixelFormat::Yuv420p | PixelFormat::Nv12, dst) if !dst.is_ycbcr() => vec![ycbcr_to_packed(raw, dst)],
            (src, dst) if !src.is_ycbcr() && !dst.is_ycbcr() => vec![swizzle_packed(raw, dst)],
            (src, dst) => {
                return Err(DecoderError::UnsupportedPixelFormat(format!("{} -> {}", src, dst)));
            }
        };

        Ok(VideoFrame {
            time: raw.time,
            width: raw.width,
            height: raw.height,
            format: target,
            planes,
        })
    }
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp_u8((298 * c + 409 * e + 128) >> 8),
        clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp_u8((298 * c + 516 * d + 128) >> 8),
    ]
}

#[inline]
fn put_pixel(out: &mut [u8], format: PixelFormat, [r, g, b]: [u8; 3]) {
    match format {
        PixelFormat::Rgba => out.copy_from_slice(&[r, g, b, 255]),
        PixelFormat::Bgra => out.copy_from_slice(&[b, g, r, 255]),
        PixelFormat::Rgb24 => out.copy_from_slice(&[r, g, b]),
        PixelFormat::Bgr24 => out.copy_from_slice(&[b, g, r]),
        PixelFormat::Yuv420p | PixelFormat::Nv12 => {}
    }
}

#[inline]
fn get_pixel(data: &[u8], format: PixelFormat) -> [u8; 3] {
    match format {
        PixelFormat::Rgba | PixelFormat::Rgb24 => [data[0], data[1], data[2]],
        PixelFormat::Bgra | PixelFormat::Bgr24 => [data[2], data[1], data[0]],
        PixelFormat::Yuv420p | PixelFormat::Nv12 => [0, 0, 0],
    }
}

/// 取第 row 行，平面数据不足时返回 None
fn plane_row(plane: &Plane, row: usize, len: usize) -> Option<&[u8]> {
    plane.data.get(row * plane.stride..row * plane.stride + len)
}

fn ycbcr_to_packed(raw: &RawVideoFrame, target: PixelFormat) -> Plane {
    let (w, h) = (raw.width as usize, raw.height as usize);
    let chroma_w = w.div_ceil(2);
    let bpp = target.bytes_per_pixel().unwrap_or(4);
    let stride = w * bpp;
    let mut out = vec![0u8; stride * h];

    for (row, dst) in out.chunks_exact_mut(stride).enumerate() {
        let Some(luma) = plane_row(&raw.planes[0], row, w) else {
            break;
        };
        let chroma: Vec<(u8, u8)> = match raw.format {
            PixelFormat::Nv12 => plane_row(&raw.planes[1], row / 2, chroma_w * 2)
                .map(|uv| uv.chunks_exact(2).map(|p| (p[0], p[1])).collect())
                .unwrap_or_default(),
            _ => match (
                plane_row(&raw.planes[1], row / 2, chroma_w),
                plane_row(&raw.planes[2], row / 2, chroma_w),
            ) {
                (Some(u), Some(v)) => u.iter().copied().zip(v.iter().copied()).collect(),
                _ => Vec::new(),
            },
        };
        for (col, (px, &y)) in dst.chunks_exact_mut(bpp).zip(luma).enumerate() {
            let (u, v) = chroma.get(col / 2).copied().unwrap_or((128, 128));
            put_pixel(px, target, yuv_to_rgb(y, u, v));
        }
    }
    Plane::new(out, stride)
}

fn nv12_to_yuv420p(raw: &RawVideoFrame) -> Vec<Plane> {
    let chroma_w = (raw.width as usize).div_ceil(2);
    let chroma_h = (raw.height as usize).div_ceil(2);
    let mut u = Vec::with_capacity(chroma_w * chroma_h);
    let mut v = Vec::with_capacity(chroma_w * chroma_h);
    for row in 0..chroma_h {
        match plane_row(&raw.planes[1], row, chroma_w * 2) {
            Some(uv) => {
                for pair in uv.chunks_exact(2) {
                    u.push(pair[0]);
                    v.push(pair[1]);
                }
            }
            None => {
                u.resize(u.len() + chroma_w, 128);
                v.resize(v.len() + chroma_w, 128);
            }
        }
    }
    vec![raw.planes[0].clone(), Plane::new(u, chroma_w), Plane::new(v, chroma_w)]
}

fn swizzle_packed(raw: &RawVideoFrame, target: PixelFormat) -> Plane {
    let (w, h) = (raw.width as usize, raw.height as usize);
    let src_bpp = raw.format.bytes_per_pixel().unwrap_or(4);
    let dst_bpp = target.bytes_per_pixel().unwrap_or(4);
    let stride = w * dst_bpp;
    let mut out = vec![0u8; stride * h];

    for (row, dst) in out.chunks_exact_mut(stride).enumerate() {
        let Some(src) = plane_row(&raw.planes[0], row, w * src_bpp) else {
            break;
        };
        for (d, s) in dst.chunks_exact_mut(dst_bpp).zip(src.chunks_exact(src_bpp)) {
            put_pixel(d, target, get_pixel(s, raw.format));
        }
    }
    Plane::new(out, stride)
}
