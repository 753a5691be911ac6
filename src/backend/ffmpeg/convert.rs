use super::video::copy_planes;
use crate::backend::FrameConverter;
use crate::core::{ColorInfo, ColorMatrix, DecoderError, PixelFormat, RawVideoFrame, Result, VideoFrame};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::{ffi, software, util};
use log::debug;

fn to_ffmpeg_pixel(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Rgba => Pixel::RGBA,
        PixelFormat::Bgra => Pixel::BGRA,
        PixelFormat::Rgb24 => Pixel::RGB24,
        PixelFormat::Bgr24 => Pixel::BGR24,
        PixelFormat::Yuv420p => Pixel::YUV420P,
        PixelFormat::Nv12 => Pixel::NV12,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScalerKey {
    src: PixelFormat,
    dst: PixelFormat,
    width: u32,
    height: u32,
    color: ColorInfo,
}

/// swscale 像素格式转换
///
/// 缩放器按 (源格式, 目标格式, 尺寸, 色彩描述) 缓存，任何一项变化时重建。
/// YCbCr 矩阵与范围取自帧本身。
#[derive(Default)]
pub struct FfmpegFrameConverter {
    scaler: Option<(software::scaling::Context, ScalerKey)>,
}

// SwsContext 不是 Send，转换器同一时刻只在一个线程中使用
unsafe impl Send for FfmpegFrameConverter {}

impl FfmpegFrameConverter {
    pub fn new() -> Self {
        Self::default()
    }

    fn scaler(&mut self, key: ScalerKey) -> Result<&mut software::scaling::Context> {
        if !matches!(&self.scaler, Some((_, k)) if *k == key) {
            debug!(
                "🔧 初始化像素转换: {} -> {} {}x{} ({:?}, {})",
                key.src,
                key.dst,
                key.width,
                key.height,
                key.color.matrix,
                if key.color.full_range { "全范围" } else { "有限范围" }
            );
            let mut scaler = software::scaling::Context::get(
                to_ffmpeg_pixel(key.src),
                key.width,
                key.height,
                to_ffmpeg_pixel(key.dst),
                key.width,
                key.height,
                software::scaling::Flags::BILINEAR,
            )?;
            if key.src.is_ycbcr() {
                apply_color_details(&mut scaler, key.color, key.dst.is_ycbcr());
            }
            self.scaler = Some((scaler, key));
        }
        self.scaler
            .as_mut()
            .map(|(scaler, _)| scaler)
            .ok_or_else(|| DecoderError::DecodeError("缩放器未初始化".to_string()))
    }
}

/// 设置源端 YCbCr 矩阵与范围；目标为 RGB 时输出全范围
fn apply_color_details(scaler: &mut software::scaling::Context, color: ColorInfo, dst_ycbcr: bool) {
    let colorspace = match color.matrix {
        ColorMatrix::Bt601 => ffi::SWS_CS_ITU601 as i32,
        ColorMatrix::Bt709 => ffi::SWS_CS_ITU709 as i32,
        ColorMatrix::Bt2020 => ffi::SWS_CS_BT2020 as i32,
    };
    let src_range = i32::from(color.full_range);
    unsafe {
        let src_table = ffi::sws_getCoefficients(colorspace);
        let (dst_table, dst_range) = if dst_ycbcr {
            (src_table, src_range)
        } else {
            (ffi::sws_getCoefficients(ffi::SWS_CS_DEFAULT as i32), 1)
        };
        let ret = ffi::sws_setColorspaceDetails(
            scaler.as_mut_ptr(),
            src_table,
            src_range,
            dst_table,
            dst_range,
            0,
            1 << 16,
            1 << 16,
        );
        if ret < 0 {
            debug!("sws_setColorspaceDetails 不支持该格式组合，使用默认系数");
        }
    }
}

/// 把紧凑平面复制进 FFmpeg 帧（按帧自己的 stride）
fn fill_frame(frame: &mut util::frame::Video, raw: &RawVideoFrame) {
    for (index, plane) in raw.planes.iter().enumerate().take(raw.format.plane_count()) {
        let stride = frame.stride(index);
        let row_size = plane.stride.min(stride);
        let dst = frame.data_mut(index);
        for (row, src) in plane.data.chunks_exact(plane.stride.max(1)).enumerate() {
            let offset = row * stride;
            if let Some(dst_row) = dst.get_mut(offset..offset + row_size) {
                dst_row.copy_from_slice(&src[..row_size]);
            }
        }
    }
}

impl FrameConverter for FfmpegFrameConverter {
    fn convert(&mut self, raw: &RawVideoFrame, target: PixelFormat) -> Result<VideoFrame> {
        if raw.planes.len() < raw.format.plane_count() {
            return Err(DecoderError::DecodeError(format!(
                "{} 帧缺少平面: {}/{}",
                raw.format,
                raw.planes.len(),
                raw.format.plane_count()
            )));
        }
        if raw.format == target {
            return Ok(VideoFrame {
                time: raw.time,
                width: raw.width,
                height: raw.height,
                format: target,
                planes: raw.planes.clone(),
            });
        }

        let key = ScalerKey {
            src: raw.format,
            dst: target,
            width: raw.width,
            height: raw.height,
            color: raw.color,
        };
        let mut input = util::frame::Video::new(to_ffmpeg_pixel(raw.format), raw.width, raw.height);
        fill_frame(&mut input, raw);

        let mut output = util::frame::Video::empty();
        self.scaler(key)?.run(&input, &mut output)?;

        Ok(VideoFrame {
            time: raw.time,
            width: raw.width,
            height: raw.height,
            format: target,
            planes: copy_planes(&output, target),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Plane;

    fn gray(y: u8, u: u8, v: u8, color: ColorInfo) -> RawVideoFrame {
        RawVideoFrame {
            pts: None,
            time: 0.25,
            width: 16,
            height: 16,
            format: PixelFormat::Yuv420p,
            color,
            planes: vec![
                Plane::new(vec![y; 16 * 16], 16),
                Plane::new(vec![u; 8 * 8], 8),
                Plane::new(vec![v; 8 * 8], 8),
            ],
        }
    }

    fn center(frame: &VideoFrame) -> [u8; 4] {
        let offset = 8 * frame.planes[0].stride + 8 * 4;
        let px = &frame.planes[0].data[offset..offset + 4];
        [px[0], px[1], px[2], px[3]]
    }

    fn close(a: u8, b: u8) -> bool {
        a.abs_diff(b) <= 3
    }

    #[test]
    fn test_range_comes_from_frame() {
        let mut converter = FfmpegFrameConverter::new();
        let limited = ColorInfo { matrix: ColorMatrix::Bt601, full_range: false };
        let full = ColorInfo { matrix: ColorMatrix::Bt601, full_range: true };

        let black = converter.convert(&gray(16, 128, 128, limited), PixelFormat::Rgba).unwrap();
        assert!(center(&black)[..3].iter().all(|&c| close(c, 0)), "{:?}", center(&black));
        assert_eq!(black.time, 0.25);

        // 全范围下 Y=16 不是黑色
        let dark = converter.convert(&gray(16, 128, 128, full), PixelFormat::Rgba).unwrap();
        assert!(center(&dark)[..3].iter().all(|&c| close(c, 16)), "{:?}", center(&dark));
    }

    #[test]
    fn test_matrix_comes_from_frame() {
        let mut converter = FfmpegFrameConverter::new();
        let bt601 = ColorInfo { matrix: ColorMatrix::Bt601, full_range: false };
        let bt709 = ColorInfo { matrix: ColorMatrix::Bt709, full_range: false };

        let a = center(&converter.convert(&gray(81, 90, 240, bt601), PixelFormat::Bgra).unwrap());
        let b = center(&converter.convert(&gray(81, 90, 240, bt709), PixelFormat::Bgra).unwrap());
        // 偏红色：两种矩阵下的绿色分量明显不同
        assert!(a[1].abs_diff(b[1]) > 8, "bt601 {:?} bt709 {:?}", a, b);
        assert_eq!(a[3], 255);
    }

    #[test]
    fn test_same_format_passes_through() {
        let mut converter = FfmpegFrameConverter::new();
        let raw = gray(50, 60, 70, ColorInfo::default());
        let out = converter.convert(&raw, PixelFormat::Yuv420p).unwrap();
        assert_eq!(out.planes, raw.planes);
    }
}
