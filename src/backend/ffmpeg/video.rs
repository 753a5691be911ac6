use super::convert::FfmpegFrameConverter;
use super::StreamClock;
use crate::backend::{FrameConverter, VideoCodec};
use crate::core::{ColorInfo, ColorMatrix, DecoderError, Packet, PixelFormat, Plane, RawVideoFrame, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::util::color;
use ffmpeg_next::{codec, ffi, format, software, util};
use log::{debug, info, warn};

/// 硬件加速类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HwAccelType {
    D3D11VA,
    DXVA2,
    VideoToolbox,
    VAAPI,
    CUDA,
}

impl HwAccelType {
    fn name(self) -> &'static str {
        match self {
            HwAccelType::D3D11VA => "D3D11VA",
            HwAccelType::DXVA2 => "DXVA2",
            HwAccelType::VideoToolbox => "VideoToolbox",
            HwAccelType::VAAPI => "VAAPI",
            HwAccelType::CUDA => "CUDA",
        }
    }

    fn to_ffmpeg(self) -> ffi::AVHWDeviceType {
        match self {
            HwAccelType::D3D11VA => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
            HwAccelType::DXVA2 => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2,
            HwAccelType::VideoToolbox => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
            HwAccelType::VAAPI => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
            HwAccelType::CUDA => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
        }
    }

    /// 当前平台按优先级排列的候选
    fn candidates() -> Vec<HwAccelType> {
        let mut available = Vec::new();
        #[cfg(target_os = "windows")]
        {
            available.push(HwAccelType::D3D11VA);
            available.push(HwAccelType::DXVA2);
        }
        #[cfg(target_os = "macos")]
        available.push(HwAccelType::VideoToolbox);
        #[cfg(target_os = "linux")]
        available.push(HwAccelType::VAAPI);
        available.push(HwAccelType::CUDA);
        available
    }
}

/// 解码器原生像素格式映射
///
/// 能直接交付的格式原样返回，其余格式由 swscale 转成 YUV420P；未知格式返回 None。
pub(super) fn map_pixel_format(pixel: Pixel) -> Option<PixelFormat> {
    match pixel {
        Pixel::None => None,
        other => Some(direct_format(other).unwrap_or(PixelFormat::Yuv420p)),
    }
}

fn direct_format(pixel: Pixel) -> Option<PixelFormat> {
    match pixel {
        Pixel::YUV420P | Pixel::YUVJ420P => Some(PixelFormat::Yuv420p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::RGBA => Some(PixelFormat::Rgba),
        Pixel::BGRA => Some(PixelFormat::Bgra),
        Pixel::RGB24 => Some(PixelFormat::Rgb24),
        Pixel::BGR24 => Some(PixelFormat::Bgr24),
        _ => None,
    }
}

/// FFmpeg 视频解码器（硬件加速可选）
pub struct FfmpegVideoCodec {
    decoder: codec::decoder::Video,
    clock: StreamClock,
    name: String,
    hw_type: Option<HwAccelType>,
    native: PixelFormat,
    /// (缩放器, 输入格式, 宽, 高)
    scaler: Option<(software::scaling::Context, (Pixel, u32, u32))>,
}

// SwsContext 本身不是 Send，但每个解码器实例只会在一个线程中使用
unsafe impl Send for FfmpegVideoCodec {}

impl FfmpegVideoCodec {
    /// 创建解码器，use_hw_accel 时依次尝试当前平台的硬件加速，全部失败则软件解码
    pub fn open(stream: &format::stream::Stream, clock: StreamClock, use_hw_accel: bool) -> Result<Self> {
        if use_hw_accel {
            for hw_type in HwAccelType::candidates() {
                match Self::open_with(stream, clock, Some(hw_type)) {
                    Ok(codec) => {
                        info!("✓ 使用硬件解码: {}", hw_type.name());
                        return Ok(codec);
                    }
                    Err(e) => debug!("✗ {} 初始化失败: {}", hw_type.name(), e),
                }
            }
            warn!("未检测到可用的硬件加速，使用软件解码");
        }
        Self::open_with(stream, clock, None)
    }

    fn open_with(stream: &format::stream::Stream, clock: StreamClock, hw_type: Option<HwAccelType>) -> Result<Self> {
        let parameters = stream.parameters();
        let name = parameters.id().name().to_string();
        let mut context = codec::context::Context::from_parameters(parameters)
            .map_err(|e| DecoderError::CodecInitError(format!("{}: {}", name, e)))?;

        unsafe {
            let codec_ctx = context.as_mut_ptr();
            if let Some(hw_type) = hw_type {
                let mut device: *mut ffi::AVBufferRef = std::ptr::null_mut();
                let ret = ffi::av_hwdevice_ctx_create(
                    &mut device,
                    hw_type.to_ffmpeg(),
                    std::ptr::null(),
                    std::ptr::null_mut(),
                    0,
                );
                if ret < 0 {
                    return Err(DecoderError::CodecInitError(format!(
                        "创建 {} 设备上下文失败: {}",
                        hw_type.name(),
                        ffmpeg::Error::from(ret)
                    )));
                }
                (*codec_ctx).hw_device_ctx = ffi::av_buffer_ref(device);
                ffi::av_buffer_unref(&mut device);
            }
            (*codec_ctx).thread_count = 4;
            (*codec_ctx).thread_type = (ffi::FF_THREAD_FRAME | ffi::FF_THREAD_SLICE) as i32;
        }

        let decoder = context
            .decoder()
            .video()
            .map_err(|e| DecoderError::CodecInitError(format!("{}: {}", name, e)))?;

        // 硬件帧传回内存后通常是 NV12
        let native = if hw_type.is_some() {
            PixelFormat::Nv12
        } else {
            map_pixel_format(decoder.format()).ok_or_else(|| DecoderError::UnsupportedPixelFormat(name.clone()))?
        };

        debug!(
            "视频解码器 {}: {}x{}, 格式: {:?} -> {}",
            name,
            decoder.width(),
            decoder.height(),
            decoder.format(),
            native
        );

        Ok(Self {
            decoder,
            clock,
            name,
            hw_type,
            native,
            scaler: None,
        })
    }

    fn receive_frames(&mut self) -> Vec<RawVideoFrame> {
        let mut frames = Vec::new();
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => match self.to_raw_frame(decoded) {
                    Ok(frame) => frames.push(frame),
                    Err(e) => warn!("帧转换失败（已跳过）: {}", e),
                },
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    warn!("解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        frames
    }

    fn to_raw_frame(&mut self, frame: util::frame::Video) -> Result<RawVideoFrame> {
        let frame = if is_hw_frame(&frame) { transfer_to_cpu(&frame)? } else { frame };
        let pts = frame.timestamp().map(|t| self.clock.to_seconds(t));
        let color = color_info(&frame);

        let (format, planes) = match direct_format(frame.format()) {
            Some(format) => (format, copy_planes(&frame, format)),
            None => {
                let converted = self.scale_to_yuv420p(&frame)?;
                (PixelFormat::Yuv420p, copy_planes(&converted, PixelFormat::Yuv420p))
            }
        };

        Ok(RawVideoFrame {
            pts,
            time: 0.0,
            width: frame.width(),
            height: frame.height(),
            format,
            color,
            planes,
        })
    }

    fn scale_to_yuv420p(&mut self, frame: &util::frame::Video) -> Result<util::frame::Video> {
        let key = (frame.format(), frame.width(), frame.height());
        if !matches!(&self.scaler, Some((_, k)) if *k == key) {
            debug!("🔧 初始化缩放器: {:?} {}x{} -> YUV420P", key.0, key.1, key.2);
            let scaler = software::scaling::Context::get(
                key.0,
                key.1,
                key.2,
                Pixel::YUV420P,
                key.1,
                key.2,
                software::scaling::Flags::BILINEAR,
            )?;
            self.scaler = Some((scaler, key));
        }
        let (scaler, _) = self
            .scaler
            .as_mut()
            .ok_or_else(|| DecoderError::DecodeError("缩放器未初始化".to_string()))?;
        let mut converted = util::frame::Video::empty();
        scaler.run(frame, &mut converted)?;
        Ok(converted)
    }
}

/// 帧的 YCbCr 矩阵与范围，未标注时按分辨率推断（高清 BT.709，标清 BT.601）
fn color_info(frame: &util::frame::Video) -> ColorInfo {
    let matrix = match frame.color_space() {
        color::Space::BT709 => ColorMatrix::Bt709,
        color::Space::BT2020NCL | color::Space::BT2020CL => ColorMatrix::Bt2020,
        color::Space::BT470BG | color::Space::SMPTE170M | color::Space::FCC => ColorMatrix::Bt601,
        _ if frame.height() >= 720 => ColorMatrix::Bt709,
        _ => ColorMatrix::Bt601,
    };
    let full_range = frame.color_range() == color::Range::JPEG || frame.format() == Pixel::YUVJ420P;
    ColorInfo { matrix, full_range }
}

fn is_hw_frame(frame: &util::frame::Video) -> bool {
    unsafe { !(*frame.as_ptr()).hw_frames_ctx.is_null() }
}

/// 将硬件帧传输到内存
fn transfer_to_cpu(hw_frame: &util::frame::Video) -> Result<util::frame::Video> {
    let mut frame = util::frame::Video::empty();
    unsafe {
        let ret = ffi::av_hwframe_transfer_data(frame.as_mut_ptr(), hw_frame.as_ptr(), 0);
        if ret < 0 {
            return Err(DecoderError::DecodeError(format!("硬件帧传输失败: {}", ffmpeg::Error::from(ret))));
        }
        ffi::av_frame_copy_props(frame.as_mut_ptr(), hw_frame.as_ptr());
    }
    Ok(frame)
}

/// 按行复制各平面到紧凑内存（stride = 行字节数）
pub(super) fn copy_planes(frame: &util::frame::Video, format: PixelFormat) -> Vec<Plane> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let chroma_w = width.div_ceil(2);
    let chroma_h = height.div_ceil(2);
    let layout = match format {
        PixelFormat::Yuv420p => vec![(width, height), (chroma_w, chroma_h), (chroma_w, chroma_h)],
        PixelFormat::Nv12 => vec![(width, height), (chroma_w * 2, chroma_h)],
        packed => vec![(width * packed.bytes_per_pixel().unwrap_or(4), height)],
    };

    layout
        .into_iter()
        .enumerate()
        .map(|(index, (row_size, rows))| {
            let stride = frame.stride(index);
            let src = frame.data(index);
            let mut data = Vec::with_capacity(row_size * rows);
            for y in 0..rows {
                let offset = y * stride;
                match src.get(offset..offset + row_size) {
                    Some(row) => data.extend_from_slice(row),
                    None => data.resize(data.len() + row_size, 0),
                }
            }
            Plane::new(data, row_size)
        })
        .collect()
}

impl VideoCodec for FfmpegVideoCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_hardware_accelerated(&self) -> bool {
        self.hw_type.is_some()
    }

    fn native_format(&self) -> PixelFormat {
        self.native
    }

    fn frame_converter(&self) -> Box<dyn FrameConverter> {
        Box::new(FfmpegFrameConverter::new())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<RawVideoFrame>> {
        let mut av_packet = ffmpeg::Packet::copy(&packet.data);
        av_packet.set_pts(packet.pts.map(|t| self.clock.to_timestamp(t)));
        av_packet.set_dts(packet.dts.map(|t| self.clock.to_timestamp(t)));
        if packet.keyframe {
            av_packet.set_flags(ffmpeg::packet::Flags::KEY);
        }

        match self.decoder.send_packet(&av_packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("视频解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                self.decoder.flush();
                return Ok(Vec::new());
            }
            Err(e) => return Err(DecoderError::DecodeError(e.to_string())),
        }
        Ok(self.receive_frames())
    }

    fn flush(&mut self) -> Result<Vec<RawVideoFrame>> {
        if let Err(e) = self.decoder.send_eof() {
            debug!("send_eof 失败: {}", e);
        }
        let frames = self.receive_frames();
        self.decoder.flush();
        Ok(frames)
    }

    fn reset(&mut self) {
        self.decoder.flush();
    }
}
