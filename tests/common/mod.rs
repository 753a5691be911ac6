#![allow(dead_code)]

use myy_decode::backend::{SyntheticBackend, SyntheticMedia};
use myy_decode::{create_decoder, AudioParams, DecoderConfig, MediaContext, VideoDecoder};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 同步 / 异步两种解码器
pub const VARIANTS: [bool; 2] = [false, true];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn context(files: Vec<(&str, SyntheticMedia)>) -> Arc<MediaContext> {
    let backend = SyntheticBackend::new();
    for (path, media) in files {
        backend.add_media(path, media);
    }
    MediaContext::new(Arc::new(backend))
}

pub fn config(threaded: bool) -> DecoderConfig {
    DecoderConfig {
        threaded,
        render_timeout_ms: 5000,
        ..Default::default()
    }
}

pub fn variant_name(threaded: bool) -> &'static str {
    if threaded {
        "async"
    } else {
        "sync"
    }
}

/// 打开并开始解码
pub fn start(ctx: &Arc<MediaContext>, config: DecoderConfig, path: &str, want_ycbcr: bool) -> Box<dyn VideoDecoder> {
    let mut decoder = create_decoder(ctx.clone(), config).expect("create decoder");
    decoder.open(Path::new(path), false, true).expect("open");
    decoder.start_decoding(want_ycbcr, AudioParams::default()).expect("start decoding");
    decoder
}

/// 反复拉取音频，直到拿到至少 `frames` 帧或超时；返回实际拉到的帧数和最后一块数据
pub fn pull_audio(decoder: &mut dyn VideoDecoder, frames: usize, chunk: usize) -> (usize, Vec<f32>) {
    let channels = AudioParams::default().channels as usize;
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut buffer = vec![0.0; chunk * channels];
    let mut last = Vec::new();
    let mut total = 0;
    while total < frames && Instant::now() < deadline {
        let n = decoder.fill_audio_buffer(&mut buffer);
        if n == 0 {
            if decoder.is_eof(myy_decode::StreamSelect::Audio) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }
        total += n;
        last = buffer[..n * channels].to_vec();
    }
    (total, last)
}
