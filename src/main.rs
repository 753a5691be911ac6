use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info, trace};
use myy_decode::backend::FfmpegBackend;
use myy_decode::{
    create_decoder, DecoderConfig, FrameAvailable, FrameStats, MediaContext, PlaybackClock, StreamSelect,
    VideoDecoder,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "myy_decode", version, about = "音视频解码管线命令行工具")]
struct Cli {
    /// 日志级别（RUST_LOG 优先）
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// JSON 解码器配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 打印媒体信息（JSON）
    Info {
        path: PathBuf,
    },
    /// 无界面播放，结束后打印帧统计
    Play(PlayArgs),
}

#[derive(Args, Debug)]
struct PlayArgs {
    path: PathBuf,

    /// 起始位置（秒）
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// 最多播放的时长（秒）
    #[arg(long)]
    duration: Option<f64>,

    /// 播放速率
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// 播放到末尾后重新开始的次数
    #[arg(long, default_value_t = 0)]
    loops: u32,

    /// 固定帧率（0 = 使用容器时间戳）
    #[arg(long)]
    fps: Option<f64>,

    /// 使用同步（单线程）解码器
    #[arg(long)]
    sync: bool,

    /// 尝试硬件解码
    #[arg(long)]
    hw: bool,

    /// 不解码音频
    #[arg(long)]
    no_sound: bool,

    /// 交付 YUV420P 而不是打包 RGB
    #[arg(long)]
    ycbcr: bool,

    #[arg(long)]
    volume: Option<f32>,

    /// 通过声卡播放声音（仅异步解码器）
    #[cfg(feature = "audio-output")]
    #[arg(long)]
    audio_device: bool,
}

#[derive(Serialize)]
struct PlaybackReport {
    new_frames: u64,
    stats: FrameStats,
    loops: u32,
    final_time: f64,
    wall_seconds: f64,
    eof: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str())).init();

    info!("🎬 myy_decode 启动");

    let mut config = match &cli.config {
        Some(path) => DecoderConfig::from_json_file(path).with_context(|| format!("加载配置失败: {}", path.display()))?,
        None => DecoderConfig::default(),
    };
    let ctx = MediaContext::new(Arc::new(FfmpegBackend::new()));

    match cli.command {
        Command::Info { path } => print_info(ctx, config, &path),
        Command::Play(args) => {
            apply_play_args(&mut config, &args);
            play(ctx, config, &args)
        }
    }
}

fn print_info(ctx: Arc<MediaContext>, config: DecoderConfig, path: &Path) -> Result<()> {
    let enable_sound = config.enable_sound;
    let use_hw = config.use_hw_accel;
    let mut decoder = create_decoder(ctx, config)?;
    decoder
        .open(path, use_hw, enable_sound)
        .with_context(|| format!("无法打开 {}", path.display()))?;
    let info = decoder.video_info()?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    decoder.close();
    Ok(())
}

fn apply_play_args(config: &mut DecoderConfig, args: &PlayArgs) {
    if args.sync {
        config.threaded = false;
    }
    if args.hw {
        config.use_hw_accel = true;
    }
    if args.no_sound {
        config.enable_sound = false;
    }
    if let Some(fps) = args.fps {
        config.fps = fps;
    }
}

fn play(ctx: Arc<MediaContext>, #[allow(unused_mut)] mut config: DecoderConfig, args: &PlayArgs) -> Result<()> {
    #[cfg(feature = "audio-output")]
    let mut output = if args.audio_device && config.enable_sound {
        if !config.threaded {
            log::warn!("⚠ 声卡输出需要异步解码器，已切换为多线程模式");
            config.threaded = true;
        }
        let output = myy_decode::output::AudioOutput::new(config.audio)?;
        config.audio = output.params();
        Some(output)
    } else {
        None
    };

    let audio_params = config.audio;
    let use_hw = config.use_hw_accel;
    let enable_sound = config.enable_sound;
    let mut decoder = create_decoder(ctx.clone(), config)?;
    decoder
        .open(&args.path, use_hw, enable_sound)
        .with_context(|| format!("无法打开 {}", args.path.display()))?;
    decoder.start_decoding(args.ycbcr, audio_params)?;
    if let Some(volume) = args.volume {
        decoder.set_volume(volume);
    }
    if args.start > 0.0 {
        decoder.seek(args.start)?;
    }

    #[cfg(feature = "audio-output")]
    let device_audio = match (output.as_mut(), decoder.audio_pull_handle()) {
        (Some(output), Some(handle)) => {
            output.start(handle)?;
            true
        }
        _ => false,
    };
    #[cfg(not(feature = "audio-output"))]
    let device_audio = false;

    let report = run_loop(decoder.as_mut(), args, audio_params.channels, audio_params.sample_rate, device_audio)?;

    #[cfg(feature = "audio-output")]
    if let Some(output) = output.as_mut() {
        output.stop();
    }
    decoder.close();
    debug!("存活解码器: {}", ctx.live_decoders());

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_loop(
    decoder: &mut dyn VideoDecoder,
    args: &PlayArgs,
    channels: u16,
    sample_rate: u32,
    device_audio: bool,
) -> Result<PlaybackReport> {
    let clock = PlaybackClock::new();
    clock.set_rate(args.speed);
    clock.set_time(args.start.max(0.0));
    clock.play();

    let wall_start = Instant::now();
    let tick = Duration::from_secs_f64((0.5 / decoder.fps().max(1.0)).clamp(0.001, 0.02));
    let pull_audio = decoder.has_audio() && !device_audio;
    let mut scratch = Vec::new();
    let mut last_pull = Instant::now();
    let mut new_frames = 0u64;
    let mut loops = 0u32;
    let mut played = 0.0;
    let mut segment_start = clock.now();

    loop {
        let now = clock.now();
        if let Some(limit) = args.duration {
            if played + (now - segment_start) >= limit {
                break;
            }
        }

        if decoder.has_video() {
            if let FrameAvailable::NewFrame(frame) = decoder.render_to_bmps(now)? {
                new_frames += 1;
                trace!("🖼 帧 {:.3}s ({}x{} {})", frame.time, frame.width, frame.height, frame.format);
            }
        }

        // 没有声卡时按墙钟速度丢弃音频，推动音频流前进
        if pull_audio {
            let elapsed = last_pull.elapsed().as_secs_f64() * args.speed;
            last_pull = Instant::now();
            let frames = (elapsed * sample_rate as f64) as usize;
            scratch.resize(frames * channels as usize, 0.0);
            decoder.fill_audio_buffer(&mut scratch);
        }

        if decoder.is_eof(StreamSelect::All) {
            if loops < args.loops {
                loops += 1;
                info!("🔁 第 {} 次循环", loops);
                played += now - segment_start;
                decoder.loop_to_start()?;
                clock.set_time(0.0);
                segment_start = 0.0;
                continue;
            }
            info!("📄 播放结束");
            break;
        }

        thread::sleep(tick);
    }

    Ok(PlaybackReport {
        new_frames,
        stats: decoder.frame_stats(),
        loops,
        final_time: decoder.cur_time(StreamSelect::All),
        wall_seconds: wall_start.elapsed().as_secs_f64(),
        eof: decoder.is_eof(StreamSelect::All),
    })
}
