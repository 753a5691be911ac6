mod common;

use common::{config, context, init_logger, start, variant_name, VARIANTS};
use myy_decode::backend::{SyntheticAudio, SyntheticMedia, SyntheticVideo};
use myy_decode::{create_decoder, AudioParams, DecoderConfig, DecoderError, DecoderState, StreamSelect};
use std::path::Path;

fn av_media() -> SyntheticMedia {
    SyntheticMedia::new()
        .with_video(SyntheticVideo::new(25.0, 4.0))
        .with_audio(SyntheticAudio::new(48000, 2, 4.0))
}

#[test]
fn test_close_is_idempotent() {
    init_logger();
    for threaded in VARIANTS {
        let ctx = context(vec![("av.synth", av_media())]);

        let mut never_opened = create_decoder(ctx.clone(), config(threaded)).unwrap();
        never_opened.close();
        never_opened.close();
        assert_eq!(never_opened.state(), DecoderState::Closed);

        let mut decoder = start(&ctx, config(threaded), "av.synth", false);
        decoder.render_to_bmps(0.0).unwrap();
        decoder.close();
        decoder.close();
        assert_eq!(decoder.state(), DecoderState::Closed);
        assert_eq!(ctx.live_decoders(), 0, "{}", variant_name(threaded));
    }
}

#[test]
fn test_close_with_full_queues_does_not_hang() {
    init_logger();
    for threaded in VARIANTS {
        let ctx = context(vec![("av.synth", av_media())]);
        let decoder = start(&ctx, config(threaded), "av.synth", false);
        // 给解码线程时间把所有队列塞满
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(decoder);
        assert_eq!(ctx.live_decoders(), 0);
    }
}

#[test]
fn test_live_decoder_count_tracks_open_instances() {
    init_logger();
    let ctx = context(vec![("a.synth", av_media()), ("b.synth", av_media())]);
    let first = start(&ctx, config(true), "a.synth", false);
    let mut second = start(&ctx, config(false), "b.synth", false);
    assert_eq!(ctx.live_decoders(), 2);
    second.close();
    assert_eq!(ctx.live_decoders(), 1);
    drop(first);
    assert_eq!(ctx.live_decoders(), 0);
}

#[test]
fn test_calls_in_wrong_state_are_rejected() {
    init_logger();
    for threaded in VARIANTS {
        let ctx = context(vec![("av.synth", av_media())]);
        let mut decoder = create_decoder(ctx.clone(), config(threaded)).unwrap();

        assert!(matches!(decoder.render_to_bmps(0.0), Err(DecoderError::InvalidState { .. })));
        assert!(matches!(decoder.seek(1.0), Err(DecoderError::InvalidState { .. })));
        assert!(matches!(
            decoder.start_decoding(false, AudioParams::default()),
            Err(DecoderError::InvalidState { .. })
        ));
        assert!(decoder.video_info().is_err());

        decoder.open(Path::new("av.synth"), false, true).unwrap();
        assert_eq!(decoder.state(), DecoderState::Opened);
        assert!(matches!(
            decoder.open(Path::new("av.synth"), false, true),
            Err(DecoderError::InvalidState { .. })
        ));
        assert!(matches!(decoder.throw_away_frame(0.0), Err(DecoderError::InvalidState { .. })));
        assert!(matches!(decoder.seek(1.0), Err(DecoderError::InvalidState { .. })));

        decoder.start_decoding(false, AudioParams::default()).unwrap();
        assert_eq!(decoder.state(), DecoderState::Decoding);
        assert!(matches!(
            decoder.start_decoding(false, AudioParams::default()),
            Err(DecoderError::InvalidState { .. })
        ));
        decoder.close();

        // 关闭之后可以重新打开
        decoder.open(Path::new("av.synth"), false, true).unwrap();
        decoder.start_decoding(false, AudioParams::default()).unwrap();
        assert!(decoder.render_to_bmps(0.0).unwrap().is_new_frame());
    }
}

#[test]
fn test_failed_open_leaves_decoder_closed() {
    init_logger();
    for threaded in VARIANTS {
        let ctx = context(vec![
            ("data.synth", SyntheticMedia::new().with_data_stream()),
            ("broken.synth", SyntheticMedia::new().unrecognized()),
        ]);
        let mut decoder = create_decoder(ctx.clone(), config(threaded)).unwrap();

        assert!(matches!(
            decoder.open(Path::new("missing.synth"), false, true),
            Err(DecoderError::OpenError { .. })
        ));
        assert!(matches!(
            decoder.open(Path::new("broken.synth"), false, true),
            Err(DecoderError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            decoder.open(Path::new("data.synth"), false, true),
            Err(DecoderError::NoDecodableStream)
        ));
        assert_eq!(decoder.state(), DecoderState::Closed);
        assert_eq!(ctx.live_decoders(), 0);
    }
}

#[test]
fn test_video_info_after_open() {
    init_logger();
    for threaded in VARIANTS {
        let ctx = context(vec![(
            "av.synth",
            SyntheticMedia::new()
                .with_video(SyntheticVideo::new(30.0, 2.0).with_size(64, 36).with_hw_accel())
                .with_audio(SyntheticAudio::new(44100, 1, 2.0)),
        )]);
        let mut decoder = create_decoder(ctx.clone(), config(threaded)).unwrap();
        decoder.open(Path::new("av.synth"), true, true).unwrap();

        let info = decoder.video_info().unwrap();
        assert!(info.has_video && info.has_audio);
        assert!(info.hw_accelerated);
        assert_eq!((info.width, info.height), (64, 36));
        assert_eq!(decoder.size(), (64, 36));
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 1);
        assert!((info.duration - 2.0).abs() < 1e-9);
        assert_eq!(decoder.nominal_fps(), 30.0);
        assert_eq!(decoder.pixel_format(), None);

        decoder.start_decoding(true, AudioParams::default()).unwrap();
        assert_eq!(decoder.pixel_format(), Some(myy_decode::PixelFormat::Yuv420p));
    }
}

#[test]
fn test_sound_disabled_ignores_audio_stream() {
    init_logger();
    for threaded in VARIANTS {
        let ctx = context(vec![("av.synth", av_media())]);
        let mut decoder = create_decoder(ctx.clone(), config(threaded)).unwrap();
        decoder.open(Path::new("av.synth"), false, false).unwrap();
        assert!(!decoder.has_audio());
        decoder.start_decoding(false, AudioParams::default()).unwrap();
        assert!(decoder.is_eof(StreamSelect::Audio));
        let mut buffer = [1.0f32; 64];
        assert_eq!(decoder.fill_audio_buffer(&mut buffer), 0);
    }
}

#[test]
fn test_set_fps_validation() {
    init_logger();
    for threaded in VARIANTS {
        let ctx = context(vec![("av.synth", av_media())]);
        let mut decoder = start(&ctx, config(threaded), "av.synth", false);
        assert_eq!(decoder.fps(), 25.0);

        assert!(matches!(decoder.set_fps(-1.0), Err(DecoderError::InvalidFps(_))));
        assert!(decoder.set_fps(f64::NAN).is_err());
        assert!(decoder.set_fps(f64::INFINITY).is_err());
        assert_eq!(decoder.fps(), 25.0);

        decoder.set_fps(60.0).unwrap();
        assert_eq!(decoder.fps(), 60.0);
        decoder.set_fps(0.0).unwrap();
        assert_eq!(decoder.fps(), 25.0);
    }
}

#[test]
fn test_invalid_config_rejected() {
    init_logger();
    let ctx = context(vec![]);
    let bad_queue = DecoderConfig {
        video_queue_capacity: 0,
        ..Default::default()
    };
    assert!(matches!(create_decoder(ctx.clone(), bad_queue), Err(DecoderError::ConfigError(_))));
    let bad_fps = DecoderConfig {
        fps: -25.0,
        ..Default::default()
    };
    assert!(create_decoder(ctx.clone(), bad_fps).is_err());
    let bad_format = DecoderConfig {
        packed_format: myy_decode::PixelFormat::Nv12,
        ..Default::default()
    };
    assert!(create_decoder(ctx, bad_format).is_err());
}

#[test]
fn test_failing_codec_surfaces_from_open() {
    init_logger();
    for threaded in VARIANTS {
        let ctx = context(vec![(
            "bad.synth",
            SyntheticMedia::new().with_audio(SyntheticAudio::new(48000, 2, 1.0).with_failing_codec()),
        )]);
        let mut decoder = create_decoder(ctx.clone(), config(threaded)).unwrap();
        assert!(matches!(
            decoder.open(Path::new("bad.synth"), false, true),
            Err(DecoderError::CodecInitError(_))
        ));
        assert_eq!(decoder.state(), DecoderState::Closed);
    }
}

#[test]
fn test_seek_clamps_negative_time() {
    init_logger();
    for threaded in VARIANTS {
        let ctx = context(vec![("av.synth", av_media())]);
        let mut decoder = start(&ctx, config(threaded), "av.synth", false);
        decoder.seek(-3.0).unwrap();
        assert_eq!(decoder.cur_time(StreamSelect::Video), 0.0);
        match decoder.render_to_bmps(0.0).unwrap() {
            myy_decode::FrameAvailable::NewFrame(frame) => assert_eq!(frame.time, 0.0),
            myy_decode::FrameAvailable::UseLastFrame => panic!("{}: no frame at 0", variant_name(threaded)),
        }
    }
}
