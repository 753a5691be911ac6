// 音频输出（cpal），回调线程通过 AudioPullHandle 向解码器拉取采样

mod audio_output;

pub use audio_output::AudioOutput;
