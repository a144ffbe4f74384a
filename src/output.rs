// Copyright (C) 2026 the sdsampler authors
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Real-time audio output.
//!
//! Runs the [`Renderer`] inside a cpal output stream callback. The callback
//! thread gets elevated scheduling on its first invocation; everything it
//! touches is lock-free, so storage and control latency never reach it.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{error, info, warn};

use crate::engine::Renderer;
use crate::playsync::CancelHandle;

/// Priority for the audio callback thread when SDSAMPLER_THREAD_PRIORITY is
/// unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no default output device")]
    NoDevice,
    #[error("unsupported output sample format {0}")]
    UnsupportedFormat(cpal::SampleFormat),
    #[error(transparent)]
    DeviceName(#[from] cpal::DeviceNameError),
    #[error(transparent)]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error(transparent)]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error(transparent)]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Reads SDSAMPLER_THREAD_PRIORITY (0-99) once; used when building the
/// callback so we don't touch env in the hot path.
fn callback_thread_priority() -> ThreadPriorityValue {
    std::env::var("SDSAMPLER_THREAD_PRIORITY")
        .ok()
        .and_then(|v| {
            let n = v.parse::<u8>().ok()?;
            (n < 100).then(|| ThreadPriorityValue::try_from(n).ok())?
        })
        .unwrap_or_else(|| ThreadPriorityValue::try_from(DEFAULT_CALLBACK_THREAD_PRIORITY).unwrap())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Whether to attempt RT (SCHED_FIFO) scheduling for the audio callback
/// thread. Default: enabled. Opt out with SDSAMPLER_DISABLE_RT_AUDIO=1.
fn rt_audio_enabled() -> bool {
    !env_flag("SDSAMPLER_DISABLE_RT_AUDIO")
}

fn configure_audio_thread_priority(
    priority: ThreadPriorityValue,
    rt_audio: bool,
    priority_set: &mut bool,
) {
    if *priority_set {
        return;
    }
    let tp = ThreadPriority::Crossplatform(priority);
    let _ = set_current_thread_priority(tp);

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => {
                info!("Enabled RT SCHED_FIFO for audio callback thread");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to set RT SCHED_FIFO for audio callback thread"
                );
            }
        }
    }

    *priority_set = true;
}

/// Runs the renderer against the default output device until cancelled.
/// Takes ownership of the renderer; it lives inside the stream callback.
pub fn run(mut renderer: Renderer, output_rate: u32, cancel_handle: CancelHandle) -> Result<(), OutputError> {
    // Suppress noisy backend output while probing devices.
    let device = {
        let _shh_stdout = shh::stdout();
        let _shh_stderr = shh::stderr();
        cpal::default_host()
            .default_output_device()
            .ok_or(OutputError::NoDevice)?
    };
    let supported = device.default_output_config()?;

    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: output_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    info!(
        device = device.name()?,
        sample_rate = output_rate,
        format = %supported.sample_format(),
        "Opening output stream"
    );

    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
                renderer.render(data);
            },
            |err| error!("Output stream error: {}", err),
            None,
        )?,
        cpal::SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
                    scratch.resize(data.len(), 0.0);
                    renderer.render(&mut scratch);
                    for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                        *dst = cpal::Sample::from_sample(src);
                    }
                },
                |err| error!("Output stream error: {}", err),
                None,
            )?
        }
        other => return Err(OutputError::UnsupportedFormat(other)),
    };

    stream.play()?;
    cancel_handle.wait();
    Ok(())
}
