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
mod catalog;
mod config;
mod engine;
mod output;
mod playsync;
#[cfg(test)]
mod testutil;
mod voice;
mod volume;

use std::error::Error;
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use catalog::Catalog;
use config::EnvelopeConfig;
use engine::{EngineOptions, MAX_POLYPHONY};
use playsync::CancelHandle;
use voice::EndKind;
use volume::{FileBlockDevice, Volume};

/// Default output sample rate for the render and play commands.
const DEFAULT_OUTPUT_RATE: u32 = 44100;

#[derive(Parser)]
#[clap(
    version = crate_version!(),
    about = "A sample player that streams voices straight off a FAT32 image."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mounts the image and prints its geometry and a directory listing.
    Inspect {
        /// The path to the FAT32 image.
        image: String,
        /// The directory inside the image to list.
        #[arg(default_value = "/")]
        path: String,
    },
    /// Renders a note sequence offline and writes it to a WAV file.
    Render {
        /// The path to the FAT32 image.
        image: String,
        /// The instrument folder inside the image.
        folder: String,
        /// The output WAV path.
        #[arg(short, long, default_value = "out.wav")]
        out: String,
        /// Comma-separated MIDI notes, e.g. 60,64,67.
        #[arg(short, long, default_value = "60,64,67,72")]
        notes: String,
        /// Pitch bend in semitones, applied to the whole render.
        #[arg(long, default_value_t = 0.0)]
        bend: f32,
        /// Master gain.
        #[arg(long, default_value_t = 1.0)]
        gain: f32,
        /// Stereo balance, -1 (left) to 1 (right).
        #[arg(long, default_value_t = 0.0)]
        pan: f32,
        /// Envelope override as attack,decay,sustain,release.
        #[arg(long)]
        envelope: Option<String>,
        /// The output sample rate.
        #[arg(long, default_value_t = DEFAULT_OUTPUT_RATE)]
        sample_rate: u32,
    },
    /// Plays a short demo sequence through the default audio output.
    Play {
        /// The path to the FAT32 image.
        image: String,
        /// The instrument folder inside the image.
        folder: String,
        /// The output sample rate.
        #[arg(long, default_value_t = DEFAULT_OUTPUT_RATE)]
        sample_rate: u32,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { image, path } => inspect(&image, &path),
        Commands::Render {
            image,
            folder,
            out,
            notes,
            bend,
            gain,
            pan,
            envelope,
            sample_rate,
        } => render(
            &image,
            &folder,
            &out,
            &notes,
            bend,
            gain,
            pan,
            envelope.as_deref(),
            sample_rate,
        ),
        Commands::Play {
            image,
            folder,
            sample_rate,
        } => play(&image, &folder, sample_rate),
    }
}

fn mount(image: &str) -> Result<Volume<FileBlockDevice>, Box<dyn Error>> {
    let device = FileBlockDevice::open(image)?;
    Ok(Volume::mount(device)?)
}

fn inspect(image: &str, path: &str) -> Result<(), Box<dyn Error>> {
    let mut volume = mount(image)?;

    let geometry = volume.geometry();
    println!("Volume:");
    println!("- partition start:     sector {}", geometry.partition_start);
    println!("- sectors per cluster: {}", geometry.sectors_per_cluster);
    println!("- sectors per FAT:     {}", geometry.sectors_per_fat);
    println!("- FAT copies:          {}", geometry.fat_count);
    println!("- data start:          sector {}", geometry.data_start);
    println!("- total sectors:       {}", geometry.total_sectors);

    let entries = volume.read_dir(path)?;
    println!("\n{} (entries: {}):", path, entries.len());
    for entry in entries {
        if entry.is_dir {
            println!("- {}/", entry.name);
        } else {
            println!(
                "- {} ({} bytes, {} extents)",
                entry.name,
                entry.size,
                entry.extents.len()
            );
        }
    }
    Ok(())
}

/// Parses an `attack,decay,sustain,release` envelope argument.
fn parse_envelope(arg: &str) -> Result<EnvelopeConfig, Box<dyn Error>> {
    let parts: Vec<f32> = arg
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("malformed envelope: {}", arg))?;
    let &[attack_time, decay_time, sustain_level, release_time] = parts.as_slice() else {
        return Err(format!("expected four envelope values, got {}", parts.len()).into());
    };
    Ok(EnvelopeConfig {
        attack_time,
        decay_time,
        sustain_level,
        release_time,
    })
}

/// Seconds each rendered note is held before its release.
const RENDER_HOLD: f64 = 1.0;
/// Seconds between successive note starts.
const RENDER_SPACING: f64 = 0.5;
/// Seconds rendered past the last release so long tails can fade out.
const RENDER_TAIL: f64 = 3.0;

#[allow(clippy::too_many_arguments)]
fn render(
    image: &str,
    folder: &str,
    out: &str,
    notes: &str,
    bend: f32,
    gain: f32,
    pan: f32,
    envelope: Option<&str>,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let notes: Vec<u8> = notes
        .split(',')
        .map(|n| n.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("malformed note list: {}", notes))?;
    if notes.is_empty() {
        return Err("no notes to render".into());
    }
    let envelope = envelope.map(parse_envelope).transpose()?;

    let mut volume = mount(image)?;
    let catalog = Catalog::load_instrument(&mut volume, folder)?;
    let (sampler, mut renderer, mut feeder) = engine::build(
        volume,
        catalog,
        EngineOptions {
            output_rate: sample_rate,
            polyphony: MAX_POLYPHONY,
        },
    );
    sampler.set_pitch_bend(bend);
    sampler.set_master_gain(gain);
    sampler.set_pan(pan);
    sampler.set_envelope(envelope);

    // Note starts and ends in frames, kept sorted by construction.
    let starts: Vec<u64> = (0..notes.len())
        .map(|i| (i as f64 * RENDER_SPACING * sample_rate as f64) as u64)
        .collect();
    let total_frames = starts[starts.len() - 1]
        + ((RENDER_HOLD + RENDER_TAIL) * sample_rate as f64) as u64;
    let hold_frames = (RENDER_HOLD * sample_rate as f64) as u64;

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(out, spec)?;

    let mut block = [0.0f32; 512];
    let frames_per_block = block.len() as u64 / 2;
    let mut frame = 0u64;
    while frame < total_frames {
        for (i, &start) in starts.iter().enumerate() {
            if frame <= start && start < frame + frames_per_block {
                sampler.note_on(notes[i], 100);
            }
            let end = start + hold_frames;
            if frame <= end && end < frame + frames_per_block {
                sampler.note_off(notes[i], EndKind::Regular);
            }
        }

        renderer.render(&mut block);
        while feeder.service() {}

        for &sample in block.iter() {
            writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
        }
        frame += frames_per_block;
    }
    writer.finalize()?;

    info!(
        out,
        frames = total_frames,
        steals = sampler.steals(),
        dropped = sampler.dropped_notes(),
        starved = renderer.starved_frames(),
        "Render finished"
    );
    Ok(())
}

/// The demo sequence the play command runs: an arpeggio up and back down.
const DEMO_NOTES: [u8; 7] = [60, 64, 67, 72, 67, 64, 60];

fn play(image: &str, folder: &str, sample_rate: u32) -> Result<(), Box<dyn Error>> {
    let mut volume = mount(image)?;
    let catalog = Catalog::load_instrument(&mut volume, folder)?;
    let (sampler, renderer, feeder) = engine::build(
        volume,
        catalog,
        EngineOptions {
            output_rate: sample_rate,
            polyphony: MAX_POLYPHONY,
        },
    );

    let cancel_handle = CancelHandle::new();

    let feed_thread = {
        let cancel_handle = cancel_handle.clone();
        thread::spawn(move || feeder.run(cancel_handle))
    };

    let sequence_thread = {
        let cancel_handle = cancel_handle.clone();
        thread::spawn(move || {
            info!("Playing demo sequence");
            // Pedal down, so the arpeggio rings as a chord.
            sampler.set_sustain(true);
            for note in DEMO_NOTES {
                if cancel_handle.is_cancelled() {
                    return;
                }
                sampler.note_on(note, 100);
                thread::sleep(Duration::from_millis(400));
                sampler.note_off(note, EndKind::Regular);
            }
            sampler.set_sustain(false);
            info!(
                active = sampler.shared().active_voices(),
                "Sequence done, letting tails ring"
            );
            // Leave room for release tails before shutting down.
            thread::sleep(Duration::from_secs(4));
            cancel_handle.cancel();
        })
    };

    let result = output::run(renderer, sample_rate, cancel_handle.clone());
    cancel_handle.cancel();
    let _ = sequence_thread.join();
    let _ = feed_thread.join();
    result?;
    Ok(())
}
