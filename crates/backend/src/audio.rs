//! Audio playback using cpal.
//!
//! This module provides output device enumeration and the cpal-backed
//! [`AudioOutput`], the production implementation of [`OutputSink`]. Mixed
//! mono f32 frames are pushed into a bounded FIFO that the device callback
//! drains.

use cpal::{
    Device, Host, SampleFormat, Stream, StreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{debug, error, info, warn};

use crate::mixer::OutputSink;

/// Output sample rate. Decoded speech is resampled to this rate.
pub const SAMPLE_RATE: u32 = 48000;

/// Number of output channels (mono for speech).
pub const CHANNELS: u16 = 1;

/// Mixing frame size in samples (20ms at 48kHz).
pub const FRAME_SIZE: usize = 960;

/// Maximum number of samples buffered for the device before dropping the
/// oldest ones (200ms at 48kHz).
pub const MAX_PLAYBACK_BUFFER_SAMPLES: usize = 9600;

/// Information about an output device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    /// Stable identifier for the device (the device name).
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

fn get_device_name(device: &Device) -> Option<String> {
    device
        .description()
        .map(|desc| desc.name().to_string())
        .ok()
}

/// Audio host handle used to find output devices.
pub struct AudioSystem {
    host: Host,
}

impl Default for AudioSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSystem {
    pub fn new() -> Self {
        let host = cpal::default_host();
        info!(host_id = ?host.id(), "audio: initialized audio host");
        Self { host }
    }

    /// List available output (speaker/headphone) devices.
    pub fn list_output_devices(&self) -> Vec<AudioDeviceInfo> {
        let default_name = self
            .host
            .default_output_device()
            .and_then(|d| get_device_name(&d));

        self.host
            .output_devices()
            .map(|devices| {
                devices
                    .filter_map(|device| {
                        let name = get_device_name(&device)?;
                        let is_default = default_name.as_ref() == Some(&name);
                        Some(AudioDeviceInfo {
                            id: name.clone(),
                            name,
                            is_default,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn default_output_device(&self) -> Option<Device> {
        self.host.default_output_device()
    }

    /// Get an output device by its ID (device name).
    pub fn get_output_device_by_id(&self, id: &str) -> Option<Device> {
        self.host
            .output_devices()
            .ok()?
            .find(|d| get_device_name(d).as_deref() == Some(id))
    }

    /// Open the selected device (or the default one) for playback.
    pub fn open_output(&self, device_id: Option<&str>) -> Result<AudioOutput, String> {
        let device = match device_id {
            Some(id) => self.get_output_device_by_id(id),
            None => self.default_output_device(),
        }
        .ok_or_else(|| "No output device available".to_string())?;

        AudioOutput::new(&device, &AudioConfig::default())
    }
}

#[derive(Clone, Debug)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            frame_size: FRAME_SIZE,
        }
    }
}

/// Preference score for a device sample format (higher is better).
fn sample_format_preference(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::F32 => 5,
        SampleFormat::I16 => 4,
        SampleFormat::I32 => 3,
        SampleFormat::U16 => 2,
        SampleFormat::U8 => 1,
        _ => 0,
    }
}

type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

/// Handle for audio output (speaker playback).
pub struct AudioOutput {
    _stream: Stream,
    /// Samples waiting for the device (front = oldest).
    playback_buffer: SampleQueue,
    max_buffer_size: usize,
    sample_rate: u32,
}

impl AudioOutput {
    /// Create and start an output stream on `device`.
    pub fn new(device: &Device, config: &AudioConfig) -> Result<Self, String> {
        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: config.sample_rate,
            buffer_size: cpal::BufferSize::Fixed(config.frame_size as u32),
        };

        let playback_buffer: SampleQueue =
            Arc::new(Mutex::new(VecDeque::with_capacity(config.frame_size * 10)));

        let supported = device
            .supported_output_configs()
            .map_err(|e| format!("Failed to get supported output configs: {}", e))?;

        let sample_format = supported
            .filter(|c| c.channels() == config.channels)
            .filter(|c| {
                c.min_sample_rate() <= config.sample_rate
                    && c.max_sample_rate() >= config.sample_rate
            })
            .max_by_key(|c| sample_format_preference(c.sample_format()))
            .map(|c| c.sample_format())
            .unwrap_or_else(|| {
                warn!("audio: no matching output format found, trying f32 default");
                SampleFormat::F32
            });
        debug!(sample_format = ?sample_format, "audio: using output format");

        let buffer = playback_buffer.clone();
        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(device, &stream_config, buffer),
            SampleFormat::I16 => build_stream::<i16>(device, &stream_config, buffer),
            SampleFormat::I32 => build_stream::<i32>(device, &stream_config, buffer),
            SampleFormat::U16 => build_stream::<u16>(device, &stream_config, buffer),
            SampleFormat::U8 => build_stream::<u8>(device, &stream_config, buffer),
            other => return Err(format!("Unsupported sample format: {:?}", other)),
        }?;

        stream
            .play()
            .map_err(|e| format!("Failed to start output stream: {}", e))?;
        info!("audio: output stream started");

        Ok(Self {
            _stream: stream,
            playback_buffer,
            max_buffer_size: MAX_PLAYBACK_BUFFER_SAMPLES,
            sample_rate: config.sample_rate,
        })
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    buffer: SampleQueue,
) -> Result<Stream, String>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut queue = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                // Silence on underrun.
                for sample in data.iter_mut() {
                    *sample = T::from_sample(queue.pop_front().unwrap_or(0.0));
                }
            },
            |err| error!("audio: output stream error: {}", err),
            None,
        )
        .map_err(|e| format!("Failed to build output stream: {}", e))
}

impl OutputSink for AudioOutput {
    fn queue_samples(&self, samples: &[f32]) {
        let mut buffer = self.playback_buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend(samples.iter().copied());

        if buffer.len() > self.max_buffer_size {
            let samples_to_drop = buffer.len() - self.max_buffer_size;
            buffer.drain(..samples_to_drop);
            debug!(
                dropped = samples_to_drop,
                buffer_size = buffer.len(),
                "audio: dropped old samples to maintain buffer limit"
            );
        }
    }

    fn buffered_samples(&self) -> usize {
        self.playback_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_preference_order() {
        let rank = sample_format_preference;
        assert!(rank(SampleFormat::F32) > rank(SampleFormat::I16));
        assert!(rank(SampleFormat::I16) > rank(SampleFormat::U8));
    }

    #[test]
    fn test_default_config_matches_mixer() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, SAMPLE_RATE);
        assert_eq!(config.frame_size, FRAME_SIZE);
        assert_eq!(config.channels, 1);
    }

    #[test]
    fn test_audio_system_lists_without_panicking() {
        let system = AudioSystem::new();
        let _outputs = system.list_output_devices();
    }
}
