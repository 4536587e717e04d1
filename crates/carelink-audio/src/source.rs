use carelink_core::AudioError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat};

/// Mono frames handed out of the device callback, tagged with the device's
/// native sample rate.
pub type FrameCallback = Box<dyn FnMut(&[f32], u32) + Send + 'static>;

/// A live input stream. Dropping the handle stops capture and releases the
/// device.
pub trait SourceStream {}

/// Capability seam over the microphone so the pipeline can be driven by
/// deterministic fakes in tests.
pub trait AudioSource: Send + Sync {
    fn open(&self, on_frame: FrameCallback) -> Result<Box<dyn SourceStream>, AudioError>;
}

// ── CpalAudioSource ───────────────────────────────────────────

pub struct CpalAudioSource {
    device_name: String,
}

impl CpalAudioSource {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
        }
    }

    fn get_input_device(&self) -> Result<Device, AudioError> {
        let host = cpal::default_host();
        if self.device_name == "default" {
            return host
                .default_input_device()
                .ok_or_else(|| AudioError::DeviceNotFound("no default input device".to_string()));
        }

        let devices = host
            .input_devices()
            .map_err(|e| AudioError::DeviceEnumeration(e.to_string()))?;
        for device in devices {
            if device.name().map(|n| n == self.device_name).unwrap_or(false) {
                return Ok(device);
            }
        }
        Err(AudioError::DeviceNotFound(format!(
            "input device not found: {}",
            self.device_name
        )))
    }
}

struct CpalStream {
    _stream: cpal::Stream,
}

impl SourceStream for CpalStream {}

impl AudioSource for CpalAudioSource {
    fn open(&self, mut on_frame: FrameCallback) -> Result<Box<dyn SourceStream>, AudioError> {
        let device = self.get_input_device()?;
        let config = device
            .default_input_config()
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let sample_format = config.sample_format();
        let stream_config = config.config();

        tracing::info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate,
            channels,
            ?sample_format,
            "opening input device"
        );

        let err_callback = |err: cpal::StreamError| {
            tracing::error!("input stream error: {}", err);
        };

        let stream = match sample_format {
            SampleFormat::F32 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix_mono(data, channels);
                        on_frame(&mono, sample_rate);
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| AudioError::StreamBuild(e.to_string()))?,
            SampleFormat::I16 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let floats: Vec<f32> =
                            data.iter().map(|s| *s as f32 / 32_768.0).collect();
                        let mono = downmix_mono(&floats, channels);
                        on_frame(&mono, sample_rate);
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| AudioError::StreamBuild(e.to_string()))?,
            other => {
                return Err(AudioError::UnsupportedFormat(format!("{other:?}")));
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::StreamBuild(e.to_string()))?;

        Ok(Box::new(CpalStream { _stream: stream }))
    }
}

/// Average interleaved channels down to mono.
fn downmix_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
