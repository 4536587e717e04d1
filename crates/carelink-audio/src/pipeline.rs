use crate::resampler::Decimator;
use crate::source::{AudioSource, SourceStream};
use crate::TARGET_SAMPLE_RATE;
use carelink_core::{AudioError, PcmBuffer};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One live recording: the open device handle and the samples accumulated
/// so far, already resampled to the wire format.
struct RecordingSession {
    _stream: Box<dyn SourceStream>,
    samples: Arc<Mutex<Vec<i16>>>,
}

/// Owns the microphone between `start()` and `stop()`.
///
/// At most one session is alive per pipeline instance. A finished recording
/// is emitted exactly once over the completion sender, and only if at least
/// one sample was captured. Dropping the pipeline mid-capture behaves like
/// `stop()`.
pub struct AudioCapturePipeline {
    source: Box<dyn AudioSource>,
    completed_tx: mpsc::UnboundedSender<PcmBuffer>,
    session: Option<RecordingSession>,
}

impl AudioCapturePipeline {
    pub fn new(
        source: Box<dyn AudioSource>,
        completed_tx: mpsc::UnboundedSender<PcmBuffer>,
    ) -> Self {
        Self {
            source,
            completed_tx,
            session: None,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.session.is_some()
    }

    /// Open the device and begin accumulating. A no-op while already
    /// capturing. On failure the device is not held and the pipeline stays
    /// idle.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.session.is_some() {
            tracing::debug!("start() while capturing ignored");
            return Ok(());
        }

        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&samples);
        // The decimator is created on the first frame, once the device's
        // native rate is known.
        let mut decimator: Option<Decimator> = None;

        let stream = self.source.open(Box::new(move |frame, rate| {
            let decim =
                decimator.get_or_insert_with(|| Decimator::new(rate, TARGET_SAMPLE_RATE));
            let resampled = decim.resample(frame);
            if let Ok(mut buf) = sink.lock() {
                buf.extend_from_slice(&resampled);
            }
        }))?;

        self.session = Some(RecordingSession {
            _stream: stream,
            samples,
        });
        Ok(())
    }

    /// Release the device and emit the finished buffer, if any samples were
    /// captured. A no-op while idle.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        drop(session._stream);

        let samples = match session.samples.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(_) => {
                tracing::error!("capture buffer poisoned, recording discarded");
                return;
            }
        };
        if samples.is_empty() {
            tracing::debug!("recording ended with no captured samples");
            return;
        }

        tracing::info!(samples = samples.len(), "recording finished");
        let _ = self.completed_tx.send(PcmBuffer {
            samples,
            sample_rate: TARGET_SAMPLE_RATE,
        });
    }
}

impl Drop for AudioCapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
