use std::{
    fs::OpenOptions,
    io::{self, BufWriter, Write},
    sync::Arc,
    time::Duration,
};

use byteorder::{LittleEndian, WriteBytesExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    clock::AudioClock,
    constants::{INT16_MAX_F, INT16_MIN_F, RENDER_QUANTUM_FRAMES},
    graph::RenderGraph,
};
use crate::{
    common::types::Shared,
    configs::{OutputConfig, OutputSinkKind},
};

/// Destination for rendered interleaved blocks.
pub trait AudioSink: Send {
    fn write_block(&mut self, block: &[f32]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Discards audio. Metering taps still observe every block.
#[derive(Debug, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write_block(&mut self, _block: &[f32]) -> io::Result<()> {
        Ok(())
    }
}

/// Writes signed 16-bit little-endian PCM to any writer.
pub struct PcmWriterSink<W: Write + Send> {
    writer: W,
    scratch: Vec<u8>,
}

impl<W: Write + Send> PcmWriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            scratch: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> AudioSink for PcmWriterSink<W> {
    fn write_block(&mut self, block: &[f32]) -> io::Result<()> {
        self.scratch.clear();
        self.scratch.reserve(block.len() * 2);
        for &sample in block {
            let value = (sample * INT16_MAX_F).clamp(INT16_MIN_F, INT16_MAX_F) as i16;
            self.scratch.write_i16::<LittleEndian>(value)?;
        }
        self.writer.write_all(&self.scratch)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Build the sink selected by `[output]`.
pub fn open_sink(config: &OutputConfig) -> io::Result<Box<dyn AudioSink>> {
    match config.sink {
        OutputSinkKind::Null => Ok(Box::new(NullSink)),
        OutputSinkKind::Stdout => Ok(Box::new(PcmWriterSink::new(BufWriter::new(io::stdout())))),
        OutputSinkKind::File => {
            let path = config.path.as_deref().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "output.sink = \"file\" requires output.path",
                )
            })?;
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            info!("Writing s16le audio to {}", path);
            Ok(Box::new(PcmWriterSink::new(BufWriter::new(file))))
        }
    }
}

/// Pulls quanta from the render graph in step with the audio clock.
pub struct OutputDriver {
    graph: Shared<RenderGraph>,
    clock: Arc<dyn AudioClock>,
    sink: Box<dyn AudioSink>,
    latency: f64,
    tick: Duration,
    origin: f64,
    rendered_frames: u64,
}

impl OutputDriver {
    pub fn new(
        graph: Shared<RenderGraph>,
        clock: Arc<dyn AudioClock>,
        sink: Box<dyn AudioSink>,
        config: &OutputConfig,
    ) -> Self {
        let origin = clock.now();
        Self {
            graph,
            clock,
            sink,
            latency: config.latency_ms as f64 / 1000.0,
            tick: Duration::from_millis(config.tick_ms.max(1)),
            origin,
            rendered_frames: 0,
        }
    }

    /// Audio time up to which blocks have been handed to the sink.
    pub fn rendered_until(&self) -> f64 {
        let rate = self.graph.lock().sample_rate() as f64;
        self.frame_time(self.rendered_frames, rate)
    }

    fn frame_time(&self, frames: u64, rate: f64) -> f64 {
        self.origin + frames as f64 / rate
    }

    /// Render every quantum due before `now + latency`. Returns the number of
    /// quanta written.
    pub fn render_due(&mut self) -> io::Result<usize> {
        let now = self.clock.now();
        let rate = self.graph.lock().sample_rate() as f64;

        let rendered_until = self.frame_time(self.rendered_frames, rate);
        if rendered_until < now {
            warn!(
                "Output driver fell behind by {:.3}s, skipping ahead",
                now - rendered_until
            );
            self.origin = now;
            self.rendered_frames = 0;
        }

        let horizon = now + self.latency;
        let mut written = 0;
        while self.frame_time(self.rendered_frames, rate) < horizon {
            let start = self.frame_time(self.rendered_frames, rate);
            let block = self.graph.lock().render(start, RENDER_QUANTUM_FRAMES);
            self.sink.write_block(&block)?;
            self.rendered_frames += RENDER_QUANTUM_FRAMES as u64;
            written += 1;
        }
        if written > 0 {
            self.sink.flush()?;
        }
        Ok(written)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!("Output driver started (latency {:.3}s)", self.latency);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.render_due() {
                        error!("Audio sink write failed: {}", e);
                        break;
                    }
                }
            }
        }

        let _ = self.sink.flush();
        debug!("Output driver stopped");
    }
}
