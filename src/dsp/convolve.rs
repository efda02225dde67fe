//! Linear Convolution
//!
//! Two renditions of the same linear convolution:
//! - [`convolve`]: whole-signal FFT overlap-add for the offline render
//! - [`Convolver`]: uniformly partitioned overlap-add for the live preview,
//!   with the first partition applied directly so there is no added latency
//!
//! Their results differ only by floating-point rounding. The wet path of the
//! reverb convolves with [`wet_kernels`], which scales the impulse to a
//! calibrated loudness so long impulses do not blow up the output.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::impulse::ImpulseResponse;
use crate::engine::SampleBuffer;
use crate::error::Result;

/// Below this many samples on the short side, convolve directly
const DIRECT_THRESHOLD: usize = 32;

/// Smallest block the whole-signal path transforms at once
const MIN_OFFLINE_BLOCK: usize = 4096;

/// Partition length of the streaming convolver
pub const PARTITION_SIZE: usize = 256;

/// Impulse normalization constants (Web Audio `ConvolverNode`)
const GAIN_CALIBRATION: f64 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f64 = 44100.0;
const MIN_POWER: f64 = 0.000125;

// ============================================================================
// Partitioned Streaming Convolver
// ============================================================================

/// Frequency-domain state for every kernel partition after the first
struct TailPartitions {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    /// Kernel partition spectra, each zero-padded to two partitions
    spectra: Vec<Vec<Complex<f32>>>,
    /// Spectra of the most recent input blocks, a ring indexed by `newest`
    delay_line: Vec<Vec<Complex<f32>>>,
    newest: usize,
    /// Second half of the previous inverse transform
    carry: Vec<f32>,
    accumulator: Vec<Complex<f32>>,
}

impl TailPartitions {
    fn new(tail_kernel: &[f32], partition: usize) -> Self {
        let size = 2 * partition;
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        let mut scratch = vec![Complex::default(); scratch_len];

        let spectra: Vec<Vec<Complex<f32>>> = tail_kernel
            .chunks(partition)
            .map(|segment| {
                let mut spectrum = zero_padded(segment, size);
                forward.process_with_scratch(&mut spectrum, &mut scratch);
                spectrum
            })
            .collect();

        debug!(
            "Partitioned convolver: {} tail partitions of {} samples",
            spectra.len(),
            partition
        );

        Self {
            forward,
            inverse,
            scratch,
            delay_line: vec![vec![Complex::default(); size]; spectra.len()],
            newest: 0,
            carry: vec![0.0; partition],
            accumulator: vec![Complex::default(); size],
            spectra,
        }
    }

    /// Take one full input block and write the tail output for the block
    /// that follows it into `next`
    fn push_block(&mut self, block: &[f32], next: &mut [f32]) {
        let count = self.spectra.len();
        self.newest = (self.newest + 1) % count;

        let slot = &mut self.delay_line[self.newest];
        let samples = block.iter().copied().chain(std::iter::repeat(0.0));
        for (bin, sample) in slot.iter_mut().zip(samples) {
            *bin = Complex::new(sample, 0.0);
        }
        self.forward.process_with_scratch(slot, &mut self.scratch);

        // Partition k of the kernel meets the input block k blocks back
        self.accumulator.fill(Complex::default());
        for (k, kernel) in self.spectra.iter().enumerate() {
            let input = &self.delay_line[(self.newest + count - k) % count];
            for ((acc, x), h) in self.accumulator.iter_mut().zip(input).zip(kernel) {
                *acc += x * h;
            }
        }
        self.inverse
            .process_with_scratch(&mut self.accumulator, &mut self.scratch);

        let scale = 1.0 / self.accumulator.len() as f32;
        let (first, second) = self.accumulator.split_at(self.carry.len());
        for ((out, carry), y) in next.iter_mut().zip(&self.carry).zip(first) {
            *out = carry + y.re * scale;
        }
        for (carry, y) in self.carry.iter_mut().zip(second) {
            *carry = y.re * scale;
        }
    }

    fn reset(&mut self) {
        for spectrum in &mut self.delay_line {
            spectrum.fill(Complex::default());
        }
        self.carry.fill(0.0);
        self.newest = 0;
    }
}

/// Streaming single-channel convolver
///
/// Each call to [`process_block`](Self::process_block) returns exactly as many
/// samples as it was given, with no added latency, whatever the block size.
/// The first [`PARTITION_SIZE`] kernel samples are applied in the time domain;
/// the rest of the kernel runs one partition behind in the frequency domain,
/// so each block costs a fixed amount of work however long the kernel is.
pub struct Convolver {
    kernel_len: usize,
    partition: usize,
    head: Vec<f32>,
    tail: Option<TailPartitions>,
    /// Previous and current input block, `2 * partition` samples
    window: Vec<f32>,
    /// Write position inside the current block
    position: usize,
    /// Tail partitions' output for the current block
    pending: Vec<f32>,
}

impl fmt::Debug for Convolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Convolver")
            .field("kernel_len", &self.kernel_len)
            .field("partition", &self.partition)
            .field(
                "tail_partitions",
                &self.tail.as_ref().map_or(0, |t| t.spectra.len()),
            )
            .finish()
    }
}

impl Convolver {
    /// Create a convolver for a kernel
    ///
    /// An empty kernel is treated as a single zero sample.
    pub fn new(kernel: Vec<f32>) -> Self {
        Self::with_partition(kernel, PARTITION_SIZE)
    }

    /// Create a convolver with an explicit partition length
    pub fn with_partition(mut kernel: Vec<f32>, partition: usize) -> Self {
        if kernel.is_empty() {
            kernel.push(0.0);
        }
        let partition = partition.max(1);
        let head_len = kernel.len().min(partition);

        Self {
            kernel_len: kernel.len(),
            partition,
            head: kernel[..head_len].to_vec(),
            tail: (kernel.len() > partition)
                .then(|| TailPartitions::new(&kernel[partition..], partition)),
            window: vec![0.0; 2 * partition],
            position: 0,
            pending: vec![0.0; partition],
        }
    }

    pub fn kernel_len(&self) -> usize {
        self.kernel_len
    }

    /// Convolve the next block of input
    pub fn process_block(&mut self, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(input.len());
        for &sample in input {
            let cursor = self.partition + self.position;
            self.window[cursor] = sample;

            let head: f32 = self
                .head
                .iter()
                .zip(self.window[..=cursor].iter().rev())
                .map(|(h, x)| h * x)
                .sum();
            out.push(head + self.pending[self.position]);

            self.position += 1;
            if self.position == self.partition {
                self.advance_block();
            }
        }
        out
    }

    /// Take the remaining `kernel_len - 1` tail samples and reset the history
    pub fn drain_tail(&mut self) -> Vec<f32> {
        let tail = self.process_block(&vec![0.0; self.kernel_len - 1]);
        self.reset();
        tail
    }

    /// Forget any pending tail
    pub fn reset(&mut self) {
        self.window.fill(0.0);
        self.pending.fill(0.0);
        self.position = 0;
        if let Some(tail) = self.tail.as_mut() {
            tail.reset();
        }
    }

    fn advance_block(&mut self) {
        let partition = self.partition;
        if let Some(tail) = self.tail.as_mut() {
            tail.push_block(&self.window[partition..], &mut self.pending);
        }
        self.window.copy_within(partition.., 0);
        self.position = 0;
    }
}

// ============================================================================
// Whole-Signal Convolution
// ============================================================================

/// Linear convolution of a whole signal with a kernel
///
/// Output length is `signal.len() + kernel.len() - 1`; an empty signal
/// yields an empty output.
pub fn convolve(signal: &[f32], kernel: &[f32]) -> Vec<f32> {
    if signal.is_empty() {
        return Vec::new();
    }
    if kernel.is_empty() {
        return vec![0.0; signal.len()];
    }
    if signal.len().min(kernel.len()) <= DIRECT_THRESHOLD {
        return convolve_direct(signal, kernel);
    }

    let block = kernel.len().next_power_of_two().max(MIN_OFFLINE_BLOCK);
    let size = (block + kernel.len() - 1).next_power_of_two();
    debug!(
        "FFT convolution: kernel {} samples, block {}, transform size {}",
        kernel.len(),
        block,
        size
    );

    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);
    let mut scratch = vec![
        Complex::default();
        forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len())
    ];

    let mut kernel_spectrum = zero_padded(kernel, size);
    forward.process_with_scratch(&mut kernel_spectrum, &mut scratch);

    let scale = 1.0 / size as f32;
    let mut out = vec![0.0f32; signal.len() + kernel.len() - 1];
    for (index, chunk) in signal.chunks(block).enumerate() {
        let mut spectrum = zero_padded(chunk, size);
        forward.process_with_scratch(&mut spectrum, &mut scratch);
        for (bin, k) in spectrum.iter_mut().zip(&kernel_spectrum) {
            *bin *= k;
        }
        inverse.process_with_scratch(&mut spectrum, &mut scratch);

        let start = index * block;
        let len = chunk.len() + kernel.len() - 1;
        for (acc, y) in out[start..start + len].iter_mut().zip(&spectrum) {
            *acc += y.re * scale;
        }
    }
    out
}

fn convolve_direct(signal: &[f32], kernel: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0f32; signal.len() + kernel.len() - 1];
    for (i, &x) in signal.iter().enumerate() {
        if x == 0.0 {
            continue;
        }
        for (j, &h) in kernel.iter().enumerate() {
            out[i + j] += x * h;
        }
    }
    out
}

fn zero_padded(samples: &[f32], size: usize) -> Vec<Complex<f32>> {
    samples
        .iter()
        .map(|&s| Complex::new(s, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect()
}

// ============================================================================
// Impulse Preparation
// ============================================================================

/// Impulse channel used for a given signal channel
///
/// A mono impulse feeds every channel; otherwise channels map one to one,
/// wrapping when the signal has more channels than the impulse.
pub fn impulse_channel_for(signal_channel: usize, impulse_channels: usize) -> usize {
    if impulse_channels <= 1 {
        0
    } else {
        signal_channel % impulse_channels
    }
}

/// Bring an impulse to the signal's sample rate, warning when it has to move
pub fn match_impulse_rate(impulse: &ImpulseResponse, sample_rate: u32) -> Result<ImpulseResponse> {
    if impulse.sample_rate() != sample_rate {
        warn!(
            "Impulse sample rate {} Hz differs from source {} Hz, resampling impulse",
            impulse.sample_rate(),
            sample_rate
        );
    }
    impulse.resampled_to(sample_rate)
}

/// Gain that brings an impulse to a calibrated loudness
///
/// Follows the Web Audio `ConvolverNode` normalization: the inverse of the
/// impulse's RMS power across all channels, calibrated against 44.1 kHz and
/// halved for true-stereo (four channel) impulses. Silent impulses are
/// clamped to a minimum power instead of producing an infinite gain.
pub fn normalization_scale(impulse: &SampleBuffer) -> f32 {
    let samples = impulse.num_channels() * impulse.num_frames();
    if samples == 0 {
        return 1.0;
    }

    let energy: f64 = impulse
        .channels()
        .iter()
        .flatten()
        .map(|&s| s as f64 * s as f64)
        .sum();
    let power = (energy / samples as f64).sqrt();
    let power = if power.is_finite() {
        power.max(MIN_POWER)
    } else {
        MIN_POWER
    };

    let mut scale =
        GAIN_CALIBRATION / power * (GAIN_CALIBRATION_SAMPLE_RATE / impulse.sample_rate() as f64);
    if impulse.num_channels() == 4 {
        scale *= 0.5;
    }
    scale as f32
}

/// Impulse channels ready for the wet path at `sample_rate`
///
/// The impulse is resampled when needed, then scaled by
/// [`normalization_scale`].
pub fn wet_kernels(impulse: &ImpulseResponse, sample_rate: u32) -> Result<SampleBuffer> {
    let impulse = match_impulse_rate(impulse, sample_rate)?;
    let scale = normalization_scale(impulse.buffer());
    debug!(
        "Impulse normalization: {} frames x {} ch, scale {:.6}",
        impulse.num_frames(),
        impulse.buffer().num_channels(),
        scale
    );
    impulse
        .buffer()
        .map_channels(|_, samples| samples.iter().map(|s| s * scale).collect())
}

/// Convolve every channel of a signal with its mapped impulse channel
pub fn convolve_buffer(signal: &SampleBuffer, impulse: &ImpulseResponse) -> Result<SampleBuffer> {
    let impulse = match_impulse_rate(impulse, signal.sample_rate())?;
    convolve_channels(signal, impulse.buffer())
}

/// Convolve every channel of a signal with kernels already at its rate
pub fn convolve_channels(signal: &SampleBuffer, kernels: &SampleBuffer) -> Result<SampleBuffer> {
    signal.map_channels(|ch, samples| {
        let kernel = kernels.channel(impulse_channel_for(ch, kernels.num_channels()));
        convolve(samples, kernel)
    })
}
