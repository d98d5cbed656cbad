//! Audio units and the lock-free SPSC ring between the input callback and the
//! capture loop.
//!
//! Uses `ringbuf::HeapRb<f32>` whose `push_slice` is wait-free and therefore
//! safe to call from the real-time audio callback.

pub mod frame;

use ringbuf::{traits::Split, HeapRb};

pub use frame::{AudioFrame, PlaybackBuffer, AGENT_SAMPLE_RATE, CAPTURE_SAMPLE_RATE};
pub use ringbuf::traits::{Consumer, Producer};

/// Producer half, held by the input device callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the capture loop.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^18 = 262 144 f32 samples ≈ 5.4 s at 48 kHz. The capture loop drains far
/// faster than that; overflow only happens if the loop thread stalls.
pub const RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_capture_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
