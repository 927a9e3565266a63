//! Lateness-tracking jitter buffer
//!
//! Every received frame contributes one lateness sample (receive clock
//! minus frame timestamp) to a fixed history. The buffer size follows the
//! largest recent lateness, ignoring the `drop_count` worst outliers,
//! grows immediately and shrinks by 2 ms per frame once it is
//! comfortably oversized. A frame's playout delay is then simply
//! `jitterbuffer - lateness`.

use tracing::debug;

/// Number of lateness samples remembered per call
pub const MEMORY_SIZE: usize = 100;

/// Outliers ignored when looking for the maximum lateness
pub const DEFAULT_DROP: usize = 3;

/// IIR coefficient of the historic jitter figure
const GAMMA: f64 = 0.01;

/// Voice frames later than this are discarded rather than played
const MAX_LATE_MS: i32 = -4;

/// Jitter buffer tuning, shared by every call on an endpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterSettings {
    /// When false every frame is delivered without delay
    pub enabled: bool,

    /// Ceiling on `max - min` lateness the buffer will absorb, in ms
    pub max_jitter_buffer: i32,

    /// How far the buffer may exceed the observed maximum before it shrinks, in ms
    pub max_excess_buffer: i32,

    /// Number of worst samples excluded from the maximum
    pub drop_count: usize,
}

impl Default for JitterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_jitter_buffer: 3000,
            max_excess_buffer: 50,
            drop_count: DEFAULT_DROP,
        }
    }
}

/// What to do with a frame after it has been measured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playout {
    /// Hand to the channel right away
    Now,
    /// Hand to the channel after this many milliseconds
    After(u32),
    /// Too late to be useful
    Drop,
}

/// Per-call jitter state
#[derive(Debug, Clone)]
pub struct JitterBuffer {
    history: [i32; MEMORY_SIZE],
    jitterbuffer: i32,
    jitter: i32,
    historic_jitter: f64,
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterBuffer {
    pub fn new() -> Self {
        Self {
            history: [0; MEMORY_SIZE],
            jitterbuffer: 0,
            jitter: 0,
            historic_jitter: 0.0,
        }
    }

    /// Current buffer size in ms
    pub fn size(&self) -> i32 {
        self.jitterbuffer
    }

    /// Spread between the latest and earliest sample at the last update
    pub fn jitter(&self) -> i32 {
        self.jitter
    }

    pub fn historic_jitter(&self) -> f64 {
        self.historic_jitter
    }

    pub fn history(&self) -> &[i32; MEMORY_SIZE] {
        &self.history
    }

    /// Record one sample and return the playout delay for it.
    ///
    /// `rx_elapsed` is the receive clock in ms since the call's first
    /// packet, `timestamp` the frame's own timestamp. The returned delay
    /// is forced to 0 when the buffer is disabled.
    pub fn update(&mut self, rx_elapsed: u32, timestamp: u32, settings: &JitterSettings) -> i32 {
        let mut lateness = rx_elapsed.wrapping_sub(timestamp) as i32;
        if lateness > 32767 {
            // Our clock wrapped before the sender's high bits reached us
            lateness -= 65536;
        }
        if lateness < -32768 {
            lateness += 65536;
        }

        self.history.copy_within(1.., 0);
        self.history[MEMORY_SIZE - 1] = lateness;

        let mut min = self.history[0];
        let mut max = 0;
        let mut drops = [0usize; MEMORY_SIZE];
        let passes = settings.drop_count.min(MEMORY_SIZE - 1) + 1;
        for pass in 0..passes {
            max = -999_999_999;
            let mut max_index = 0;
            for (index, &sample) in self.history.iter().enumerate() {
                if max < sample && !drops[..pass].contains(&index) {
                    max = sample;
                    max_index = index;
                }
                if pass == 0 && min > sample {
                    min = sample;
                }
            }
            drops[pass] = max_index;
        }

        self.jitter = max - min;
        if self.jitter as f64 > self.historic_jitter {
            self.historic_jitter = self.jitter as f64;
        } else {
            self.historic_jitter =
                GAMMA * self.jitter as f64 + (1.0 - GAMMA) * self.historic_jitter;
        }

        if max < self.jitterbuffer - settings.max_excess_buffer {
            self.jitterbuffer -= 2;
        }

        if max > min + settings.max_jitter_buffer {
            debug!(
                "Constraining buffer from {} to {} + {}",
                max, min, settings.max_jitter_buffer
            );
            max = min + settings.max_jitter_buffer;
        }

        if max > self.jitterbuffer {
            self.jitterbuffer = max;
        }

        debug!(
            "min = {}, max = {}, jb = {}, lateness = {}",
            min, max, self.jitterbuffer, lateness
        );

        if settings.enabled {
            self.jitterbuffer - lateness
        } else {
            0
        }
    }

    /// Turn a delay from [`update`](Self::update) into a playout decision
    pub fn playout(delay: i32, is_voice: bool) -> Playout {
        if delay >= 1 {
            Playout::After(delay as u32)
        } else if delay < MAX_LATE_MS && is_voice {
            debug!("Dropping voice packet since {} ms is too old", delay);
            Playout::Drop
        } else {
            Playout::Now
        }
    }
}
