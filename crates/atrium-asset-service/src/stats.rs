// SPDX-License-Identifier: Apache-2.0
//! Stats sampler: periodic per-connection transport counters plus a moving
//! min/max/avg window over aggregate throughput.
//!
//! The snapshot is emitted as a JSON object through `tracing` so the
//! operator's log pipeline picks it up without a separate stats transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::server::AssetServer;
use crate::session::{CounterSnapshot, SessionId};

const MEGABITS_PER_BYTE: f64 = 8.0 / 1_000_000.0;

/// Moving min/max/avg over a window of `interval_length * window_intervals`
/// samples, updated every `interval_length` samples.
///
/// Overall stats (`min`/`max`/`average`) cover every sample ever collected;
/// window stats cover only the most recent full intervals. When an interval
/// completes, `new_stats_available` flips true and stays set until cleared.
#[derive(Debug)]
pub struct MovingMinMaxAvg {
    min: f64,
    max: f64,
    average: f64,
    samples_collected: usize,

    interval_length: usize,
    window_intervals: usize,

    existing_samples_in_current_interval: usize,
    existing_intervals: usize,

    window_min: f64,
    window_max: f64,
    window_average: f64,

    current_interval_min: f64,
    current_interval_max: f64,
    current_interval_average: f64,

    interval_mins: Vec<f64>,
    interval_maxes: Vec<f64>,
    interval_averages: Vec<f64>,
    newest_interval_stats_at: usize,

    new_stats_available: bool,
}

impl MovingMinMaxAvg {
    /// Create a window of `window_intervals` intervals of `interval_length`
    /// samples each. Both must be at least 1.
    pub fn new(interval_length: usize, window_intervals: usize) -> Self {
        let interval_length = interval_length.max(1);
        let window_intervals = window_intervals.max(1);
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            average: 0.0,
            samples_collected: 0,
            interval_length,
            window_intervals,
            existing_samples_in_current_interval: 0,
            existing_intervals: 0,
            window_min: f64::INFINITY,
            window_max: f64::NEG_INFINITY,
            window_average: 0.0,
            current_interval_min: f64::INFINITY,
            current_interval_max: f64::NEG_INFINITY,
            current_interval_average: 0.0,
            interval_mins: vec![0.0; window_intervals],
            interval_maxes: vec![0.0; window_intervals],
            interval_averages: vec![0.0; window_intervals],
            newest_interval_stats_at: 0,
            new_stats_available: false,
        }
    }

    fn update_average(average: &mut f64, num_samples: &mut usize, new_sample: f64) {
        let n = *num_samples as f64;
        *average = *average * (n / (n + 1.0)) + new_sample / (n + 1.0);
        *num_samples += 1;
    }

    /// Collect one sample.
    pub fn update(&mut self, new_sample: f64) {
        if new_sample < self.min {
            self.min = new_sample;
        }
        if new_sample > self.max {
            self.max = new_sample;
        }
        Self::update_average(&mut self.average, &mut self.samples_collected, new_sample);

        if new_sample < self.current_interval_min {
            self.current_interval_min = new_sample;
        }
        if new_sample > self.current_interval_max {
            self.current_interval_max = new_sample;
        }
        Self::update_average(
            &mut self.current_interval_average,
            &mut self.existing_samples_in_current_interval,
            new_sample,
        );

        if self.existing_samples_in_current_interval == self.interval_length {
            // Record the finished interval cyclically, then reset it.
            self.newest_interval_stats_at =
                (self.newest_interval_stats_at + 1) % self.window_intervals;
            self.interval_mins[self.newest_interval_stats_at] = self.current_interval_min;
            self.interval_maxes[self.newest_interval_stats_at] = self.current_interval_max;
            self.interval_averages[self.newest_interval_stats_at] =
                self.current_interval_average;
            self.current_interval_min = f64::INFINITY;
            self.current_interval_max = f64::NEG_INFINITY;
            self.current_interval_average = 0.0;
            self.existing_samples_in_current_interval = 0;

            if self.existing_intervals < self.window_intervals {
                self.existing_intervals += 1;
            }

            // Recompute the window stats across the recorded intervals.
            let mut k = self.newest_interval_stats_at;
            self.window_min = self.interval_mins[k];
            self.window_max = self.interval_maxes[k];
            self.window_average = self.interval_averages[k];
            let mut included = 1usize;
            while included < self.existing_intervals {
                k = if k == 0 { self.window_intervals - 1 } else { k - 1 };
                if self.interval_mins[k] < self.window_min {
                    self.window_min = self.interval_mins[k];
                }
                if self.interval_maxes[k] > self.window_max {
                    self.window_max = self.interval_maxes[k];
                }
                Self::update_average(
                    &mut self.window_average,
                    &mut included,
                    self.interval_averages[k],
                );
            }

            self.new_stats_available = true;
        }
    }

    /// Forget every collected sample and recorded interval.
    pub fn reset(&mut self) {
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
        self.average = 0.0;
        self.samples_collected = 0;
        self.existing_samples_in_current_interval = 0;
        self.existing_intervals = 0;
        self.window_min = f64::INFINITY;
        self.window_max = f64::NEG_INFINITY;
        self.window_average = 0.0;
        self.current_interval_min = f64::INFINITY;
        self.current_interval_max = f64::NEG_INFINITY;
        self.current_interval_average = 0.0;
        self.new_stats_available = false;
    }

    /// Minimum over every sample collected.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Maximum over every sample collected.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Average over every sample collected.
    pub fn average(&self) -> f64 {
        self.average
    }

    /// Minimum over the moving window.
    pub fn window_min(&self) -> f64 {
        self.window_min
    }

    /// Maximum over the moving window.
    pub fn window_max(&self) -> f64 {
        self.window_max
    }

    /// Average over the moving window.
    pub fn window_average(&self) -> f64 {
        self.window_average
    }

    /// True once a new interval's stats landed; cleared by the caller.
    pub fn new_stats_available(&self) -> bool {
        self.new_stats_available
    }

    /// Acknowledge the new-stats flag.
    pub fn clear_new_stats_available(&mut self) {
        self.new_stats_available = false;
    }
}

/// Build one sampling round's JSON snapshot and per-direction byte rates.
///
/// `elapsed` is the wall time since the previous round; `last` maps session
/// ids to their previous counter snapshots and is updated in place.
pub fn sample_round(
    sessions: &[(SessionId, bool, CounterSnapshot)],
    last: &mut HashMap<SessionId, CounterSnapshot>,
    elapsed: Duration,
) -> (serde_json::Value, f64, f64) {
    let elapsed_secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let mut per_session = serde_json::Map::new();
    let mut total_up = 0u64;
    let mut total_down = 0u64;

    let mut live: HashMap<SessionId, CounterSnapshot> = HashMap::with_capacity(sessions.len());
    for (id, can_write, snapshot) in sessions {
        let previous = last.get(id).copied().unwrap_or_default();
        let up = snapshot.bytes_out.saturating_sub(previous.bytes_out);
        let down = snapshot.bytes_in.saturating_sub(previous.bytes_in);
        total_up += up;
        total_down += down;
        live.insert(*id, *snapshot);

        per_session.insert(
            id.to_string(),
            serde_json::json!({
                "can_write": can_write,
                "bytes_in": snapshot.bytes_in,
                "bytes_out": snapshot.bytes_out,
                "messages_in": snapshot.messages_in,
                "messages_out": snapshot.messages_out,
                "up_mbps": up as f64 * MEGABITS_PER_BYTE / elapsed_secs,
                "down_mbps": down as f64 * MEGABITS_PER_BYTE / elapsed_secs,
            }),
        );
    }
    // Forget sessions that disconnected since the last round.
    *last = live;

    let up_rate = total_up as f64 / elapsed_secs;
    let down_rate = total_down as f64 / elapsed_secs;
    (serde_json::Value::Object(per_session), up_rate, down_rate)
}

/// Periodic sampling loop. Runs until the server is dropped.
pub async fn run_sampler(server: Arc<AssetServer>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so rates have a baseline.
    ticker.tick().await;

    let mut last: HashMap<SessionId, CounterSnapshot> = HashMap::new();
    let mut up_window = MovingMinMaxAvg::new(1, 60);
    let mut down_window = MovingMinMaxAvg::new(1, 60);
    let mut previous_round = tokio::time::Instant::now();

    loop {
        ticker.tick().await;
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(previous_round);
        previous_round = now;

        let sessions = server.session_counter_snapshots().await;
        if sessions.is_empty() && last.is_empty() {
            continue;
        }
        let (snapshot, up_rate, down_rate) = sample_round(&sessions, &mut last, elapsed);
        up_window.update(up_rate * MEGABITS_PER_BYTE);
        down_window.update(down_rate * MEGABITS_PER_BYTE);
        up_window.clear_new_stats_available();
        down_window.clear_new_stats_available();

        info!(
            target: "atrium_asset_service::stats",
            connections = sessions.len(),
            up_mbps_window_avg = up_window.window_average(),
            down_mbps_window_avg = down_window.window_average(),
            stats = %snapshot,
            "connection stats sample"
        );
    }
}
