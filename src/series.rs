//! Time-series query service.
//!
//! Turns persisted samples into the bounded, gap-filled series the web
//! client plots. Zero-latency placeholder samples mark stretches where no
//! probe resolved at all (the process was down), as opposed to `-1` losses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::monitor::{Peer, PeerId, duration_ms, now_ms};
use crate::storage::{Sample, SampleStore, StorageError, TimeRange};

/// Slack added to the expected interval before a gap counts as missing data.
pub const GAP_TOLERANCE_MS: i64 = 500;

/// Largest `max` a series request may ask for.
pub const MAX_SERIES_POINTS: usize = 10_000;

/// Aggregate statistics for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeerStats {
    /// Mean latency over successful probes, in milliseconds.
    pub average_response_time: f64,
    /// Percentage of probes that got a reply.
    pub uptime: f64,
}

/// Insert zero-latency placeholders where consecutive samples within
/// `range` are further apart than `interval_ms + GAP_TOLERANCE_MS`.
///
/// The leading and trailing edges are checked against the range bounds as
/// well. Each gap receives exactly one placeholder, one interval after the
/// sample preceding it. Without a range the samples are returned as is.
pub fn fill_gaps(samples: Vec<Sample>, range: Option<TimeRange>, interval_ms: i64) -> Vec<Sample> {
    let Some(range) = range else {
        return samples;
    };
    let (Some(first), Some(last)) = (samples.first().copied(), samples.last().copied()) else {
        return samples;
    };
    let peer_id = first.peer_id;
    let threshold = interval_ms + GAP_TOLERANCE_MS;

    let mut edged = Vec::with_capacity(samples.len() + 2);
    if first.timestamp_ms - range.start > threshold {
        edged.push(Sample::new(peer_id, range.start + interval_ms, 0));
    }
    edged.extend(samples);
    if range.stop - last.timestamp_ms > threshold {
        edged.push(Sample::new(peer_id, range.stop - interval_ms, 0));
    }

    let mut filled = Vec::with_capacity(edged.len() * 2);
    let mut previous: Option<i64> = None;
    for sample in edged {
        if let Some(prev) = previous
            && sample.timestamp_ms - prev > threshold
        {
            filled.push(Sample::new(peer_id, prev + interval_ms, 0));
        }
        previous = Some(sample.timestamp_ms);
        filled.push(sample);
    }
    filled
}

/// Reduce `samples` to at most `max` entries by taking every
/// `len / max`-th sample and keeping the most recent `max` picks.
pub fn downsample(samples: Vec<Sample>, max: usize) -> Vec<Sample> {
    if max == 0 || samples.len() <= max {
        return samples;
    }
    let stride = samples.len() / max;
    let picks: Vec<Sample> = samples.into_iter().step_by(stride).collect();
    let skip = picks.len().saturating_sub(max);
    picks.into_iter().skip(skip).collect()
}

/// Up to `count` zero samples spaced one interval apart from `start`,
/// capped at [`MAX_SERIES_POINTS`]. Stops early instead of overflowing.
pub fn placeholder_series(peer_id: PeerId, start: i64, interval_ms: i64, count: usize) -> Vec<Sample> {
    (0..count.min(MAX_SERIES_POINTS) as i64)
        .map_while(|i| {
            let ts = i.checked_mul(interval_ms)?.checked_add(start)?;
            Some(Sample::new(peer_id, ts, 0))
        })
        .collect()
}

/// Read side of the sample store, shaped for presentation.
pub struct TimeSeriesService {
    store: Arc<dyn SampleStore>,
    intervals: HashMap<PeerId, i64>,
    default_interval_ms: i64,
}

impl std::fmt::Debug for TimeSeriesService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSeriesService")
            .field("peers", &self.intervals.len())
            .field("default_interval_ms", &self.default_interval_ms)
            .finish_non_exhaustive()
    }
}

impl TimeSeriesService {
    /// Create a service. Peers not in `peers` use `default_interval`.
    pub fn new(store: Arc<dyn SampleStore>, peers: &[Peer], default_interval: Duration) -> Self {
        Self {
            store,
            intervals: peers
                .iter()
                .map(|p| (p.id, duration_ms(p.interval)))
                .collect(),
            default_interval_ms: duration_ms(default_interval),
        }
    }

    /// Expected spacing of samples for a peer, in milliseconds.
    pub fn interval_ms(&self, peer_id: PeerId) -> i64 {
        self.intervals
            .get(&peer_id)
            .copied()
            .unwrap_or(self.default_interval_ms)
    }

    /// Gap-filled, optionally downsampled series for a peer.
    ///
    /// When `max` is given and nothing was recorded, returns `max`
    /// placeholders starting at the range start, or ending now when no
    /// range was given. `max` is capped at [`MAX_SERIES_POINTS`].
    pub async fn series(
        &self,
        peer_id: PeerId,
        range: Option<TimeRange>,
        max: Option<usize>,
    ) -> Result<Vec<Sample>, StorageError> {
        let samples = self.store.query(peer_id, range).await?;
        let interval_ms = self.interval_ms(peer_id);
        let filled = fill_gaps(samples, range, interval_ms);

        let Some(max) = max.filter(|&m| m > 0).map(|m| m.min(MAX_SERIES_POINTS)) else {
            return Ok(filled);
        };

        if filled.is_empty() {
            let start = match range {
                Some(range) => range.start,
                None => now_ms().saturating_sub(interval_ms.saturating_mul(max as i64)),
            };
            return Ok(placeholder_series(peer_id, start, interval_ms, max));
        }

        Ok(downsample(filled, max))
    }

    /// Average latency and uptime for a peer.
    pub async fn stats(
        &self,
        peer_id: PeerId,
        range: Option<TimeRange>,
    ) -> Result<PeerStats, StorageError> {
        let (average_response_time, uptime) =
            self.store.average_and_success_rate(peer_id, range).await?;
        Ok(PeerStats {
            average_response_time,
            uptime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageBuilder;

    fn at(times: &[i64]) -> Vec<Sample> {
        times.iter().map(|&t| Sample::new(1, t, 7)).collect()
    }

    fn times(samples: &[Sample]) -> Vec<i64> {
        samples.iter().map(|s| s.timestamp_ms).collect()
    }

    #[test]
    fn test_single_gap_gets_single_placeholder() {
        let filled = fill_gaps(at(&[0, 3_000]), Some(TimeRange::new(0, 3_000)), 1_000);
        assert_eq!(times(&filled), vec![0, 1_000, 3_000]);
        assert_eq!(filled[1].response_time, 0);
        assert_eq!(filled[1].peer_id, 1);
    }

    #[test]
    fn test_no_range_returns_samples_unchanged() {
        let samples = at(&[0, 3_000, 9_000]);
        assert_eq!(fill_gaps(samples.clone(), None, 1_000), samples);
    }

    #[test]
    fn test_gap_within_tolerance_is_left_alone() {
        let filled = fill_gaps(at(&[0, 1_500, 3_000]), Some(TimeRange::new(0, 3_000)), 1_000);
        assert_eq!(times(&filled), vec![0, 1_500, 3_000]);
    }

    #[test]
    fn test_every_gap_is_filled_once() {
        let filled = fill_gaps(
            at(&[0, 1_000, 5_000, 6_000, 9_000]),
            Some(TimeRange::new(0, 9_000)),
            1_000,
        );
        assert_eq!(times(&filled), vec![0, 1_000, 2_000, 5_000, 6_000, 7_000, 9_000]);
    }

    #[test]
    fn test_range_edges_are_filled() {
        let filled = fill_gaps(at(&[5_000, 6_000]), Some(TimeRange::new(0, 10_000)), 1_000);
        // Leading edge at start + interval, trailing at stop - interval,
        // plus one placeholder in each gap they open.
        assert_eq!(
            times(&filled),
            vec![1_000, 2_000, 5_000, 6_000, 7_000, 9_000]
        );
    }

    #[test]
    fn test_range_edges_within_tolerance() {
        let filled = fill_gaps(at(&[1_200, 2_200]), Some(TimeRange::new(0, 3_500)), 1_000);
        assert_eq!(times(&filled), vec![1_200, 2_200]);
    }

    #[test]
    fn test_loss_samples_are_kept() {
        let samples = vec![Sample::new(1, 0, 5), Sample::loss(1, 1_000), Sample::new(1, 2_000, 6)];
        let filled = fill_gaps(samples.clone(), Some(TimeRange::new(0, 2_000)), 1_000);
        assert_eq!(filled, samples);
    }

    #[test]
    fn test_downsample_stride() {
        let samples: Vec<Sample> = (0..100).map(|i| Sample::new(1, i, 1)).collect();
        let reduced = downsample(samples, 10);
        assert_eq!(times(&reduced), (0..100).step_by(10).collect::<Vec<_>>());
    }

    #[test]
    fn test_downsample_keeps_most_recent_picks() {
        let samples: Vec<Sample> = (0..105).map(|i| Sample::new(1, i, 1)).collect();
        let reduced = downsample(samples, 10);
        assert_eq!(times(&reduced), (10..=100).step_by(10).collect::<Vec<_>>());
    }

    #[test]
    fn test_downsample_noop_when_short() {
        let samples = at(&[1, 2, 3]);
        assert_eq!(downsample(samples.clone(), 10), samples);
        assert_eq!(downsample(samples.clone(), 0), samples);
    }

    #[test]
    fn test_placeholder_series() {
        let series = placeholder_series(9, 1_000, 500, 4);
        assert_eq!(times(&series), vec![1_000, 1_500, 2_000, 2_500]);
        assert!(series.iter().all(|s| s.peer_id == 9 && s.response_time == 0));
    }

    #[test]
    fn test_placeholder_series_is_bounded() {
        let series = placeholder_series(1, 0, 1_000, usize::MAX);
        assert_eq!(series.len(), MAX_SERIES_POINTS);

        // Stops before the timestamps overflow
        let series = placeholder_series(1, i64::MAX - 1_500, 1_000, 5);
        assert_eq!(times(&series), vec![i64::MAX - 1_500, i64::MAX - 500]);
    }

    #[test]
    fn test_stats_serialize_pascal_case() {
        let stats = PeerStats {
            average_response_time: 12.5,
            uptime: 100.0,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"AverageResponseTime": 12.5, "Uptime": 100.0})
        );
    }

    async fn service(samples: &[Sample]) -> TimeSeriesService {
        let handles = StorageBuilder::new("sqlite::memory:").build().await.unwrap();
        for sample in samples {
            handles.samples.insert(sample).await.unwrap();
        }
        let peer = Peer::new(
            1,
            "127.0.0.1".parse().unwrap(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        TimeSeriesService::new(handles.samples.clone(), &[peer], Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_series_with_range_and_max() {
        let samples: Vec<Sample> = (0..50).map(|i| Sample::new(1, i * 1_000, 10)).collect();
        let svc = service(&samples).await;

        let series = svc
            .series(1, Some(TimeRange::new(49_000, 10_000)), Some(20))
            .await
            .unwrap();
        // 40 samples in range, stride 2
        assert_eq!(series.len(), 20);
        assert_eq!(series[0].timestamp_ms, 10_000);
        assert_eq!(series[19].timestamp_ms, 48_000);
    }

    #[tokio::test]
    async fn test_series_empty_with_max_returns_placeholders() {
        let svc = service(&[]).await;

        let series = svc
            .series(1, Some(TimeRange::new(10_000, 20_000)), Some(3))
            .await
            .unwrap();
        assert_eq!(times(&series), vec![10_000, 11_000, 12_000]);

        // Unknown peer falls back to the default interval.
        let series = svc
            .series(2, Some(TimeRange::new(0, 1)), Some(2))
            .await
            .unwrap();
        assert_eq!(times(&series), vec![0, 5_000]);

        assert!(svc.series(1, None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_series_caps_huge_max() {
        let svc = service(&[]).await;

        let series = svc
            .series(1, Some(TimeRange::new(0, 1)), Some(1_000_000_000_000))
            .await
            .unwrap();
        assert_eq!(series.len(), MAX_SERIES_POINTS);

        let series = svc.series(1, None, Some(usize::MAX)).await.unwrap();
        assert_eq!(series.len(), MAX_SERIES_POINTS);
    }

    #[tokio::test]
    async fn test_stats_from_store() {
        let svc = service(&[
            Sample::new(1, 1_000, 10),
            Sample::new(1, 2_000, 20),
            Sample::loss(1, 3_000),
            Sample::loss(1, 4_000),
        ])
        .await;

        let stats = svc.stats(1, None).await.unwrap();
        assert_eq!(stats.average_response_time, 15.0);
        assert_eq!(stats.uptime, 50.0);
    }
}
