use crate::line::{Channel, LogLine};
use crate::queue::BoundedLineQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where drained lines go. Each call is one tick's worth of lines for one
/// channel and must be applied as a single redraw.
pub trait RenderTarget: Send {
    fn write_batch(&mut self, channel: Channel, lines: Vec<LogLine>);
}

/// Timer-driven consumer of both line queues.
///
/// The two channels drain on independent periods: push-channel traffic is
/// sparse and wants low latency, while monitor output arrives in floods and
/// is cheaper to render in larger, less frequent batches. The scheduler never
/// blocks; all blocking work stays in the sources.
#[derive(Debug)]
pub struct RenderScheduler {
    push_queue: Arc<BoundedLineQueue>,
    pull_queue: Arc<BoundedLineQueue>,
    push_period: Duration,
    pull_period: Duration,
    seen_dropped: [u64; 2],
}

impl RenderScheduler {
    pub fn new(
        push_queue: Arc<BoundedLineQueue>,
        pull_queue: Arc<BoundedLineQueue>,
        push_period: Duration,
        pull_period: Duration,
    ) -> Self {
        Self {
            push_queue,
            pull_queue,
            push_period,
            pull_period,
            seen_dropped: [0; 2],
        }
    }

    /// Drain the push queue into `target`. Returns the number of lines written.
    pub fn tick_push<T: RenderTarget + ?Sized>(&mut self, target: &mut T) -> usize {
        self.tick(Channel::Push, target)
    }

    /// Drain the pull queue into `target`. Returns the number of lines written.
    pub fn tick_pull<T: RenderTarget + ?Sized>(&mut self, target: &mut T) -> usize {
        self.tick(Channel::Pull, target)
    }

    fn tick<T: RenderTarget + ?Sized>(&mut self, channel: Channel, target: &mut T) -> usize {
        let (queue, slot) = match channel {
            Channel::Push => (&self.push_queue, 0),
            Channel::Pull => (&self.pull_queue, 1),
        };

        let dropped = queue.dropped();
        if dropped > self.seen_dropped[slot] {
            debug!(
                %channel,
                evicted = dropped - self.seen_dropped[slot],
                "Queue overflowed, oldest lines dropped"
            );
            self.seen_dropped[slot] = dropped;
        }

        let lines = queue.drain_all();
        let count = lines.len();
        if count > 0 {
            target.write_batch(channel, lines);
        }
        count
    }

    /// Tick both channels until `running` is cancelled, then drain once more
    /// so nothing queued before shutdown is lost.
    pub async fn run<T: RenderTarget>(mut self, mut target: T, running: CancellationToken) -> T {
        let mut push_ticks = interval(self.push_period);
        push_ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pull_ticks = interval(self.pull_period);
        pull_ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = running.cancelled() => break,
                _ = push_ticks.tick() => {
                    self.tick_push(&mut target);
                }
                _ = pull_ticks.tick() => {
                    self.tick_pull(&mut target);
                }
            }
        }

        self.tick_push(&mut target);
        self.tick_pull(&mut target);
        debug!("Render scheduler stopped");
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    type Batches = Arc<Mutex<Vec<(Channel, Vec<String>)>>>;

    #[derive(Default, Clone)]
    struct Recorder {
        batches: Batches,
    }

    impl RenderTarget for Recorder {
        fn write_batch(&mut self, channel: Channel, lines: Vec<LogLine>) {
            let texts = lines.into_iter().map(|l| l.text).collect();
            self.batches.lock().unwrap().push((channel, texts));
        }
    }

    fn queues() -> (Arc<BoundedLineQueue>, Arc<BoundedLineQueue>) {
        (
            Arc::new(BoundedLineQueue::new(100)),
            Arc::new(BoundedLineQueue::new(100)),
        )
    }

    fn push(queue: &BoundedLineQueue, channel: Channel, range: std::ops::Range<usize>) {
        for n in range {
            queue.push(LogLine::output(channel, n.to_string()));
        }
    }

    #[test]
    fn one_batch_per_tick_in_arrival_order() {
        let (a, b) = queues();
        let mut scheduler = RenderScheduler::new(
            a.clone(),
            b.clone(),
            Duration::from_millis(100),
            Duration::from_millis(200),
        );
        let mut recorder = Recorder::default();

        push(&a, Channel::Push, 0..3);
        push(&b, Channel::Pull, 0..2);

        assert_eq!(scheduler.tick_push(&mut recorder), 3);
        assert_eq!(scheduler.tick_push(&mut recorder), 0);
        assert_eq!(scheduler.tick_pull(&mut recorder), 2);

        assert_eq!(
            *recorder.batches.lock().unwrap(),
            vec![
                (Channel::Push, vec!["0".into(), "1".into(), "2".into()]),
                (Channel::Pull, vec!["0".into(), "1".into()]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn channels_drain_on_independent_periods() {
        let (a, b) = queues();
        let scheduler = RenderScheduler::new(
            a.clone(),
            b.clone(),
            Duration::from_millis(100),
            Duration::from_millis(300),
        );
        let recorder = Recorder::default();
        let batches = recorder.batches.clone();
        let running = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(recorder, running.clone()));

        // Let the immediate first ticks pass.
        tokio::time::sleep(Duration::from_millis(10)).await;
        push(&a, Channel::Push, 0..1);
        push(&b, Channel::Pull, 0..1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            *batches.lock().unwrap(),
            vec![(Channel::Push, vec!["0".to_string()])]
        );
        assert_eq!(b.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(batches.lock().unwrap().len(), 2);
        assert!(b.is_empty());

        running.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_flushes_pending_lines() {
        let (a, b) = queues();
        let scheduler = RenderScheduler::new(
            a.clone(),
            b.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let running = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(Recorder::default(), running.clone()));
        tokio::time::sleep(Duration::from_millis(1)).await;

        push(&a, Channel::Push, 0..2);
        push(&b, Channel::Pull, 0..5);
        running.cancel();

        let recorder = task.await.unwrap();
        let batches = recorder.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].1.len(), 2);
        assert_eq!(batches[1].1.len(), 5);
    }
}
