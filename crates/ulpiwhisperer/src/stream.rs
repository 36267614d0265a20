//! Flow-controlled plumbing around the filter: a pull-based adapter for
//! iterator pipelines and a bounded channel stage for threaded pipelines.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Error;

use crate::filter::{PacketEvent, RxCmdFilter};
use crate::ulpi::RawSample;
use crate::util::join_worker;

/// Result of polling the channel stage for its next event.
pub enum EventPoll {
    Event(PacketEvent),
    Timeout,
    Ended,
}

/// Pull-based adapter over any source of raw samples. Samples are accepted
/// from the source one at a time and only while the consumer is asking for
/// an event, so back-pressure needs no further machinery.
pub struct FilterStream<I> {
    filter: RxCmdFilter,
    input: I,
}

impl<I: Iterator<Item = RawSample>> FilterStream<I> {
    pub fn new(filter: RxCmdFilter, input: I) -> FilterStream<I> {
        FilterStream { filter, input }
    }
}

impl<I: Iterator<Item = RawSample>> Iterator for FilterStream<I> {
    type Item = PacketEvent;

    fn next(&mut self) -> Option<PacketEvent> {
        loop {
            let sample = self.input.next()?;
            if let Some(event) = self.filter.process(sample) {
                return Some(event);
            }
        }
    }
}

/// The filter running on its own thread between two single-slot channels.
///
/// The worker accepts a sample, runs it through the filter, and if the
/// outcome is an emission parks on the outbound channel until the consumer
/// takes the event. No further input is accepted while an emission is
/// pending, so a slow consumer stalls the producer with at most one sample
/// of skew per channel slot.
pub struct FilterStage {
    events: mpsc::Receiver<PacketEvent>,
    stop: Option<FilterStop>,
}

/// Handle used to join the worker thread once the stage is finished.
pub struct FilterStop {
    worker: JoinHandle<()>,
}

impl FilterStop {
    fn stop(self) -> Result<(), Error> {
        join_worker(self.worker)
    }
}

impl FilterStage {
    /// Spawn the worker. The returned sender is the producer-facing input
    /// port; dropping it ends the stage once the remaining samples have
    /// drained.
    pub fn spawn(filter: RxCmdFilter) -> (mpsc::SyncSender<RawSample>, FilterStage) {
        let (samples_tx, samples_rx) = mpsc::sync_channel(1);
        let (events_tx, events_rx) = mpsc::sync_channel(1);
        let worker = std::thread::spawn(move || run_filter(filter, samples_rx, events_tx));
        let stage = FilterStage {
            events: events_rx,
            stop: Some(FilterStop { worker }),
        };
        (samples_tx, stage)
    }

    /// Wait up to `timeout` for the next event.
    pub fn poll_next(&mut self, timeout: Duration) -> EventPoll {
        match self.events.recv_timeout(timeout) {
            Ok(event) => EventPoll::Event(event),
            Err(RecvTimeoutError::Timeout) => EventPoll::Timeout,
            Err(RecvTimeoutError::Disconnected) => EventPoll::Ended,
        }
    }

    /// Shut the stage down and surface any worker panic. Pending emissions
    /// are abandoned; the worker exits at its next step boundary.
    pub fn stop(mut self) -> Result<(), Error> {
        let stop = self.stop.take();
        // Dropping the receiver releases a worker parked on an emission.
        drop(self);
        match stop {
            Some(stop) => stop.stop(),
            None => Ok(()),
        }
    }
}

impl Iterator for FilterStage {
    type Item = PacketEvent;

    fn next(&mut self) -> Option<PacketEvent> {
        self.events.recv().ok()
    }
}

fn run_filter(
    mut filter: RxCmdFilter,
    samples: mpsc::Receiver<RawSample>,
    events: mpsc::SyncSender<PacketEvent>,
) {
    while let Ok(sample) = samples.recv() {
        if let Some(event) = filter.process(sample) {
            if events.send(event).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{EventType, FilterConfig};
    use crate::ulpi::{RXCMD_MAGIC_EOP, RXCMD_MAGIC_NOP, RXCMD_MAGIC_SOP};
    use std::sync::mpsc::TrySendError;

    fn filter() -> RxCmdFilter {
        RxCmdFilter::new(FilterConfig::default()).unwrap()
    }

    #[test]
    fn stream_filters_in_order() {
        let samples = vec![
            RawSample::cmd(RXCMD_MAGIC_SOP),
            RawSample::data(0x11),
            RawSample::cmd(RXCMD_MAGIC_NOP),
            RawSample::data(0x22),
            RawSample::cmd(RXCMD_MAGIC_EOP),
        ];
        let events: Vec<PacketEvent> =
            FilterStream::new(filter(), samples.into_iter()).collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].kind(), Some(EventType::Start));
        assert_eq!((events[1].timestamp, events[1].data), (1, 0x11));
        assert_eq!((events[2].timestamp, events[2].data), (3, 0x22));
        assert_eq!(events[3].kind(), Some(EventType::End));
    }

    #[test]
    fn stage_delivers_events_then_ends() {
        let (samples, stage) = FilterStage::spawn(filter());
        samples.send(RawSample::data(0x01)).unwrap();
        samples.send(RawSample::cmd(RXCMD_MAGIC_NOP)).unwrap();
        samples.send(RawSample::data(0x02)).unwrap();
        drop(samples);

        let events: Vec<PacketEvent> = stage.collect();
        assert_eq!(
            events,
            [
                PacketEvent::new(0, 0x01, None),
                PacketEvent::new(2, 0x02, None),
            ]
        );
    }

    #[test]
    fn stage_poll_times_out_without_input() {
        let (_samples, mut stage) = FilterStage::spawn(filter());
        assert!(matches!(
            stage.poll_next(Duration::from_millis(10)),
            EventPoll::Timeout
        ));
    }

    #[test]
    fn stage_poll_reports_end_of_input() {
        let (samples, mut stage) = FilterStage::spawn(filter());
        drop(samples);
        assert!(matches!(
            stage.poll_next(Duration::from_secs(1)),
            EventPoll::Ended
        ));
    }

    #[test]
    fn pending_emission_stalls_the_input_port() {
        let (samples, mut stage) = FilterStage::spawn(filter());
        // First event fills the outbound slot, the second parks the worker,
        // the third sample fills the inbound slot.
        samples.send(RawSample::data(0x01)).unwrap();
        samples.send(RawSample::data(0x02)).unwrap();
        samples.send(RawSample::data(0x03)).unwrap();
        assert!(matches!(
            samples.try_send(RawSample::data(0x04)),
            Err(TrySendError::Full(_))
        ));

        // Draining the consumer side releases everything in order.
        assert_eq!(stage.next(), Some(PacketEvent::new(0, 0x01, None)));
        assert_eq!(stage.next(), Some(PacketEvent::new(1, 0x02, None)));
        assert_eq!(stage.next(), Some(PacketEvent::new(2, 0x03, None)));
        samples.send(RawSample::data(0x04)).unwrap();
        assert_eq!(stage.next(), Some(PacketEvent::new(3, 0x04, None)));
        drop(samples);
        assert_eq!(stage.next(), None);
        assert!(matches!(stage.poll_next(Duration::from_millis(1)), EventPoll::Ended));
    }

    #[test]
    fn stage_stop_joins_worker() {
        let (samples, stage) = FilterStage::spawn(filter());
        samples.send(RawSample::data(0x01)).unwrap();
        samples.send(RawSample::data(0x02)).unwrap();
        drop(samples);
        assert!(stage.stop().is_ok());
    }
}
