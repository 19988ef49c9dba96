//! Poll adapter: a fixed-period ticker feeding the controller.
//!
//! The controller decides on each tick whether a status request is worth
//! sending; the ticker itself never stops while the controller runs.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_stream::{wrappers::IntervalStream, StreamExt};

use crate::controller::{ControllerEvent, ControllerHandle};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run_poll_ticker(period: Duration, events: ControllerHandle) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = IntervalStream::new(interval);
    // The first tick completes immediately; start-up is covered by the health probe.
    ticks.next().await;
    while ticks.next().await.is_some() {
        if !events.send(ControllerEvent::PollTick) {
            break;
        }
    }
}
