use std::sync::Arc;

use futures_channel::mpsc::UnboundedSender;
use futures_util::task::ArcWake;

use super::SchedulerMsg;

/// The waker handed to synchronous drains. When a suspended chore's future
/// wakes, the host is asked for another drain at the next opportunity.
pub(crate) struct DrainWaker {
    pub tx: UnboundedSender<SchedulerMsg>,
}

impl ArcWake for DrainWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        _ = arc_self.tx.unbounded_send(SchedulerMsg::DrainRequested);
    }
}
