//! Progress delivery from a decrypt worker to its owner.
//!
//! A job reports either through a [`ProgressSender`] whose ticks are received
//! by [`ProgressEvents`] on another thread, or through a [`LocalIndicator`]
//! that renders a rate limited progress bar.

use kdam::{Bar, BarExt, tqdm};
use std::sync::{
    Arc, Mutex,
    mpsc::{self, Receiver, Sender},
};

/// Ticks between two renders of the local indicator.
pub const PROGRESS_SAMPLE_INTERVAL: u32 = 15;

/// One progress report, `step` out of `total` units of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressTick {
    pub step: u32,
    pub total: u32,
}

/// Receives progress reports from a decryption strategy.
pub trait ProgressListener {
    fn on_progress(&mut self, step: u32, total: u32);
}

impl<F: FnMut(u32, u32)> ProgressListener for F {
    fn on_progress(&mut self, step: u32, total: u32) {
        self(step, total)
    }
}

/// Where the ticks of a job go.
pub enum ProgressBridge {
    Channel(ProgressSender),
    Local(LocalIndicator),
}

impl ProgressBridge {
    pub fn report(&mut self, tick: ProgressTick) {
        match self {
            Self::Channel(sender) => sender.send(tick),
            Self::Local(indicator) => indicator.update(tick),
        }
    }
}

impl Default for ProgressBridge {
    fn default() -> Self {
        Self::Local(LocalIndicator::default())
    }
}

impl ProgressListener for ProgressBridge {
    fn on_progress(&mut self, step: u32, total: u32) {
        self.report(ProgressTick { step, total });
    }
}

/// Create a connected sender and receiver pair.
pub fn channel() -> (ProgressSender, ProgressEvents) {
    let (tx, rx) = mpsc::channel();
    (ProgressSender(tx), ProgressEvents(rx))
}

/// Sending half of a progress channel, owned by the worker.
#[derive(Clone)]
pub struct ProgressSender(Sender<ProgressTick>);

impl ProgressSender {
    /// Never blocks, ticks are dropped once the receiver is gone.
    pub fn send(&self, tick: ProgressTick) {
        let _ = self.0.send(tick);
    }
}

/// Receiving half of a progress channel, owned by the job owner.
pub struct ProgressEvents(Receiver<ProgressTick>);

impl ProgressEvents {
    /// Iterate until every sender has been dropped.
    pub fn iter(&self) -> impl Iterator<Item = ProgressTick> + '_ {
        self.0.iter()
    }

    /// Run `callback` on the current thread for every tick, until the worker
    /// finishes.
    pub fn dispatch<F: FnMut(u32, u32)>(self, mut callback: F) {
        for tick in self.0 {
            callback(tick.step, tick.total);
        }
    }
}

/// Draws progress for the local indicator.
pub trait ProgressRenderer {
    /// Start over, e.g. for a new job.
    fn reset(&mut self, total: u32);
    fn render(&mut self, step: u32, total: u32);
    fn complete(&mut self);
}

impl<R: ProgressRenderer> ProgressRenderer for Arc<Mutex<R>> {
    fn reset(&mut self, total: u32) {
        if let Ok(mut renderer) = self.lock() {
            renderer.reset(total);
        }
    }

    fn render(&mut self, step: u32, total: u32) {
        if let Ok(mut renderer) = self.lock() {
            renderer.render(step, total);
        }
    }

    fn complete(&mut self) {
        if let Ok(mut renderer) = self.lock() {
            renderer.complete();
        }
    }
}

/// Progress bar on stderr.
pub struct KdamRenderer {
    pb: Bar,
}

impl KdamRenderer {
    pub fn new() -> Self {
        Self {
            pb: tqdm!(total = 0, desc = "Decrypting", unit = " units", leave = true),
        }
    }
}

impl Default for KdamRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRenderer for KdamRenderer {
    fn reset(&mut self, total: u32) {
        self.pb.reset(Some(total as usize));
    }

    fn render(&mut self, step: u32, total: u32) {
        if self.pb.total != total as usize {
            self.pb.total = total as usize;
        }

        let _ = self.pb.update_to(step as usize);
    }

    fn complete(&mut self) {
        let _ = self.pb.refresh();
        eprintln!();
    }
}

/// Rate limited fallback indicator, used when the caller supplies no sink.
///
/// The first tick after a reset, every [`PROGRESS_SAMPLE_INTERVAL`]th tick and
/// the final tick are rendered. A `step` of 0 or 1 starts a new run.
pub struct LocalIndicator {
    renderer: Box<dyn ProgressRenderer + Send>,
    fresh: bool,
    completed: bool,
}

impl LocalIndicator {
    pub fn new<R: ProgressRenderer + Send + 'static>(renderer: R) -> Self {
        Self {
            renderer: Box::new(renderer),
            fresh: true,
            completed: false,
        }
    }

    pub fn update(&mut self, tick: ProgressTick) {
        let ProgressTick { step, total } = tick;

        if step <= 1 {
            self.renderer.reset(total);
            self.fresh = true;
            self.completed = false;
        }

        if self.completed {
            return;
        }

        if self.fresh || step % PROGRESS_SAMPLE_INTERVAL == 0 || step == total {
            self.fresh = false;
            self.renderer.render(step, total);
        }

        if step == total {
            self.completed = true;
            self.renderer.complete();
        }
    }
}

impl Default for LocalIndicator {
    fn default() -> Self {
        Self::new(KdamRenderer::new())
    }
}
