//! Frame-batched transcript writes.
//!
//! Lines arriving in a burst are held until the stream has been quiet for
//! one flush interval and then written as a single block, in arrival order.

use crate::page::Page;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug)]
pub struct OutputBatcher {
    buffer: Vec<String>,
    deadline: Option<Instant>,
    interval: Duration,
    flushes: u64,
}

impl Default for OutputBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}

impl OutputBatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            buffer: Vec::new(),
            deadline: None,
            interval,
            flushes: 0,
        }
    }

    /// Buffers a line and pushes the pending flush out by one interval.
    pub fn append(&mut self, line: impl Into<String>, now: Instant) {
        self.buffer.push(line.into());
        self.deadline = Some(now + self.interval);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending(&self) -> &[String] {
        &self.buffer
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Drops buffered lines without rendering them.
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.deadline = None;
    }

    /// Writes everything buffered as one block and scrolls to the end.
    /// Without a transcript on the page the lines stay buffered.
    pub fn flush(&mut self, page: &mut Page) -> usize {
        self.deadline = None;
        if self.buffer.is_empty() {
            return 0;
        }
        let Some(output) = page.output.as_mut() else {
            return 0;
        };
        let lines = std::mem::take(&mut self.buffer);
        let count = lines.len();
        output.append_block(lines);
        output.scroll_to_end();
        self.flushes += 1;
        count
    }

    pub fn flush_if_due(&mut self, page: &mut Page, now: Instant) -> usize {
        match self.deadline {
            Some(deadline) if now >= deadline => self.flush(page),
            _ => 0,
        }
    }
}
