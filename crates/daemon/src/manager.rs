// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The display manager: thin owner of the seats.

use tracing::{debug, info, warn};

use crate::event::CoreEvent;
use crate::seat::{Seat, SeatEvent};

pub struct DisplayManager {
    seats: Vec<Seat>,
    stopping: bool,
    stopped: bool,
    /// A seat marked `exit-on-failure` stopped; the daemon exits nonzero.
    failed: bool,
}

impl DisplayManager {
    pub fn new() -> Self {
        Self { seats: Vec::new(), stopping: false, stopped: false, failed: false }
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Start a seat and take ownership of it. Returns whether the seat came
    /// up; a seat that fails to start is not added.
    pub fn add_seat(&mut self, mut seat: Seat) -> bool {
        let (started, events) = seat.start();
        if !started {
            warn!(seat = seat.name(), "seat failed to start");
            return false;
        }
        debug!(seat = seat.name(), "seat added");
        self.seats.push(seat);
        // Start-time events cannot include Stopped; log-only processing.
        for event in events {
            debug!(?event, "seat event");
        }
        true
    }

    /// Stop one seat by name; it is removed once it reports stopped.
    pub fn remove_seat(&mut self, name: &str) {
        let Some(index) = self.seats.iter().position(|s| s.name() == name) else {
            return;
        };
        let events = self.seats[index].stop();
        self.process_seat_events(index, events);
    }

    /// Stop everything. `is_stopped` flips once every seat has stopped.
    pub fn stop(&mut self) {
        if self.stopping {
            self.check_stopped();
            return;
        }
        info!("stopping display manager");
        self.stopping = true;
        let mut index = 0;
        while index < self.seats.len() {
            let events = self.seats[index].stop();
            // The seat may be removed by its own Stopped event.
            let before = self.seats.len();
            self.process_seat_events(index, events);
            if self.seats.len() == before {
                index += 1;
            }
        }
        self.check_stopped();
    }

    /// Dispatch one supervisor event to the seat owning the display.
    pub fn handle_event(&mut self, event: CoreEvent) {
        let display_id = event.display();
        let Some(index) = self.seats.iter().position(|s| s.owns(display_id)) else {
            debug!(display = %display_id, "event for unknown display dropped");
            return;
        };
        let events = self.seats[index].handle_display_event(event);
        self.process_seat_events(index, events);
    }

    fn process_seat_events(&mut self, index: usize, events: Vec<SeatEvent>) {
        for event in &events {
            debug!(seat = self.seats[index].name(), ?event, "seat event");
        }
        if !events.contains(&SeatEvent::Stopped) {
            return;
        }

        let seat = self.seats.remove(index);
        info!(seat = seat.name(), "seat stopped");
        if seat.bool_property("exit-on-failure") {
            warn!(seat = seat.name(), "required seat has stopped, stopping display manager");
            self.failed = true;
            self.stop();
        }
        self.check_stopped();
    }

    fn check_stopped(&mut self) {
        if self.stopping && !self.stopped && self.seats.is_empty() {
            self.stopped = true;
            info!("display manager stopped");
        }
    }
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
